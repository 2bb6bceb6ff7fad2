use pretty_assertions::assert_eq;
use rowgen::dynamic::{compute_skip_set, get_mapped_columns};
use rowgen::overrides::MappingType;
use rowgen::pipeline::{process_statement_text, AnalysisContext, AnnotatedStatement};
use rowgen::Error;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE person (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL
);
CREATE TABLE address (
  id INTEGER PRIMARY KEY,
  person_id INTEGER NOT NULL,
  city TEXT NOT NULL,
  zip TEXT
);
";

fn process(sql: &str) -> Result<AnnotatedStatement, Error> {
    let ctx = AnalysisContext::from_schema_sql(SCHEMA).unwrap();
    process_statement_text(&ctx, sql, "people", "default", Path::new("people.sql"))
}

const COLLECTION: &str = "
-- @@{ queryResult=PersonWithAddresses, collectionKey=id }
-- @@{ dynamicField=addresses, propertyType=Address, mappingType=collection, sourceTable=a, aliasPrefix=addr_ }
SELECT p.id, p.name, a.id AS addr_id, a.city AS addr_city
FROM person p
LEFT JOIN address a ON a.person_id = p.id
";

#[test]
fn collection_columns_are_skipped() {
    let stmt = process(COLLECTION).unwrap();
    let skip = compute_skip_set(&stmt);
    assert_eq!(
        skip.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["addr_id", "addr_city"]
    );
    let flat: Vec<&str> = stmt.flat_fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(flat, vec!["id", "name", "addresses"]);
    assert_eq!(
        get_mapped_columns(&stmt.fields, &stmt.table_aliases),
        skip
    );
}

#[test]
fn collection_mapping_details() {
    let stmt = process(COLLECTION).unwrap();
    let mapping = &stmt.dynamic_mappings[0];
    assert_eq!(mapping.kind, MappingType::Collection);
    assert_eq!(mapping.property_type, "Address");
    assert!(mapping.not_null);
    assert_eq!(mapping.parent_key.as_deref(), Some("id"));
    assert_eq!(mapping.item_key.as_deref(), Some("addr_id"));

    let props: Vec<(&str, String)> = mapping
        .columns
        .iter()
        .map(|c| (c.property_name.as_str(), c.rust_type()))
        .collect();
    assert_eq!(
        props,
        vec![("id", "i64".to_string()), ("city", "String".to_string())]
    );

    let field = stmt.field("addresses").unwrap();
    assert!(field.is_dynamic());
    assert!(field.not_null);
}

#[test]
fn per_row_mapping_under_left_join_is_optional() {
    let stmt = process(
        "-- @@{ dynamicField=address, propertyType=Address, mappingType=perRow, sourceTable=address }
         SELECT person.id, person.name, address.city, address.zip
         FROM person LEFT JOIN address ON address.person_id = person.id",
    )
    .unwrap();
    let mapping = &stmt.dynamic_mappings[0];
    assert_eq!(mapping.kind, MappingType::PerRow);
    assert!(!mapping.not_null);
    assert!(!stmt.field("address").unwrap().not_null);

    let columns: Vec<(&str, bool)> = mapping
        .columns
        .iter()
        .map(|c| (c.column.as_str(), c.not_null))
        .collect();
    assert_eq!(columns, vec![("city", true), ("zip", false)]);
}

#[test]
fn per_row_mapping_under_inner_join_is_required() {
    let stmt = process(
        "-- @@{ dynamicField=address, propertyType=Address, mappingType=perRow, sourceTable=a }
         SELECT p.id, a.city FROM person p JOIN address a ON a.person_id = p.id",
    )
    .unwrap();
    assert!(stmt.dynamic_mappings[0].not_null);
}

#[test]
fn mapping_without_columns_is_an_error() {
    let err = process(
        "-- @@{ dynamicField=address, propertyType=Address, mappingType=perRow, sourceTable=a, aliasPrefix=addr_ }
         SELECT p.id, a.city FROM person p JOIN address a ON a.person_id = p.id",
    )
    .unwrap_err();
    assert!(matches!(err, Error::DynamicField { .. }), "{err}");
    assert!(err.to_string().contains("maps no columns"), "{err}");
}

#[test]
fn collection_requires_statement_key() {
    let err = process(
        "-- @@{ dynamicField=addresses, propertyType=Address, mappingType=collection, sourceTable=a }
         SELECT p.id, a.city FROM person p LEFT JOIN address a ON a.person_id = p.id",
    )
    .unwrap_err();
    assert!(err.to_string().contains("collectionKey"), "{err}");
}

#[test]
fn a_column_belongs_to_one_mapping() {
    let err = process(
        "-- @@{ dynamicField=first, propertyType=Address, mappingType=perRow, sourceTable=a }
         -- @@{ dynamicField=second, propertyType=Address, mappingType=perRow, sourceTable=address }
         SELECT p.id, a.city FROM person p JOIN address a ON a.person_id = p.id",
    )
    .unwrap_err();
    assert!(err.to_string().contains("mapped by both"), "{err}");
}
