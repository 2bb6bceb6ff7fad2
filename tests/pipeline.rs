use pretty_assertions::assert_eq;
use rowgen::pipeline::{process_statement_text, AnalysisContext, AnnotatedStatement, StatementKind};
use rowgen::schema::ColumnOrigin;
use rowgen::{Error, DEFAULT_NAMESPACE};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE item (id INTEGER, item_type TEXT, name TEXT);
CREATE VIEW item_metrics_view AS
  SELECT item_type, COUNT(*) AS total_count, GROUP_CONCAT(name, ',') AS grouped_names
  FROM item GROUP BY item_type;

CREATE TABLE person (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  -- @@{ field=email, notNull=true }
  email TEXT,
  nickname TEXT
);
CREATE TABLE address (
  id INTEGER PRIMARY KEY,
  person_id INTEGER NOT NULL,
  city TEXT NOT NULL
);
CREATE TABLE badge (id INTEGER NOT NULL, label TEXT NOT NULL);
";

fn ctx() -> AnalysisContext {
    AnalysisContext::from_schema_sql(SCHEMA).unwrap()
}

fn process(sql: &str) -> Result<AnnotatedStatement, Error> {
    process_statement_text(
        &ctx(),
        sql,
        "test_query",
        DEFAULT_NAMESPACE,
        Path::new("queries/test_query.sql"),
    )
}

#[test]
fn aggregate_view_columns_keep_their_inferred_types() {
    let stmt = process("SELECT * FROM item_metrics_view").unwrap();
    assert_eq!(stmt.kind, StatementKind::Select);
    let names: Vec<&str> = stmt.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["item_type", "total_count", "grouped_names"]);

    let total = stmt.field("total_count").unwrap();
    assert!(total.not_null);
    assert_eq!(total.rust_type(), "i64");

    let grouped = stmt.field("grouped_names").unwrap();
    assert!(!grouped.not_null);
    assert_eq!(grouped.sql_type.as_deref(), Some("TEXT"));
    assert_eq!(grouped.rust_type(), "Option<String>");
}

#[test]
fn query_local_hint_makes_aggregate_non_null() {
    let stmt = process(
        "SELECT
           item_type,
           total_count,
           -- @@{ field=grouped_names, sqlTypeHint=TEXT, notNull=true }
           grouped_names
         FROM item_metrics_view",
    )
    .unwrap();
    let grouped = stmt.field("grouped_names").unwrap();
    assert!(grouped.not_null);
    assert_eq!(grouped.rust_type(), "String");
}

#[test]
fn view_annotations_apply_to_queries_over_the_view() {
    let ctx = AnalysisContext::from_schema_sql(&format!(
        "{}\n-- @@{{ field=grouped_names, notNull=true, propertyName=names }}\n\
         CREATE VIEW named_metrics AS SELECT * FROM item_metrics_view;",
        SCHEMA
    ))
    .unwrap();
    let stmt = process_statement_text(
        &ctx,
        "SELECT grouped_names FROM named_metrics",
        "metrics",
        DEFAULT_NAMESPACE,
        Path::new("metrics.sql"),
    )
    .unwrap();
    let field = stmt.field("grouped_names").unwrap();
    assert!(field.not_null);
    assert_eq!(field.property_name, "names");
}

#[test]
fn left_join_columns_become_nullable() {
    let stmt = process(
        "SELECT p.id, p.name, a.city FROM person p LEFT JOIN address a ON a.person_id = p.id",
    )
    .unwrap();
    assert!(stmt.field("id").unwrap().not_null);
    assert!(stmt.field("name").unwrap().not_null);
    assert!(!stmt.field("city").unwrap().not_null);
    assert_eq!(stmt.table_aliases.get("a").map(String::as_str), Some("address"));
}

#[test]
fn local_not_null_overrides_the_join() {
    let stmt = process(
        "SELECT p.id,
           -- @@{ field=city, notNull=true }
           a.city
         FROM person p LEFT JOIN address a ON a.person_id = p.id",
    )
    .unwrap();
    assert!(stmt.field("city").unwrap().not_null);
}

#[test]
fn schema_not_null_is_dropped_under_an_outer_join() {
    let direct = process("SELECT email FROM person").unwrap();
    assert!(direct.field("email").unwrap().not_null);

    let joined = process(
        "SELECT a.id, p.email FROM address a LEFT JOIN person p ON p.id = a.person_id",
    )
    .unwrap();
    assert!(!joined.field("email").unwrap().not_null);
}

#[test]
fn natural_join_shares_its_common_columns() {
    let stmt = process("SELECT * FROM person NATURAL JOIN badge").unwrap();
    let names: Vec<&str> = stmt.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "email", "nickname", "label"]);

    let stmt = process("SELECT id, label FROM person NATURAL JOIN badge").unwrap();
    assert_eq!(
        stmt.field("id").unwrap().source.origin,
        Some(ColumnOrigin {
            object: "person".to_string(),
            column: "id".to_string(),
        })
    );
    assert!(stmt.field("label").unwrap().not_null);
}

#[test]
fn duplicate_result_columns_are_rejected() {
    let err = process("SELECT p.id, a.id FROM person p JOIN address a ON a.person_id = p.id")
        .unwrap_err();
    match err {
        Error::DuplicateColumn { statement, alias } => {
            assert_eq!(statement, "test_query");
            assert_eq!(alias, "id");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn returning_only_accepts_bare_columns() {
    let err = process("INSERT INTO person (name) VALUES (:name) RETURNING id AS person_id")
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedReturning { .. }), "{err}");

    let err = process("DELETE FROM person WHERE id = :id RETURNING id + 1").unwrap_err();
    assert!(matches!(err, Error::UnsupportedReturning { .. }), "{err}");

    let stmt = process("INSERT INTO person (name) VALUES (:name) RETURNING id, name").unwrap();
    assert_eq!(stmt.kind, StatementKind::Insert);
    assert_eq!(stmt.target_table.as_deref(), Some("person"));
    let names: Vec<&str> = stmt.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name"]);

    let stmt = process("UPDATE person SET name = :name WHERE id = :id RETURNING *").unwrap();
    assert_eq!(stmt.fields.len(), 4);
}

#[test]
fn statements_without_returning_have_no_fields() {
    let stmt = process("DELETE FROM person WHERE id = :id").unwrap();
    assert_eq!(stmt.kind, StatementKind::Delete);
    assert!(stmt.fields.is_empty());
    assert_eq!(stmt.parameter("id").unwrap().rust_type(), "i64");
}

#[test]
fn parameter_types_follow_columns_casts_and_limits() {
    let stmt = process(
        "SELECT id FROM person WHERE name = :name AND id > CAST(:since AS INTEGER) \
         AND nickname = :free LIMIT :limit",
    )
    .unwrap();

    let name = stmt.parameter("name").unwrap();
    assert_eq!(name.rust_type(), "String");
    assert_eq!(
        name.column,
        Some(ColumnOrigin {
            object: "person".into(),
            column: "name".into()
        })
    );
    // Compared parameters stay required even for nullable columns.
    assert_eq!(stmt.parameter("free").unwrap().rust_type(), "String");
    assert_eq!(stmt.parameter("since").unwrap().rust_type(), "i64");
    assert_eq!(stmt.parameter("limit").unwrap().rust_type(), "i64");
}

#[test]
fn unhinted_parameters_are_text() {
    let stmt = process("SELECT id FROM person WHERE length(name) > length(:text)").unwrap();
    let param = stmt.parameter("text").unwrap();
    assert_eq!(param.rust_type(), "String");
    assert!(param.column.is_none());
}

#[test]
fn assigned_parameters_take_column_nullability() {
    let stmt = process(
        "INSERT INTO person (name, email, nickname) VALUES (:name, :email, :nickname)",
    )
    .unwrap();
    assert_eq!(stmt.parameter("name").unwrap().rust_type(), "String");
    assert_eq!(stmt.parameter("email").unwrap().rust_type(), "String");
    assert_eq!(stmt.parameter("nickname").unwrap().rust_type(), "Option<String>");
}

#[test]
fn upsert_binding_order_repeats_parameters() {
    let stmt = process(
        "INSERT INTO person (id, name) VALUES (:id, :name) \
         ON CONFLICT (id) DO UPDATE SET name = :name",
    )
    .unwrap();
    assert_eq!(stmt.binding_order, vec!["id", "name", "name"]);
    let names: Vec<&str> = stmt.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name"]);
}

#[test]
fn non_query_statements_are_rejected() {
    let err = process("CREATE INDEX person_name ON person (name)").unwrap_err();
    assert!(matches!(err, Error::Sql(_)), "{err}");
    assert!(err.to_string().contains("must be a SELECT"), "{err}");
}

#[test]
fn unknown_tables_are_schema_errors() {
    let err = process("SELECT * FROM nowhere").unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "{err}");
}

#[test]
fn property_name_generator_is_configurable() {
    let stmt = process(
        "-- @@{ queryResult=PersonName, propertyNameGenerator=lowerCamelCase }\n\
         SELECT id, nickname AS nick_name FROM person",
    )
    .unwrap();
    assert_eq!(stmt.query_result(), Some("PersonName"));
    assert_eq!(stmt.field("nick_name").unwrap().property_name, "nickName");

    let stmt = process("SELECT nickname AS NickName FROM person").unwrap();
    assert_eq!(stmt.field("NickName").unwrap().property_name, "nick_name");
}

#[test]
fn property_name_and_type_overrides() {
    let stmt = process(
        "SELECT
           -- @@{ field=id, propertyName=person_id, propertyType=PersonId }
           id
         FROM person",
    )
    .unwrap();
    let id = stmt.field("id").unwrap();
    assert_eq!(id.property_name, "person_id");
    assert_eq!(id.rust_type(), "PersonId");
    assert!(id.adapter);
}

#[test]
fn dynamic_field_may_not_shadow_a_column() {
    let err = process(
        "-- @@{ dynamicField=name, propertyType=Name }\n\
         SELECT id, name FROM person",
    )
    .unwrap_err();
    assert!(matches!(err, Error::DynamicField { .. }), "{err}");
}
