use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use rowgen::annotations::{keys, AnnotationMap, AnnotationValue};
use rowgen::resolver::{FieldAnnotationResolver, InheritedFrom, ObjectAnnotations};
use rowgen::schema::{ColumnOrigin, SchemaCatalog};
use rowgen::sql::{parse_statement, Statement};

const SCHEMA: &str = "
CREATE TABLE person (
  id INTEGER PRIMARY KEY,
  -- @@{ field=name, notNull=true, propertyName=fullName }
  name TEXT
);
CREATE TABLE orders (
  id INTEGER PRIMARY KEY,
  person_id INTEGER NOT NULL
);
CREATE VIEW person_view AS SELECT id, name FROM person;
-- @@{ field=name, propertyType=Name }
CREATE VIEW person_view2 AS SELECT * FROM person_view;
CREATE VIEW order_people AS
  SELECT o.id AS order_id, p.name
  FROM orders o LEFT JOIN person p ON p.id = o.person_id;
";

fn resolver() -> FieldAnnotationResolver {
    FieldAnnotationResolver::new(&SchemaCatalog::from_sql(SCHEMA).unwrap())
}

#[test]
fn table_annotations_resolve_directly() {
    let overrides = resolver()
        .get_field_annotations("PERSON", "Name")
        .unwrap()
        .unwrap();
    assert_eq!(overrides.property_name.as_deref(), Some("fullName"));
    assert_eq!(overrides.not_null, Some(true));
}

#[test]
fn views_inherit_through_several_levels() {
    let resolver = resolver();
    let first = resolver
        .get_field_annotations("person_view", "name")
        .unwrap()
        .unwrap();
    assert_eq!(first.not_null, Some(true));
    assert_eq!(first.property_name.as_deref(), Some("fullName"));

    let second = resolver
        .get_field_annotations("person_view2", "name")
        .unwrap()
        .unwrap();
    assert_eq!(second.not_null, Some(true));
    assert_eq!(second.property_name.as_deref(), Some("fullName"));
    assert_eq!(second.property_type.as_deref(), Some("Name"));
    assert!(second.adapter);
}

#[test]
fn outer_join_in_view_drops_inherited_not_null() {
    let overrides = resolver()
        .get_field_annotations("order_people", "name")
        .unwrap()
        .unwrap();
    assert_eq!(overrides.not_null, None);
    assert_eq!(overrides.property_name.as_deref(), Some("fullName"));
}

#[test]
fn unknown_lookups_are_none() {
    let resolver = resolver();
    assert!(resolver.get_field_annotations("missing", "x").unwrap().is_none());
    assert!(resolver.get_field_annotations("person", "id").unwrap().is_none());
    assert!(resolver.get_annotation_map("order_people", "order_id").is_none());
}

fn named(value: &str) -> AnnotationMap {
    AnnotationMap::from([(
        keys::PROPERTY_NAME.to_string(),
        AnnotationValue::Str(value.to_string()),
    )])
}

fn from(object: &str, column: &str) -> InheritedFrom {
    InheritedFrom {
        origin: ColumnOrigin {
            object: object.to_string(),
            column: column.to_string(),
        },
        drop_not_null: false,
    }
}

#[test]
fn inheritance_cycles_terminate() {
    let objects = IndexMap::from([
        (
            "a".to_string(),
            ObjectAnnotations {
                fields: IndexMap::from([("x".to_string(), named("ax"))]),
                origins: IndexMap::from([("x".to_string(), from("b", "x"))]),
            },
        ),
        (
            "b".to_string(),
            ObjectAnnotations {
                fields: IndexMap::new(),
                origins: IndexMap::from([("x".to_string(), from("a", "x"))]),
            },
        ),
    ]);
    let resolver = FieldAnnotationResolver::from_parts(objects);
    for object in ["a", "b"] {
        let overrides = resolver.get_field_annotations(object, "x").unwrap().unwrap();
        assert_eq!(overrides.property_name.as_deref(), Some("ax"), "{object}");
    }
}

#[test]
fn local_annotations_win_over_inherited() {
    let objects = IndexMap::from([
        (
            "base".to_string(),
            ObjectAnnotations {
                fields: IndexMap::from([("x".to_string(), named("fromBase"))]),
                origins: IndexMap::new(),
            },
        ),
        (
            "top".to_string(),
            ObjectAnnotations {
                fields: IndexMap::from([("x".to_string(), named("fromTop"))]),
                origins: IndexMap::from([("x".to_string(), from("base", "x"))]),
            },
        ),
    ]);
    let resolver = FieldAnnotationResolver::from_parts(objects);
    let overrides = resolver.get_field_annotations("top", "X").unwrap().unwrap();
    assert_eq!(overrides.property_name.as_deref(), Some("fromTop"));
}

#[test]
fn view_definition_cycles_stop_inheritance() {
    let catalog = SchemaCatalog::from_sql(
        "CREATE TABLE person (
           id INTEGER PRIMARY KEY,
           -- @@{ field=name, propertyName=fullName }
           name TEXT
         );
         -- @@{ field=name, propertyType=Name }
         CREATE VIEW a AS SELECT * FROM b;
         CREATE VIEW b AS SELECT * FROM a;
         CREATE VIEW c AS SELECT name FROM a;
         CREATE VIEW named AS SELECT name FROM person;",
    )
    .unwrap();
    for view in ["a", "b", "c"] {
        let info = catalog.view(view).unwrap();
        assert!(info.cyclic, "{view}");
        assert!(info.columns.is_empty(), "{view}");
    }
    assert!(!catalog.view("named").unwrap().cyclic);

    let resolver = FieldAnnotationResolver::new(&catalog);
    let local = resolver.get_field_annotations("a", "name").unwrap().unwrap();
    assert_eq!(local.property_type.as_deref(), Some("Name"));
    assert_eq!(local.property_name, None);
    assert!(resolver.get_field_annotations("b", "name").unwrap().is_none());
    let named = resolver.get_field_annotations("named", "name").unwrap().unwrap();
    assert_eq!(named.property_name.as_deref(), Some("fullName"));

    let parsed = parse_statement("SELECT * FROM b").unwrap();
    let Statement::Select(query) = parsed.statement else {
        panic!("expected SELECT");
    };
    let err = catalog.resolve_select(&query).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn table_level_annotations_are_kept_on_the_table() {
    let catalog = SchemaCatalog::from_sql(
        "-- @@{ enableSync=true, syncKeyColumnName=uuid }
         CREATE TABLE note (id INTEGER PRIMARY KEY, uuid TEXT NOT NULL);
         CREATE TABLE tag (id INTEGER PRIMARY KEY, label TEXT);",
    )
    .unwrap();
    let note = catalog.table("note").unwrap();
    assert!(note.sync_enabled());
    assert_eq!(note.sync_key_column(), Some("uuid"));

    let tag = catalog.table("TAG").unwrap();
    assert!(!tag.sync_enabled());
    assert_eq!(tag.sync_key_column(), Some("id"));
}
