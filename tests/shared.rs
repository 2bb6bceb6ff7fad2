use pretty_assertions::assert_eq;
use rowgen::pipeline::{process_statement_text, AnalysisContext, AnnotatedStatement};
use rowgen::shared::SharedResultManager;
use rowgen::Error;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE person (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  nickname TEXT,
  points INTEGER NOT NULL,
  rating NUMERIC NOT NULL
);
";

fn statement(name: &str, sql: &str) -> AnnotatedStatement {
    let ctx = AnalysisContext::from_schema_sql(SCHEMA).unwrap();
    let file = format!("queries/person/{}.sql", name);
    process_statement_text(&ctx, sql, name, "person", Path::new(&file)).unwrap()
}

#[test]
fn identical_shapes_share_one_result() {
    let mut manager = SharedResultManager::new();
    let by_id = statement(
        "by_id",
        "-- @@{ queryResult=Person, implements=[HasId] }\nSELECT id, name FROM person WHERE id = :id",
    );
    let by_name = statement(
        "by_name",
        "-- @@{ queryResult=Person, implements=[HasName, HasId] }\nSELECT id, name FROM person WHERE name = :name",
    );

    let first = manager.register_shared_result(&by_id, "person").unwrap().id.clone();
    let second = manager.register_shared_result(&by_name, "person").unwrap();
    assert_eq!(second.id, first);
    assert_eq!(second.id, "person::Person");
    assert_eq!(second.statement, "by_id");
    assert_eq!(second.implements, vec!["HasId", "HasName"]);
    assert_eq!(manager.results().count(), 1);
    assert!(manager.get("person", "Person").is_some());
    assert!(manager.get("other", "Person").is_none());
}

#[test]
fn nullability_mismatch_names_both_statements() {
    let mut manager = SharedResultManager::new();
    let strict = statement(
        "strict",
        "-- @@{ queryResult=Person }\nSELECT id, name FROM person",
    );
    let loose = statement(
        "loose",
        "-- @@{ queryResult=Person }\nSELECT id, nickname AS name FROM person",
    );
    manager.register_shared_result(&strict, "person").unwrap();
    let err = manager.register_shared_result(&loose, "person").unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, Error::SharedResultConflict(_)), "{msg}");
    for needle in [
        "strict",
        "loose",
        "queries/person/strict.sql",
        "queries/person/loose.sql",
        "notNull=true",
        "notNull=false",
        "`name`",
    ] {
        assert!(msg.contains(needle), "missing {needle} in {msg}");
    }
}

#[test]
fn property_type_mismatch_is_a_conflict() {
    let mut manager = SharedResultManager::new();
    let a = statement("a", "-- @@{ queryResult=Person }\nSELECT id FROM person");
    let b = statement(
        "b",
        "-- @@{ queryResult=Person }\nSELECT\n  -- @@{ field=id, propertyType=PersonId }\n  id\nFROM person",
    );
    manager.register_shared_result(&a, "person").unwrap();
    let err = manager.register_shared_result(&b, "person").unwrap_err();
    assert!(err.to_string().contains("propertyType=PersonId"), "{err}");
}

#[test]
fn fields_compare_by_resolved_property_type() {
    let mut manager = SharedResultManager::new();
    let by_points = statement(
        "by_points",
        "-- @@{ queryResult=Score }\nSELECT id, points AS score FROM person",
    );
    let by_rating = statement(
        "by_rating",
        "-- @@{ queryResult=Score }\nSELECT id, rating AS score FROM person",
    );
    assert_eq!(by_points.field("score").unwrap().sql_type.as_deref(), Some("INTEGER"));
    assert_eq!(by_rating.field("score").unwrap().sql_type.as_deref(), Some("NUMERIC"));

    manager.register_shared_result(&by_points, "person").unwrap();
    let shared = manager.register_shared_result(&by_rating, "person").unwrap();
    assert_eq!(shared.statement, "by_points");
    assert_eq!(shared.fields[1].property_type, "i64");
}

#[test]
fn missing_field_is_a_conflict() {
    let mut manager = SharedResultManager::new();
    let a = statement("a", "-- @@{ queryResult=Person }\nSELECT id, name FROM person");
    let b = statement("b", "-- @@{ queryResult=Person }\nSELECT id FROM person");
    manager.register_shared_result(&a, "person").unwrap();
    let err = manager.register_shared_result(&b, "person").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("present") && msg.contains("absent"), "{msg}");
}

#[test]
fn same_name_in_other_namespace_is_independent() {
    let mut manager = SharedResultManager::new();
    let a = statement("a", "-- @@{ queryResult=Person }\nSELECT id, name FROM person");
    let b = statement("b", "-- @@{ queryResult=Person }\nSELECT id FROM person");
    manager.register_shared_result(&a, "person").unwrap();
    manager.register_shared_result(&b, "admin").unwrap();
    assert_eq!(manager.results().count(), 2);
    assert_eq!(manager.in_namespace("admin").count(), 1);
}

#[test]
fn statements_without_query_result_cannot_register() {
    let mut manager = SharedResultManager::new();
    let plain = statement("plain", "SELECT id FROM person");
    assert!(manager.register_shared_result(&plain, "person").is_err());
}

#[test]
fn exclude_fields_are_unioned_in_any_order() {
    let with_exclude = statement(
        "with_exclude",
        "-- @@{ queryResult=Person, excludeOverrideFields=[name] }\nSELECT id, name FROM person",
    );
    let without = statement(
        "without",
        "-- @@{ queryResult=Person, excludeOverrideFields=[id] }\nSELECT id, name FROM person",
    );

    for order in [[&with_exclude, &without], [&without, &with_exclude]] {
        let mut manager = SharedResultManager::new();
        for stmt in order {
            manager.register_shared_result(stmt, "person").unwrap();
        }
        for stmt in [&with_exclude, &without] {
            let mut fields: Vec<String> = manager
                .get_effective_exclude_override_fields(stmt, "person")
                .into_iter()
                .collect();
            fields.sort();
            assert_eq!(fields, vec!["id", "name"]);
        }
        let mut stored: Vec<String> = manager
            .exclude_override_fields("person", "Person")
            .into_iter()
            .collect();
        stored.sort();
        assert_eq!(stored, vec!["id", "name"]);
    }
}

#[test]
fn statements_without_exclusions_see_the_shared_set() {
    let excluding = statement(
        "excluding",
        "-- @@{ queryResult=Person, excludeOverrideFields=[name] }\nSELECT id, name FROM person",
    );
    let plain = statement(
        "plain",
        "-- @@{ queryResult=Person }\nSELECT id, name FROM person WHERE id = :id",
    );
    assert!(plain.annotations.exclude_override_fields.is_empty());

    for order in [[&excluding, &plain], [&plain, &excluding]] {
        let mut manager = SharedResultManager::new();
        for stmt in order {
            manager.register_shared_result(stmt, "person").unwrap();
        }
        for stmt in [&excluding, &plain] {
            let fields: Vec<String> = manager
                .get_effective_exclude_override_fields(stmt, "person")
                .into_iter()
                .collect();
            assert_eq!(fields, vec!["name"], "{}", stmt.name);
        }
    }
}
