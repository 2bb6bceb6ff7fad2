use pretty_assertions::assert_eq;
use rowgen::types::{is_builtin_type, TypeMapper};

#[test]
fn builtin_types() {
    assert!(is_builtin_type("i64"));
    assert!(is_builtin_type("Option<String>"));
    assert!(is_builtin_type("Option< i64 >"));
    assert!(is_builtin_type("Vec<u8>"));
    assert!(!is_builtin_type("Uuid"));
    assert!(!is_builtin_type("uuid::Uuid"));
    assert!(!is_builtin_type("Option<Uuid>"));
    assert!(!is_builtin_type("Vec<String>"));
}

#[test]
fn default_sql_type_mapping() {
    let mapper = TypeMapper::new();
    let cases = [
        (Some("INTEGER"), "i64"),
        (Some("int"), "i64"),
        (Some("BIGINT"), "i64"),
        (Some("VARCHAR(20)"), "String"),
        (Some("TEXT"), "String"),
        (Some("BLOB"), "Vec<u8>"),
        (None, "Vec<u8>"),
        (Some("  "), "Vec<u8>"),
        (Some("DOUBLE PRECISION"), "f64"),
        (Some("REAL"), "f64"),
        (Some("BOOLEAN"), "bool"),
        (Some("NUMERIC"), "i64"),
        (Some("DECIMAL(10,2)"), "f64"),
        (Some("DATETIME"), "String"),
    ];
    for (sql, rust) in cases {
        assert_eq!(mapper.map_sql_type(sql), rust, "{:?}", sql);
    }
}

#[test]
fn overrides_match_full_or_base_name() {
    let mapper = TypeMapper::with_overrides([("uuid", "uuid::Uuid"), ("VARCHAR(36)", "Id")]);
    assert_eq!(mapper.map_sql_type(Some("UUID")), "uuid::Uuid");
    assert_eq!(mapper.map_sql_type(Some("uuid(16)")), "uuid::Uuid");
    assert_eq!(mapper.map_sql_type(Some("varchar(36)")), "Id");
    assert_eq!(mapper.map_sql_type(Some("VARCHAR(20)")), "String");
}
