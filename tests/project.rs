use pretty_assertions::assert_eq;
use rowgen::analyze_project;
use rowgen::codegen::{generate_code, render_project};
use rowgen::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const SCHEMA: &str = "
CREATE TABLE person (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  born DATETIME
);
CREATE TABLE address (
  id INTEGER PRIMARY KEY,
  person_id INTEGER NOT NULL,
  city TEXT NOT NULL
);
";

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn sample_project(root: &Path) {
    write(
        root,
        "rowgen.toml",
        "[project]\noutput_dir = \"out\"\n\n[types]\nDATETIME = \"i64\"\n",
    );
    write(root, "schema/001_people.sql", SCHEMA);
    write(
        root,
        "queries/count_people.sql",
        "SELECT COUNT(*) AS total FROM person",
    );
    write(
        root,
        "queries/person/by_id.sql",
        "-- @@{ queryResult=Person, implements=[HasName] }\nSELECT id, name, born FROM person WHERE id = :id",
    );
    write(
        root,
        "queries/person/by_name.sql",
        "-- @@{ queryResult=Person, excludeOverrideFields=[born] }\nSELECT id, name, born FROM person WHERE name = :name",
    );
    write(
        root,
        "queries/person/with_addresses.sql",
        "-- @@{ collectionKey=id }\n\
         -- @@{ dynamicField=addresses, propertyType=Address, mappingType=collection, sourceTable=a, aliasPrefix=addr_ }\n\
         SELECT p.id, p.name, a.id AS addr_id, a.city AS addr_city\n\
         FROM person p LEFT JOIN address a ON a.person_id = p.id\n",
    );
    write(root, "queries/person/notes.txt", "not a query");
    write(
        root,
        "migrations/0001_people.sql",
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    );
}

#[test]
fn analyze_groups_queries_by_namespace() {
    let dir = tempdir().unwrap();
    sample_project(dir.path());
    let config = Config::load(&dir.path().join("rowgen.toml")).unwrap();
    let project = analyze_project(&config).unwrap();

    assert_eq!(
        project.namespaces.keys().collect::<Vec<_>>(),
        vec!["default", "person"]
    );
    let names: Vec<&str> = project.namespaces["person"]
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(names, vec!["by_id", "by_name", "with_addresses"]);
    assert_eq!(project.statements().count(), 4);

    let by_id = project.statement("person", "by_id").unwrap();
    assert_eq!(by_id.parameter("id").unwrap().rust_type(), "i64");
    assert_eq!(by_id.field("born").unwrap().rust_type(), "Option<i64>");
    assert_eq!(
        by_id.source_file,
        dir.path().join("queries").join("person").join("by_id.sql")
    );

    let shared = project.shared.get("person", "Person").unwrap();
    assert_eq!(shared.id, "person::Person");
    assert_eq!(shared.statement, "by_id");
    assert_eq!(project.migrations.latest(), Some(1));
}

#[test]
fn rendered_modules() {
    let dir = tempdir().unwrap();
    sample_project(dir.path());
    let config = Config::load(&dir.path().join("rowgen.toml")).unwrap();
    let project = analyze_project(&config).unwrap();
    let files = render_project(&project);

    let paths: Vec<PathBuf> = files.iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("default.rs"),
            PathBuf::from("person.rs"),
            PathBuf::from("schema_migrations.rs"),
            PathBuf::from("mod.rs"),
        ]
    );

    let person = &files[1].contents;
    for needle in [
        "pub struct Person {",
        "    pub born: Option<i64>,",
        "impl HasName for Person {",
        "fn name(&self) -> &String {",
        "pub const BY_ID_SQL: &str = r#\"SELECT id, name, born FROM person WHERE id = :id\"#;",
        "pub const BY_ID_BINDINGS: &[&str] = &[\"id\"];",
        "pub struct ByIdParams {",
        "pub struct Address {",
        "pub struct WithAddressesRow {",
        "    pub addresses: Vec<Address>,",
        "pub struct WithAddressesFlatRow {",
        "pub fn nest_with_addresses(rows: Vec<WithAddressesFlatRow>) -> Vec<WithAddressesRow> {",
    ] {
        assert!(person.contains(needle), "missing {needle:?} in\n{person}");
    }
    assert!(!person.contains("fn born(&self)"));
    assert_eq!(person.matches("pub struct Person {").count(), 1);
    let row_start = person.find("pub struct WithAddressesRow {").unwrap();
    let row = &person[row_start..row_start + person[row_start..].find('}').unwrap()];
    assert!(!row.contains("addr_"), "{row}");

    let default = &files[0].contents;
    assert!(default.contains("pub struct CountPeopleRow {\n    pub total: i64,\n}"));
    assert!(!default.contains("CountPeopleParams"));

    let module = &files[3].contents;
    assert!(module.contains("pub mod default;"));
    assert!(module.contains("pub mod person;"));
    assert!(module.contains("pub mod schema_migrations;"));
}

#[test]
fn generate_writes_into_the_module_directory() {
    let dir = tempdir().unwrap();
    sample_project(dir.path());
    let config = Config::load(&dir.path().join("rowgen.toml")).unwrap();
    let project = analyze_project(&config).unwrap();

    let written = generate_code(&project, &config, None).unwrap();
    assert_eq!(written.len(), 4);
    let module_dir = dir.path().join("out").join("db");
    for path in &written {
        assert!(path.starts_with(&module_dir), "{}", path.display());
        assert!(path.is_file());
    }

    let other = tempdir().unwrap();
    let written = generate_code(&project, &config, Some(other.path())).unwrap();
    assert!(written[0].starts_with(other.path().join("db")));
}

#[test]
fn schema_falls_back_to_migrations() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "migrations/0001_init.sql",
        "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    );
    write(
        dir.path(),
        "migrations/0002_nick.sql",
        "CREATE TABLE nick (person_id INTEGER NOT NULL, nick TEXT);",
    );
    write(dir.path(), "queries/nicks.sql", "SELECT person_id, nick FROM nick");

    let project = analyze_project(&Config::with_root(dir.path())).unwrap();
    assert_eq!(project.catalog.tables().count(), 2);
    let nicks = project.statement("default", "nicks").unwrap();
    assert!(nicks.field("person_id").unwrap().not_null);
}

#[test]
fn query_errors_name_the_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "schema/schema.sql", SCHEMA);
    write(dir.path(), "queries/broken.sql", "SELECT missing FROM person");

    let err = analyze_project(&Config::with_root(dir.path())).unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("broken.sql"), "{msg}");
}

#[test]
fn missing_config_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let config = Config::load(&dir.path().join("rowgen.toml")).unwrap();
    assert_eq!(config.root, dir.path());
    assert_eq!(config.schema_dir(), dir.path().join("schema"));
    assert_eq!(config.queries_dir(), dir.path().join("queries"));
    assert_eq!(config.migrations_dir(), dir.path().join("migrations"));
    assert_eq!(config.output_dir(), dir.path().join("src"));
    assert_eq!(config.project.module_name, "db");
    assert!(config.types.is_empty());
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempdir().unwrap();
    write(dir.path(), "rowgen.toml", "[project\n");
    assert!(Config::load(&dir.path().join("rowgen.toml")).is_err());
}
