use pretty_assertions::assert_eq;
use rowgen::codegen::migrations::generate_migrations;
use rowgen::migrations::{collect_migrations, inspect_migrations};
use rowgen::Error;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn file(name: &str, sql: &str) -> (PathBuf, String) {
    (PathBuf::from("migrations").join(name), sql.to_string())
}

#[test]
fn versions_are_ordered_numerically() {
    let set = collect_migrations(vec![
        file("0100_add_index.sql", "CREATE INDEX person_name ON person (name);"),
        file("0001_init.sql", "CREATE TABLE person (id INTEGER PRIMARY KEY);"),
        file("0010.sql", "ALTER TABLE person ADD COLUMN name TEXT;"),
        file("README.md", "not a migration"),
    ])
    .unwrap();
    assert_eq!(set.len(), 3);
    assert_eq!(set.latest(), Some(100));
    let versions: Vec<u32> = set.iter().map(|m| m.version).collect();
    assert_eq!(versions, vec![1, 10, 100]);
}

#[test]
fn description_checksum_and_statements() {
    let sql = "-- people\nCREATE TABLE person (id INTEGER PRIMARY KEY);\nCREATE TABLE pet (id INTEGER);\n";
    let set = collect_migrations(vec![file("0001_create_people.sql", sql)]).unwrap();
    let migration = set.iter().next().unwrap();
    assert_eq!(migration.description.as_deref(), Some("create_people"));
    assert_eq!(migration.checksum, format!("{:x}", Sha256::digest(sql.as_bytes())));
    assert_eq!(migration.checksum.len(), 64);
    assert_eq!(migration.statements.len(), 2);
    assert!(migration.statements.iter().all(|s| !s.contains("--")));

    let bare = collect_migrations(vec![file("0002.sql", "SELECT 1;")]).unwrap();
    assert_eq!(bare.iter().next().unwrap().description, None);
}

#[test]
fn names_without_version_are_rejected() {
    let err = collect_migrations(vec![file("init.sql", "SELECT 1;")]).unwrap_err();
    match err {
        Error::MigrationFileName { file, .. } => assert_eq!(file, "init.sql"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn duplicate_versions_are_rejected_before_width() {
    let err = collect_migrations(vec![
        file("001_a.sql", "SELECT 1;"),
        file("0001_b.sql", "SELECT 1;"),
    ])
    .unwrap_err();
    match err {
        Error::DuplicateMigrationVersion {
            version,
            first,
            second,
        } => {
            assert_eq!(version, 1);
            assert_eq!(first, "0001_b.sql");
            assert_eq!(second, "001_a.sql");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn versions_need_four_digits() {
    let err = collect_migrations(vec![file("01_init.sql", "SELECT 1;")]).unwrap_err();
    assert!(err.to_string().contains("4 digits"), "{err}");

    let err = collect_migrations(vec![file("00001_init.sql", "SELECT 1;")]).unwrap_err();
    assert!(matches!(err, Error::MigrationFileName { .. }), "{err}");
}

#[test]
fn inspect_reads_a_directory() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("0002_b.sql"), "CREATE TABLE b (id INTEGER);").unwrap();
    fs::write(dir.path().join("0001_a.sql"), "CREATE TABLE a (id INTEGER);").unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    fs::create_dir(dir.path().join("0003_dir.sql")).unwrap();

    let set = inspect_migrations(dir.path()).unwrap();
    assert_eq!(set.latest(), Some(2));
    assert_eq!(set.iter().next().unwrap().path, dir.path().join("0001_a.sql"));
}

#[test]
fn runner_applies_versions_in_order() {
    let set = collect_migrations(vec![
        file("0002_pets.sql", "CREATE TABLE pet (id INTEGER);"),
        file("0001_people.sql", "CREATE TABLE person (id INTEGER);"),
    ])
    .unwrap();
    let code = generate_migrations(&set);
    assert!(code.contains("pub const LATEST_VERSION: u32 = 2;"));
    let first = code.find("if current < 1 {").unwrap();
    let second = code.find("if current < 2 {").unwrap();
    assert!(first < second);
    assert!(code.contains("/// people"));
    assert!(code.contains(&set.iter().next().unwrap().checksum));
}

#[test]
fn empty_runner_has_no_steps() {
    let code = generate_migrations(&Default::default());
    assert!(code.contains("pub const LATEST_VERSION: u32 = 0;"));
    assert!(code.contains("pub const MIGRATIONS: &[Migration] = &[\n];"));
    assert!(code.contains("_execute"));
}
