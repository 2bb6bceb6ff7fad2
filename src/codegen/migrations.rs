use super::models::raw_string_literal;
use crate::migrations::MigrationSet;

/// Runner module: one function per version and a dispatch applying every
/// version newer than the database's.
pub fn generate_migrations(set: &MigrationSet) -> String {
    let mut out = String::new();
    out.push_str("//! Schema migrations. Generated by rowgen; do not edit.\n\n");

    out.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq)]\n");
    out.push_str("pub struct Migration {\n");
    out.push_str("    pub version: u32,\n");
    out.push_str("    pub file_name: &'static str,\n");
    out.push_str("    /// SHA-256 of the migration file, to detect edits after release.\n");
    out.push_str("    pub checksum: &'static str,\n");
    out.push_str("    pub statements: &'static [&'static str],\n");
    out.push_str("}\n\n");

    out.push_str(&format!(
        "pub const LATEST_VERSION: u32 = {};\n\n",
        set.latest().unwrap_or(0)
    ));

    for migration in set.iter() {
        out.push_str(&format!(
            "const MIGRATION_{:04}: &[&str] = &[\n",
            migration.version
        ));
        for statement in &migration.statements {
            out.push_str(&format!("    {},\n", raw_string_literal(statement)));
        }
        out.push_str("];\n\n");
    }

    out.push_str("pub const MIGRATIONS: &[Migration] = &[\n");
    for migration in set.iter() {
        out.push_str(&format!(
            "    Migration {{ version: {}, file_name: \"{}\", checksum: \"{}\", statements: MIGRATION_{:04} }},\n",
            migration.version, migration.file_name, migration.checksum, migration.version
        ));
    }
    out.push_str("];\n\n");

    for migration in set.iter() {
        if let Some(description) = &migration.description {
            out.push_str(&format!("/// {}\n", description));
        }
        out.push_str(&format!(
            "pub fn migration_{:04}<E>(execute: &mut impl FnMut(&str) -> Result<(), E>) -> Result<(), E> {{\n",
            migration.version
        ));
        out.push_str(&format!(
            "    for &statement in MIGRATION_{:04} {{\n        execute(statement)?;\n    }}\n    Ok(())\n}}\n\n",
            migration.version
        ));
    }

    out.push_str("/// Apply every migration newer than `current` in version order and\n");
    out.push_str("/// return the resulting version.\n");
    if set.is_empty() {
        out.push_str("pub fn migrate<E>(current: u32, _execute: impl FnMut(&str) -> Result<(), E>) -> Result<u32, E> {\n");
    } else {
        out.push_str("pub fn migrate<E>(current: u32, mut execute: impl FnMut(&str) -> Result<(), E>) -> Result<u32, E> {\n");
    }
    for migration in set.iter() {
        out.push_str(&format!(
            "    if current < {} {{\n        migration_{:04}(&mut execute)?;\n    }}\n",
            migration.version, migration.version
        ));
    }
    out.push_str("    Ok(current.max(LATEST_VERSION))\n}\n");
    out
}
