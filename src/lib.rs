pub mod annotations;
pub mod codegen;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod migrations;
pub mod overrides;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod shared;
pub mod sql;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{
    process_query_file, process_statement, process_statement_text, AnalysisContext,
    AnnotatedField, AnnotatedStatement, Parameter, StatementKind,
};
pub use schema::SchemaCatalog;
pub use shared::{SharedResult, SharedResultManager};

use anyhow::Context;
use migrations::MigrationSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use types::TypeMapper;

/// Namespace used for query files placed directly in the queries directory.
pub const DEFAULT_NAMESPACE: &str = "default";

/// `.sql` files directly inside `dir`, in lexical order.
fn sql_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to read an entry of {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().map(|ext| ext == "sql").unwrap_or(false) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Load every CREATE TABLE and CREATE VIEW of the `.sql` files in `dir`.
pub fn load_schema(dir: &Path) -> anyhow::Result<SchemaCatalog> {
    let mut statements = Vec::new();
    for path in sql_files(dir)? {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read schema file {}", path.display()))?;
        let parsed = sql::parse_file(&text)
            .with_context(|| format!("failed to parse schema file {}", path.display()))?;
        debug!(file = %path.display(), statements = parsed.len(), "schema file loaded");
        statements.extend(parsed);
    }
    Ok(SchemaCatalog::from_statements(statements)?)
}

/// Build the catalog from the CREATE statements of the migrations, applied
/// in version order.
pub fn schema_from_migrations(migrations: &MigrationSet) -> anyhow::Result<SchemaCatalog> {
    let mut statements = Vec::new();
    for migration in migrations.iter() {
        let parsed = sql::parse_file(&migration.sql)
            .with_context(|| format!("failed to parse migration {}", migration.file_name))?;
        statements.extend(parsed);
    }
    Ok(SchemaCatalog::from_statements(statements)?)
}

/// Everything known after analysing a project.
#[derive(Debug, Serialize)]
pub struct AnalyzedProject {
    pub catalog: SchemaCatalog,
    pub namespaces: BTreeMap<String, Vec<AnnotatedStatement>>,
    pub shared: SharedResultManager,
    pub migrations: MigrationSet,
}

impl AnalyzedProject {
    pub fn statements(&self) -> impl Iterator<Item = &AnnotatedStatement> {
        self.namespaces.values().flatten()
    }

    pub fn statement(&self, namespace: &str, name: &str) -> Option<&AnnotatedStatement> {
        self.namespaces
            .get(namespace)?
            .iter()
            .find(|s| s.name == name)
    }
}

/// Load the schema, process every query file and inspect the migrations.
///
/// Namespaces are the subdirectories of the queries directory, processed in
/// lexical order like the files inside them.
pub fn analyze_project(config: &Config) -> anyhow::Result<AnalyzedProject> {
    let migrations_dir = config.migrations_dir();
    let migrations = if migrations_dir.is_dir() {
        migrations::inspect_migrations(&migrations_dir)?
    } else {
        MigrationSet::default()
    };

    let schema_dir = config.schema_dir();
    let catalog = if schema_dir.is_dir() {
        load_schema(&schema_dir)?
    } else {
        schema_from_migrations(&migrations)?
    };
    info!(
        tables = catalog.tables().count(),
        views = catalog.views().count(),
        "schema loaded"
    );

    let ctx = AnalysisContext::new(catalog, TypeMapper::with_overrides(config.types.iter()));
    let mut namespaces: BTreeMap<String, Vec<AnnotatedStatement>> = BTreeMap::new();
    let mut shared = SharedResultManager::new();

    let queries_dir = config.queries_dir();
    if queries_dir.is_dir() {
        let mut groups: Vec<(String, PathBuf)> = Vec::new();
        let root_files = sql_files(&queries_dir)?;
        if !root_files.is_empty() {
            groups.push((DEFAULT_NAMESPACE.to_string(), queries_dir.clone()));
        }
        let mut dirs: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&queries_dir)
            .with_context(|| format!("failed to read directory {}", queries_dir.display()))?
        {
            let path = entry
                .with_context(|| format!("failed to read an entry of {}", queries_dir.display()))?
                .path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        for dir in dirs {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("non-UTF8 path: {}", dir.display()))?
                .to_string();
            groups.push((name, dir));
        }

        for (namespace, dir) in groups {
            let mut statements = Vec::new();
            for path in sql_files(&dir)? {
                let statement = process_query_file(&ctx, &path, &namespace)?;
                if statement.query_result().is_some() {
                    shared
                        .register_shared_result(&statement, &namespace)
                        .with_context(|| format!("failed to register {}", path.display()))?;
                }
                statements.push(statement);
            }
            info!(namespace = %namespace, statements = statements.len(), "namespace processed");
            namespaces.entry(namespace).or_default().extend(statements);
        }
    }

    Ok(AnalyzedProject {
        catalog: ctx.catalog,
        namespaces,
        shared,
        migrations,
    })
}
