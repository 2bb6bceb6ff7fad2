pub mod migrations;
pub mod models;
pub mod queries;

use crate::config::Config;
use crate::AnalyzedProject;
use anyhow::{Context, Result};
use heck::ToSnakeCase;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the generated migration runner module.
const MIGRATIONS_MODULE: &str = "schema_migrations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the generated module directory.
    pub path: PathBuf,
    pub contents: String,
}

fn module_ident(namespace: &str) -> String {
    models::escape_rust_keyword(&namespace.to_snake_case())
}

/// Render every generated file without touching the filesystem.
pub fn render_project(project: &AnalyzedProject) -> Vec<GeneratedFile> {
    let mut files = Vec::new();
    for (namespace, statements) in &project.namespaces {
        files.push(GeneratedFile {
            path: PathBuf::from(format!("{}.rs", namespace.to_snake_case())),
            contents: queries::generate_namespace(namespace, statements, &project.shared),
        });
    }
    files.push(GeneratedFile {
        path: PathBuf::from(format!("{}.rs", MIGRATIONS_MODULE)),
        contents: migrations::generate_migrations(&project.migrations),
    });
    files.push(GeneratedFile {
        path: PathBuf::from("mod.rs"),
        contents: generate_mod_rs(project),
    });
    files
}

fn generate_mod_rs(project: &AnalyzedProject) -> String {
    let mut out = String::new();
    out.push_str("//! Generated by rowgen; do not edit.\n\n");
    for namespace in project.namespaces.keys() {
        out.push_str(&format!("pub mod {};\n", module_ident(namespace)));
    }
    out.push_str(&format!("pub mod {};\n", MIGRATIONS_MODULE));
    out
}

/// Write the generated module into `out_dir`, or into the configured
/// output directory when `out_dir` is `None`.
pub fn generate_code(
    project: &AnalyzedProject,
    config: &Config,
    out_dir: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let module_dir = match out_dir {
        Some(dir) => dir.join(&config.project.module_name),
        None => config.output_dir().join(&config.project.module_name),
    };
    fs::create_dir_all(&module_dir)
        .with_context(|| format!("failed to create {}", module_dir.display()))?;

    let mut written = Vec::new();
    for file in render_project(project) {
        let path = module_dir.join(&file.path);
        fs::write(&path, file.contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    info!(files = written.len(), dir = %module_dir.display(), "code generated");
    Ok(written)
}
