//! Migration directory inspection: file naming, version uniqueness and
//! checksums for the generated runner.

use crate::error::{Error, Result};
use crate::sql::{lexer, split_statements, tokenize};
use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const VERSION_DIGITS: usize = 4;

const FILE_NAME_PATTERN: &str = r"^(\d+)(_[^.]*)?\.sql$";

#[derive(Debug, Clone, Serialize)]
pub struct MigrationFile {
    pub version: u32,
    pub description: Option<String>,
    pub file_name: String,
    pub path: PathBuf,
    #[serde(skip)]
    pub sql: String,
    /// Statement texts without comments, in file order.
    pub statements: Vec<String>,
    /// Hex SHA-256 of the file contents.
    pub checksum: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationSet {
    pub migrations: BTreeMap<u32, MigrationFile>,
}

impl MigrationSet {
    pub fn latest(&self) -> Option<u32> {
        self.migrations.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Migrations in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationFile> {
        self.migrations.values()
    }
}

struct Candidate {
    file_name: String,
    path: PathBuf,
    sql: String,
    digits: String,
    version: u32,
    description: Option<String>,
}

/// Validate and index migration files given as (path, contents). Files that
/// do not end in `.sql` are ignored.
pub fn collect_migrations<I>(files: I) -> Result<MigrationSet>
where
    I: IntoIterator<Item = (PathBuf, String)>,
{
    let pattern = Regex::new(FILE_NAME_PATTERN).map_err(|e| Error::schema(e.to_string()))?;
    let mut candidates = Vec::new();
    for (path, sql) in files {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }
        let captures = pattern.captures(&file_name).ok_or_else(|| {
            Error::MigrationFileName {
                file: file_name.clone(),
                reason: "expected NNNN.sql or NNNN_description.sql".to_string(),
            }
        })?;
        let digits = captures[1].to_string();
        let version: u32 = digits.parse().map_err(|_| Error::MigrationFileName {
            file: file_name.clone(),
            reason: "version number is too large".to_string(),
        })?;
        let description = captures
            .get(2)
            .map(|m| m.as_str().trim_start_matches('_').to_string())
            .filter(|d| !d.is_empty());
        candidates.push(Candidate {
            file_name,
            path,
            sql,
            digits,
            version,
            description,
        });
    }
    candidates.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let mut seen: BTreeMap<u32, String> = BTreeMap::new();
    for candidate in &candidates {
        if let Some(first) = seen.insert(candidate.version, candidate.file_name.clone()) {
            return Err(Error::DuplicateMigrationVersion {
                version: candidate.version,
                first,
                second: candidate.file_name.clone(),
            });
        }
    }

    for candidate in &candidates {
        if candidate.digits.len() != VERSION_DIGITS {
            return Err(Error::MigrationFileName {
                file: candidate.file_name.clone(),
                reason: format!("version must have exactly {} digits", VERSION_DIGITS),
            });
        }
    }

    let mut set = MigrationSet::default();
    for candidate in candidates {
        let statements = split_statements(tokenize(&candidate.sql)?)
            .iter()
            .map(|chunk| lexer::render_without_comments(chunk))
            .filter(|s| !s.trim().is_empty())
            .collect();
        let checksum = format!("{:x}", Sha256::digest(candidate.sql.as_bytes()));
        debug!(version = candidate.version, file = %candidate.file_name, "migration found");
        set.migrations.insert(
            candidate.version,
            MigrationFile {
                version: candidate.version,
                description: candidate.description,
                file_name: candidate.file_name,
                path: candidate.path,
                sql: candidate.sql,
                statements,
                checksum,
            },
        );
    }
    Ok(set)
}

/// Read and validate every migration in `dir`.
pub fn inspect_migrations(dir: &Path) -> anyhow::Result<MigrationSet> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read migrations directory {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() || path.extension().map(|ext| ext != "sql").unwrap_or(true) {
            continue;
        }
        let sql = fs::read_to_string(&path)
            .with_context(|| format!("failed to read migration {}", path.display()))?;
        files.push((path, sql));
    }
    let set = collect_migrations(files)?;
    info!(count = set.len(), latest = ?set.latest(), "migrations inspected");
    Ok(set)
}
