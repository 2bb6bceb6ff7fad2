use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "rowgen.toml";

/// Contents of `rowgen.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    /// SQL type name to Rust type, checked before the affinity rules.
    #[serde(default)]
    pub types: IndexMap<String, String>,
    /// Directory the relative paths are resolved against.
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_schema_dir")]
    pub schema_dir: String,
    #[serde(default = "default_queries_dir")]
    pub queries_dir: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Name of the generated root module.
    #[serde(default = "default_module_name")]
    pub module_name: String,
}

fn default_schema_dir() -> String {
    "schema".into()
}

fn default_queries_dir() -> String {
    "queries".into()
}

fn default_migrations_dir() -> String {
    "migrations".into()
}

fn default_output_dir() -> String {
    "src".into()
}

fn default_module_name() -> String {
    "db".into()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            schema_dir: default_schema_dir(),
            queries_dir: default_queries_dir(),
            migrations_dir: default_migrations_dir(),
            output_dir: default_output_dir(),
            module_name: default_module_name(),
        }
    }
}

impl Config {
    /// Load the config at `path`; a missing file yields the defaults rooted
    /// at the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !path.exists() {
            return Ok(Config {
                root,
                ..Config::default()
            });
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.root = root;
        Ok(config)
    }

    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Config {
            root: root.into(),
            ..Config::default()
        }
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.root.join(&self.project.schema_dir)
    }

    pub fn queries_dir(&self) -> PathBuf {
        self.root.join(&self.project.queries_dir)
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.root.join(&self.project.migrations_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.project.output_dir)
    }
}
