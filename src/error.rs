use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Validation failures raised while analysing SQL sources.
///
/// Every variant aborts generation; the only recoverable situation (an
/// annotation lookup that finds nothing) is modelled as `None` by the
/// resolver and never reaches this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid annotation: {0}")]
    Annotation(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error(
        "statement `{statement}` returns column `{alias}` more than once; alias one of the columns"
    )]
    DuplicateColumn { statement: String, alias: String },

    #[error("statement `{statement}` has an unsupported RETURNING clause: {detail}")]
    UnsupportedReturning { statement: String, detail: String },

    #[error("dynamic field error in `{statement}`: {message}")]
    DynamicField { statement: String, message: String },

    #[error("{0}")]
    SharedResultConflict(Box<SharedResultConflict>),

    #[error("invalid migration file name `{file}`: {reason}")]
    MigrationFileName { file: String, reason: String },

    #[error("duplicate migration version {version}: `{first}` and `{second}`")]
    DuplicateMigrationVersion {
        version: u32,
        first: String,
        second: String,
    },
}

impl Error {
    pub(crate) fn annotation(msg: impl Into<String>) -> Self {
        Error::Annotation(msg.into())
    }

    pub(crate) fn sql(msg: impl Into<String>) -> Self {
        Error::Sql(msg.into())
    }

    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }
}

/// One side of a shared result conflict.
#[derive(Debug, Clone)]
pub struct ConflictSide {
    pub statement: String,
    pub source_file: PathBuf,
    pub value: String,
}

/// Two statements disagree about the shape of a shared result.
#[derive(Debug, Clone)]
pub struct SharedResultConflict {
    pub result_name: String,
    pub namespace: String,
    pub field: String,
    pub existing: ConflictSide,
    pub incoming: ConflictSide,
}

impl fmt::Display for SharedResultConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shared result `{}` in namespace `{}` has conflicting definitions for field `{}`: \
             statement `{}` ({}) has {} but statement `{}` ({}) has {}",
            self.result_name,
            self.namespace,
            self.field,
            self.existing.statement,
            self.existing.source_file.display(),
            self.existing.value,
            self.incoming.statement,
            self.incoming.source_file.display(),
            self.incoming.value,
        )
    }
}
