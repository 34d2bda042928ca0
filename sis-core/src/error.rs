use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Spreadsheet codec error: {0}")]
    Codec(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Integrity error for {}: {reason}", path.display())]
    Integrity { path: PathBuf, reason: String },

    #[error("Schema mismatch: missing columns {missing:?}, extra columns {extra:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Sweep incomplete after deleting {deleted} file(s), {freed} byte(s): {source}")]
    PartialSweep {
        deleted: usize,
        freed: u64,
        #[source]
        source: Box<SisError>,
    },

    #[error("Append failed and the store was rolled back: {source}")]
    AppendRolledBack {
        #[source]
        source: Box<SisError>,
        backup: Option<PathBuf>,
    },

    #[error("Append failed ({append}) and rollback failed: {rollback}")]
    RollbackFailed {
        append: Box<SisError>,
        rollback: Box<SisError>,
    },
}

/// Coarse taxonomy handed to the outer (HTTP/CLI) layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Integrity,
    SchemaMismatch,
    IoFailure,
    Conflict,
    Cancelled,
}

impl SisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SisError::Io(_) | SisError::Format(_) | SisError::Codec(_) => ErrorKind::IoFailure,
            SisError::NotFound(_) => ErrorKind::NotFound,
            SisError::Validation(_) => ErrorKind::Validation,
            SisError::Integrity { .. } => ErrorKind::Integrity,
            SisError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            SisError::Conflict(_) => ErrorKind::Conflict,
            SisError::Cancelled => ErrorKind::Cancelled,
            SisError::PartialSweep { source, .. } => source.kind(),
            SisError::AppendRolledBack { source, .. } => source.kind(),
            // The store may now be inconsistent; report it as an integrity problem.
            SisError::RollbackFailed { .. } => ErrorKind::Integrity,
        }
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        SisError::NotFound(what.to_string())
    }
}

impl From<csv::Error> for SisError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io) => SisError::Io(io),
                other => SisError::Format(format!("{other:?}")),
            }
        } else {
            SisError::Format(e.to_string())
        }
    }
}

impl From<walkdir::Error> for SisError {
    fn from(e: walkdir::Error) -> Self {
        match e.into_io_error() {
            Some(io) => SisError::Io(io),
            None => SisError::Format("filesystem loop while scanning".into()),
        }
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, SisError>;
