use std::path::PathBuf;
use thiserror::Error;

/// Result alias for library-level failures.
pub type FlowvetResult<T> = Result<T, FlowvetError>;

/// Structured error type for the verification pipeline.
///
/// Only unrecoverable input problems surface here. Oracle trouble, unreadable
/// source files and malformed locations are absorbed where they happen.
#[derive(Debug, Error)]
pub enum FlowvetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed report {path}: {reason}")]
    Report { path: PathBuf, reason: String },

    #[error("malformed declaration table {path}: {reason}")]
    DeclarationTable { path: PathBuf, reason: String },

    #[error("cache store error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("unsupported cache schema version {found}; expected {expected}")]
    CacheSchema { found: i64, expected: i64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FlowvetError {
    pub fn report(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Report { path: path.into(), reason: reason.into() }
    }

    pub fn declaration_table(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DeclarationTable { path: path.into(), reason: reason.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
