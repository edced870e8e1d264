//! Error types for tsync-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tsync-core
#[derive(Debug, Error)]
pub enum Error {
    /// Mapping registry missing, malformed, or ambiguous
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A target resource is already part of an open transaction
    #[error("resource '{path}' is locked by transaction {txn_id}")]
    ResourceLocked { path: PathBuf, txn_id: uuid::Uuid },

    /// A conflict policy decision could not be made
    #[error("policy error for key '{key}': {message}")]
    Policy { key: String, message: String },

    /// An underlying write failed mid-transaction
    #[error("write to '{path}' failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pre-write backup of a resource could not be captured
    #[error("backup of '{path}' failed: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rollback itself partially failed; the resource may be in neither
    /// its old nor its new state. Never downgraded to an ordinary failure.
    #[error("restore of {failed} resource(s) failed during rollback of transaction {txn_id}")]
    Restore {
        txn_id: uuid::Uuid,
        failed: usize,
        details: Vec<String>,
    },

    /// Cooperative cancellation was observed
    #[error("sync cancelled")]
    Cancelled,

    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing error from the csv crate
    #[error("CSV error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Table not found in the mapping registry
    #[error("no mapping found for table '{0}'")]
    MappingNotFound(String),

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is the data-safety alarm raised when a rollback
    /// could not fully restore the pre-transaction state.
    pub fn is_data_safety_alarm(&self) -> bool {
        matches!(self, Error::Restore { .. })
    }
}
