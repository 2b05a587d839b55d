//! Error types for the undo log

use std::path::PathBuf;

use thiserror::Error;

use ena_common::JsonStoreError;

/// Errors that can occur while tracking or undoing file operations
#[derive(Debug, Error)]
pub enum UndoError {
    /// Read, write, stat or rename failure
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path the failing call was made against
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Undo of a delete/update that has no recorded backup
    #[error("No backup recorded for operation {0}")]
    MissingBackup(String),

    /// A move/rename cannot be reversed because the filesystem no longer matches
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown operation or session id
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation or session was already undone
    #[error("Already undone: {0}")]
    AlreadyUndone(String),

    /// A backup's content no longer matches the checksum recorded at track time
    #[error("Integrity check failed for {path}: expected {expected}, found {actual}")]
    Integrity {
        /// Backup file that failed verification
        path: PathBuf,
        /// Checksum recorded when the operation was tracked
        expected: String,
        /// Checksum of the backup as it is now
        actual: String,
    },

    /// The request itself is malformed (e.g. a move without a destination)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// History document could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(#[from] JsonStoreError),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UndoError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a NotFound error with context
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a Conflict error with context
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an InvalidOperation error with context
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a Config error with context
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<config::ConfigError> for UndoError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, UndoError>;
