#![warn(missing_docs)]

//! Undo log for destructive file operations
//!
//! Callers announce an operation before performing it; the log captures a
//! pre-image (backup copy, metadata, checksum, small inline snapshot) and can
//! later reverse the operation, or a whole session of them, newest first.
//! History is mirrored to a JSON document and aged sessions are purged
//! together with their backups.

pub mod backup;
pub mod config;
pub mod di;
pub mod error;
pub mod events;
pub mod executor;
pub mod manager;
pub mod models;
pub mod retention;
pub mod store;
pub mod tracker;
pub mod verifier;

// Re-export public API
pub use backup::{BackupRecord, BackupStore, FileMeta};
pub use config::UndoConfig;
pub use error::{Result, UndoError};
pub use events::{EventNotifier, ListenerResult, UndoEvent, UndoEventType};
pub use manager::UndoManager;
pub use models::{HistoryDocument, HistoryStats, OperationType, UndoOperation, UndoSession};
pub use retention::{RetentionHandle, RetentionSweeper};
pub use verifier::ChecksumVerifier;
