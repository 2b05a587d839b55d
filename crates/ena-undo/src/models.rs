//! Undo records: operations, sessions and the persisted history document

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UndoError;

/// Current layout version of the history document
pub const HISTORY_VERSION: u32 = 1;

/// Kind of file mutation being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A file is about to be created
    Create,
    /// A file is about to be deleted
    Delete,
    /// A file's content is about to be overwritten
    Update,
    /// A file is about to be moved to `new_path`
    Move,
    /// A file is about to be copied to `new_path`
    Copy,
    /// A file is about to be renamed to `new_path`
    Rename,
}

impl OperationType {
    /// Types whose reversal needs the pre-image bytes on disk
    pub fn requires_backup(self) -> bool {
        matches!(self, Self::Delete | Self::Update | Self::Move)
    }

    /// Types that involve a second path
    pub fn requires_destination(self) -> bool {
        matches!(self, Self::Move | Self::Copy | Self::Rename)
    }

    /// Types whose content is also kept inline on the record
    pub fn captures_snapshot(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Update => "update",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UndoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            "update" => Ok(Self::Update),
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            "rename" => Ok(Self::Rename),
            other => Err(UndoError::invalid(format!("unknown operation type '{}'", other))),
        }
    }
}

/// A single tracked file mutation with the pre-image needed to reverse it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoOperation {
    /// Unique identifier
    pub id: String,
    /// What kind of mutation was tracked
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// When the operation was tracked
    pub timestamp: DateTime<Utc>,
    /// Path the mutation starts from
    pub original_path: PathBuf,
    /// Copy of the pre-image in the backup directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    /// Destination for move/copy/rename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<PathBuf>,
    /// Inline pre-image for create/update, bounded by configuration
    #[serde(default, skip_serializing_if = "Option::is_none", with = "snapshot_base64")]
    pub content_snapshot: Option<Vec<u8>>,
    /// Size in bytes before the mutation
    pub size: u64,
    /// Permission bits before the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
    /// Modification time before the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the content before the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Set once the operation has been reversed; never cleared
    pub undone: bool,
    /// When the operation was reversed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undone_at: Option<DateTime<Utc>>,
}

impl UndoOperation {
    /// A bare record with a fresh id and timestamp; pre-image fields are filled by the tracker
    pub fn new(op_type: OperationType, original_path: PathBuf, new_path: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            timestamp: Utc::now(),
            original_path,
            backup_path: None,
            new_path,
            content_snapshot: None,
            size: 0,
            permissions: None,
            mod_time: None,
            checksum: None,
            undone: false,
            undone_at: None,
        }
    }

    /// Record the reversal; a no-op on an already-undone record
    pub fn mark_undone(&mut self, at: DateTime<Utc>) {
        if !self.undone {
            self.undone = true;
            self.undone_at = Some(at);
        }
    }
}

impl fmt::Display for UndoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.op_type,
            self.original_path.display()
        )?;
        if let Some(new_path) = &self.new_path {
            write!(f, " -> {}", new_path.display())?;
        }
        if self.undone {
            f.write_str(" (undone)")?;
        }
        Ok(())
    }
}

/// A named, ordered group of operations undone together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoSession {
    /// Unique identifier
    pub id: String,
    /// Short label shown to the user
    pub name: String,
    /// Longer free-form description
    #[serde(default)]
    pub description: String,
    /// Operations in tracking order
    pub operations: Vec<UndoOperation>,
    /// When the session was started
    pub created_at: DateTime<Utc>,
    /// Set once every operation was reversed through a session undo
    pub undone: bool,
    /// When the session was undone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undone_at: Option<DateTime<Utc>>,
}

impl UndoSession {
    /// Create an empty session
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            operations: Vec::new(),
            created_at: Utc::now(),
            undone: false,
            undone_at: None,
        }
    }

    /// Look up an operation by id
    pub fn operation(&self, op_id: &str) -> Option<&UndoOperation> {
        self.operations.iter().find(|op| op.id == op_id)
    }

    /// Mutable lookup of an operation by id
    pub fn operation_mut(&mut self, op_id: &str) -> Option<&mut UndoOperation> {
        self.operations.iter_mut().find(|op| op.id == op_id)
    }

    /// Backup files owned by this session's operations
    pub fn backup_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.operations.iter().filter_map(|op| op.backup_path.as_ref())
    }

    /// Whether the session was created before `cutoff`
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}

/// The on-disk history document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    /// All sessions, oldest first
    pub sessions: Vec<UndoSession>,
    /// Layout version
    pub version: u32,
    /// Last save time
    pub updated: DateTime<Utc>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            version: HISTORY_VERSION,
            updated: Utc::now(),
        }
    }
}

/// Aggregate counts over the current history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    /// Number of sessions
    pub sessions: usize,
    /// Number of operations across all sessions
    pub operations: usize,
    /// Operations already undone
    pub undone_operations: usize,
    /// Total size of pre-images held as disk backups
    pub backup_bytes: u64,
}

mod snapshot_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
