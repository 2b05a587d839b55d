//! Pre-image capture for operations about to be performed

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::backup::{BackupStore, FileMeta};
use crate::error::{Result, UndoError};
use crate::models::{OperationType, UndoOperation};
use crate::verifier::ChecksumVerifier;

/// Builds [`UndoOperation`] records from the current on-disk state
#[derive(Debug, Clone)]
pub struct OperationTracker {
    backups: BackupStore,
    max_snapshot_bytes: u64,
}

impl OperationTracker {
    /// Create a tracker writing backups to `backups`
    pub fn new(backups: BackupStore, max_snapshot_bytes: u64) -> Self {
        Self {
            backups,
            max_snapshot_bytes,
        }
    }

    /// Capture everything needed to reverse `op_type` on `original_path`
    ///
    /// Must run before the caller mutates the file. On error nothing is left
    /// behind: a backup made before a later step failed is removed again.
    pub async fn capture(
        &self,
        op_type: OperationType,
        original_path: &Path,
        new_path: Option<&Path>,
    ) -> Result<UndoOperation> {
        if original_path.as_os_str().is_empty() {
            return Err(UndoError::invalid("original path cannot be empty"));
        }

        let new_path = match (op_type.requires_destination(), new_path) {
            (true, Some(p)) if !p.as_os_str().is_empty() => Some(p.to_path_buf()),
            (true, _) => {
                return Err(UndoError::invalid(format!(
                    "{} requires a destination path",
                    op_type
                )))
            }
            (false, _) => None,
        };

        let mut op = UndoOperation::new(op_type, original_path.to_path_buf(), new_path);

        if op_type.requires_backup() {
            let record = self.backups.create_backup(original_path).await?;
            apply_meta(&mut op, &record.meta);
            op.checksum = Some(record.checksum);
            op.backup_path = Some(record.backup_path);
        } else if let Some(meta) = self.optional_meta(op_type, original_path).await? {
            apply_meta(&mut op, &meta);
        }

        if op_type.captures_snapshot() {
            if let Err(e) = self.capture_snapshot(&mut op).await {
                if let Some(backup) = &op.backup_path {
                    self.backups.remove_backup(backup).await;
                }
                return Err(e);
            }
        }

        debug!(
            op_id = %op.id,
            op_type = %op.op_type,
            path = %op.original_path.display(),
            backup = op.backup_path.is_some(),
            snapshot = op.content_snapshot.is_some(),
            "Captured pre-image"
        );
        Ok(op)
    }

    /// Metadata for types that don't need a backup
    ///
    /// A create target usually does not exist yet; copy and rename sources
    /// only contribute metadata when readable.
    async fn optional_meta(&self, op_type: OperationType, path: &Path) -> Result<Option<FileMeta>> {
        match BackupStore::file_meta(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(UndoError::Io { source, .. })
                if op_type == OperationType::Create
                    && source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(_) if op_type != OperationType::Create => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn capture_snapshot(&self, op: &mut UndoOperation) -> Result<()> {
        let path: PathBuf = match &op.backup_path {
            Some(backup) => backup.clone(),
            // Create target does not exist yet.
            None if op.permissions.is_none() => return Ok(()),
            None => op.original_path.clone(),
        };

        if op.size > self.max_snapshot_bytes {
            debug!(
                op_id = %op.id,
                size = op.size,
                limit = self.max_snapshot_bytes,
                "Pre-image too large for inline snapshot"
            );
            return Ok(());
        }

        let content = fs::read(&path).await.map_err(|e| UndoError::io(&path, e))?;
        if content.len() as u64 > self.max_snapshot_bytes {
            return Ok(());
        }
        if op.checksum.is_none() {
            op.checksum = Some(ChecksumVerifier::hash_bytes(&content));
        }
        op.content_snapshot = Some(content);
        Ok(())
    }
}

fn apply_meta(op: &mut UndoOperation, meta: &FileMeta) {
    op.size = meta.size;
    op.permissions = Some(meta.permissions);
    op.mod_time = meta.mod_time;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker(dir: &TempDir, limit: u64) -> OperationTracker {
        OperationTracker::new(BackupStore::new(dir.path().join("backups")), limit)
    }

    #[tokio::test]
    async fn test_delete_capture_makes_backup_and_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").await.unwrap();

        let op = tracker(&dir, 1024)
            .capture(OperationType::Delete, &path, None)
            .await
            .unwrap();

        let backup = op.backup_path.clone().unwrap();
        assert_eq!(fs::read_to_string(&backup).await.unwrap(), "hello");
        assert_eq!(
            op.checksum.as_deref(),
            Some(ChecksumVerifier::hash_bytes(b"hello").as_str())
        );
        assert_eq!(op.size, 5);
        assert!(op.content_snapshot.is_none());
    }

    #[tokio::test]
    async fn test_update_capture_keeps_snapshot_and_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.md");
        fs::write(&path, "v1").await.unwrap();

        let op = tracker(&dir, 1024)
            .capture(OperationType::Update, &path, None)
            .await
            .unwrap();

        assert!(op.backup_path.is_some());
        assert_eq!(op.content_snapshot.as_deref(), Some(&b"v1"[..]));
    }

    #[tokio::test]
    async fn test_snapshot_respects_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        fs::write(&path, vec![7u8; 64]).await.unwrap();

        let op = tracker(&dir, 16)
            .capture(OperationType::Update, &path, None)
            .await
            .unwrap();

        assert!(op.content_snapshot.is_none());
        assert!(op.backup_path.is_some());
    }

    #[tokio::test]
    async fn test_create_of_missing_file_has_no_preimage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.txt");

        let op = tracker(&dir, 1024)
            .capture(OperationType::Create, &path, None)
            .await
            .unwrap();

        assert!(op.backup_path.is_none());
        assert!(op.content_snapshot.is_none());
        assert!(op.checksum.is_none());
    }

    #[tokio::test]
    async fn test_move_requires_destination() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "x").await.unwrap();

        let result = tracker(&dir, 1024)
            .capture(OperationType::Move, &path, None)
            .await;

        assert!(matches!(result, Err(UndoError::InvalidOperation(_))));
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_delete_of_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result = tracker(&dir, 1024)
            .capture(OperationType::Delete, &dir.path().join("ghost"), None)
            .await;
        assert!(matches!(result, Err(UndoError::Io { .. })));
    }
}
