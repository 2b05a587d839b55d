//! Per-type reversal of tracked operations

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::backup::BackupStore;
use crate::error::{Result, UndoError};
use crate::models::{OperationType, UndoOperation};

/// Applies the reversal for a single operation record
///
/// | Tracked        | Reversal                                   |
/// |----------------|--------------------------------------------|
/// | create         | delete `original_path`                     |
/// | delete, update | restore the verified backup to `original_path` |
/// | move, rename   | rename `new_path` back to `original_path`  |
/// | copy           | delete `new_path`                          |
///
/// The executor never touches the `undone` flag; the caller records the
/// outcome once the reversal succeeded.
#[derive(Debug, Clone)]
pub struct UndoExecutor {
    backups: BackupStore,
}

impl UndoExecutor {
    /// Create an executor restoring from `backups`
    pub fn new(backups: BackupStore) -> Self {
        Self { backups }
    }

    /// Reverse `op` on the filesystem
    pub async fn reverse(&self, op: &UndoOperation) -> Result<()> {
        if op.undone {
            return Err(UndoError::AlreadyUndone(format!("operation {}", op.id)));
        }

        match op.op_type {
            OperationType::Create => remove(&op.original_path).await?,
            OperationType::Delete | OperationType::Update => self.restore(op).await?,
            OperationType::Move | OperationType::Rename => move_back(op).await?,
            OperationType::Copy => {
                let copy = op.new_path.as_deref().ok_or_else(|| {
                    UndoError::invalid(format!("copy {} has no destination recorded", op.id))
                })?;
                remove(copy).await?
            }
        }

        info!(
            op_id = %op.id,
            op_type = %op.op_type,
            path = %op.original_path.display(),
            "Reversed operation"
        );
        Ok(())
    }

    async fn restore(&self, op: &UndoOperation) -> Result<()> {
        let backup = op
            .backup_path
            .as_deref()
            .ok_or_else(|| UndoError::MissingBackup(op.id.clone()))?;

        self.backups
            .restore(
                backup,
                &op.original_path,
                op.permissions,
                op.mod_time,
                op.checksum.as_deref(),
            )
            .await
    }
}

async fn remove(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| UndoError::io(path, e))?;
    debug!(path = %path.display(), "Removed file");
    Ok(())
}

async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

async fn move_back(op: &UndoOperation) -> Result<()> {
    let moved_to = op.new_path.as_deref().ok_or_else(|| {
        UndoError::conflict(format!("{} {} has no destination recorded", op.op_type, op.id))
    })?;

    if !exists(moved_to).await {
        return Err(UndoError::conflict(format!(
            "{} no longer exists",
            moved_to.display()
        )));
    }
    // Never overwrite whatever took the file's old place.
    if exists(&op.original_path).await {
        return Err(UndoError::conflict(format!(
            "{} is occupied",
            op.original_path.display()
        )));
    }

    if let Some(parent) = op
        .original_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| UndoError::io(parent, e))?;
    }

    fs::rename(moved_to, &op.original_path)
        .await
        .map_err(|e| UndoError::io(moved_to, e))
}
