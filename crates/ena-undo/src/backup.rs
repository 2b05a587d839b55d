//! Pre-image backups with metadata-preserving restore

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, UndoError};
use crate::verifier::ChecksumVerifier;

static BACKUP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Metadata captured from a file before it is mutated
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    /// Size in bytes
    pub size: u64,
    /// Permission bits
    pub permissions: u32,
    /// Last modification time
    pub mod_time: Option<DateTime<Utc>>,
}

/// Result of copying a file into the backup directory
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    /// Where the copy lives
    pub backup_path: PathBuf,
    /// Hex SHA-256 of the copied bytes
    pub checksum: String,
    /// Metadata of the source at backup time
    pub meta: FileMeta,
}

/// Copies files into a flat private directory and restores them on demand
#[derive(Debug, Clone)]
pub struct BackupStore {
    backup_dir: PathBuf,
    verifier: ChecksumVerifier,
}

impl BackupStore {
    /// Creates a new BackupStore rooted at `backup_dir`
    ///
    /// The directory is created lazily on the first backup.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        BackupStore {
            backup_dir: backup_dir.into(),
            verifier: ChecksumVerifier::new(),
        }
    }

    /// Directory holding the backup copies
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Stat a regular file and return its size, mode and mtime
    pub async fn file_meta(path: &Path) -> Result<FileMeta> {
        let metadata = fs::metadata(path).await.map_err(|e| UndoError::io(path, e))?;
        if !metadata.is_file() {
            return Err(UndoError::invalid(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        Ok(FileMeta {
            size: metadata.len(),
            permissions: mode_of(&metadata.permissions()),
            mod_time: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// Copy `path` into the backup directory, keeping its mode and mtime
    ///
    /// Every call produces a new file; identical content is not deduplicated.
    pub async fn create_backup(&self, path: &Path) -> Result<BackupRecord> {
        let meta = Self::file_meta(path).await?;

        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| UndoError::io(&self.backup_dir, e))?;

        let backup_path = self.backup_dir.join(self.backup_file_name(path));

        fs::copy(path, &backup_path)
            .await
            .map_err(|e| UndoError::io(&backup_path, e))?;

        if let Err(e) = apply_metadata(&backup_path, meta.permissions, meta.mod_time).await {
            let _ = fs::remove_file(&backup_path).await;
            return Err(e);
        }

        let checksum = match self.verifier.hash_file(&backup_path).await {
            Ok((checksum, _)) => checksum,
            Err(e) => {
                let _ = fs::remove_file(&backup_path).await;
                return Err(e);
            }
        };

        debug!(
            source = %path.display(),
            backup = %backup_path.display(),
            size = meta.size,
            "Created backup"
        );

        Ok(BackupRecord {
            backup_path,
            checksum,
            meta,
        })
    }

    /// Write a backup back to `target`, then reapply mode and mtime
    ///
    /// When `expected_checksum` is given the backup is verified first and the
    /// target is left untouched on mismatch.
    pub async fn restore(
        &self,
        backup_path: &Path,
        target: &Path,
        permissions: Option<u32>,
        mod_time: Option<DateTime<Utc>>,
        expected_checksum: Option<&str>,
    ) -> Result<()> {
        if let Some(expected) = expected_checksum {
            self.verifier.verify_file(backup_path, expected).await?;
        }

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| UndoError::io(parent, e))?;
        }

        fs::copy(backup_path, target)
            .await
            .map_err(|e| UndoError::io(target, e))?;

        if let Some(mode) = permissions {
            set_mode(target, mode).await?;
        }
        if let Some(mtime) = mod_time {
            set_mtime(target, mtime)?;
        }

        debug!(
            backup = %backup_path.display(),
            target = %target.display(),
            "Restored backup"
        );
        Ok(())
    }

    /// Delete a backup file, returning whether it was removed
    ///
    /// Failures are logged and swallowed; callers treat removal as best-effort.
    pub async fn remove_backup(&self, backup_path: &Path) -> bool {
        match fs::remove_file(backup_path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    backup = %backup_path.display(),
                    error = %e,
                    "Failed to remove backup"
                );
                false
            }
        }
    }

    fn backup_file_name(&self, source: &Path) -> String {
        let seq = BACKUP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_{:06}_{}.bak",
            Utc::now().format("%Y%m%d_%H%M%S_%f"),
            seq,
            source
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file")
        )
    }
}

impl Default for BackupStore {
    fn default() -> Self {
        Self::new(".ena_undo_backups")
    }
}

async fn apply_metadata(path: &Path, mode: u32, mod_time: Option<DateTime<Utc>>) -> Result<()> {
    set_mode(path, mode).await?;
    if let Some(mtime) = mod_time {
        set_mtime(path, mtime)?;
    }
    Ok(())
}

fn set_mtime(path: &Path, mtime: DateTime<Utc>) -> Result<()> {
    let time = FileTime::from_system_time(SystemTime::from(mtime));
    filetime::set_file_mtime(path, time).map_err(|e| UndoError::io(path, e))
}

#[cfg(unix)]
fn mode_of(permissions: &std::fs::Permissions) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    permissions.mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(permissions: &std::fs::Permissions) -> u32 {
    if permissions.readonly() {
        0o444
    } else {
        0o666
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| UndoError::io(path, e))
}

#[cfg(not(unix))]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut permissions = fs::metadata(path)
        .await
        .map_err(|e| UndoError::io(path, e))?
        .permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, permissions)
        .await
        .map_err(|e| UndoError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixed_mtime() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2021-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_create_backup_copies_bytes_and_hashes() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a.txt");
        fs::write(&file_path, "hello").await.unwrap();

        let store = BackupStore::new(temp_dir.path().join("backups"));
        let record = store.create_backup(&file_path).await.unwrap();

        assert!(record.backup_path.starts_with(store.backup_dir()));
        assert_eq!(fs::read(&record.backup_path).await.unwrap(), b"hello");
        assert_eq!(record.checksum, ChecksumVerifier::hash_bytes(b"hello"));
        assert_eq!(record.meta.size, 5);
    }

    #[tokio::test]
    async fn test_backup_names_never_collide() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("same.txt");
        fs::write(&file_path, "x").await.unwrap();

        let store = BackupStore::new(temp_dir.path().join("backups"));
        let first = store.create_backup(&file_path).await.unwrap();
        let second = store.create_backup(&file_path).await.unwrap();

        assert_ne!(first.backup_path, second.backup_path);
        assert!(first.backup_path.exists());
        assert!(second.backup_path.exists());
    }

    #[tokio::test]
    async fn test_backup_of_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups"));

        let result = store.create_backup(&temp_dir.path().join("ghost.txt")).await;
        assert!(matches!(result, Err(UndoError::Io { .. })));
    }

    #[tokio::test]
    async fn test_restore_reapplies_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a.txt");
        fs::write(&file_path, "original").await.unwrap();
        set_mtime(&file_path, fixed_mtime()).unwrap();

        let store = BackupStore::new(temp_dir.path().join("backups"));
        let record = store.create_backup(&file_path).await.unwrap();
        fs::remove_file(&file_path).await.unwrap();

        store
            .restore(
                &record.backup_path,
                &file_path,
                Some(record.meta.permissions),
                record.meta.mod_time,
                Some(&record.checksum),
            )
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(&file_path).await.unwrap(), "original");
        let restored = BackupStore::file_meta(&file_path).await.unwrap();
        assert_eq!(restored.mod_time, Some(fixed_mtime()));
        assert_eq!(restored.permissions, record.meta.permissions);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restore_reapplies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("script.sh");
        fs::write(&file_path, "#!/bin/sh").await.unwrap();
        fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o750))
            .await
            .unwrap();

        let store = BackupStore::new(temp_dir.path().join("backups"));
        let record = store.create_backup(&file_path).await.unwrap();
        assert_eq!(record.meta.permissions, 0o750);

        fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600))
            .await
            .unwrap();
        store
            .restore(&record.backup_path, &file_path, Some(0o750), None, None)
            .await
            .unwrap();

        let mode = std::fs::metadata(&file_path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o750);
    }

    #[tokio::test]
    async fn test_restore_rejects_tampered_backup() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("a.txt");
        fs::write(&file_path, "hello").await.unwrap();

        let store = BackupStore::new(temp_dir.path().join("backups"));
        let record = store.create_backup(&file_path).await.unwrap();
        fs::write(&record.backup_path, "evil").await.unwrap();
        fs::write(&file_path, "current").await.unwrap();

        let result = store
            .restore(&record.backup_path, &file_path, None, None, Some(&record.checksum))
            .await;

        assert!(matches!(result, Err(UndoError::Integrity { .. })));
        assert_eq!(fs::read_to_string(&file_path).await.unwrap(), "current");
    }

    #[tokio::test]
    async fn test_remove_backup_is_best_effort() {
        let temp_dir = TempDir::new().unwrap();
        let store = BackupStore::new(temp_dir.path().join("backups"));

        assert!(!store.remove_backup(&temp_dir.path().join("nope.bak")).await);
    }
}
