//! Undo log configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UndoError};

/// Environment variable prefix (`ENA_UNDO_MAX_SESSION_AGE_SECS=...`)
pub const ENV_PREFIX: &str = "ENA_UNDO";

/// Settings for an [`UndoManager`](crate::UndoManager)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// JSON history document
    pub history_file: PathBuf,
    /// Flat directory of backup copies
    pub backup_dir: PathBuf,
    /// Sessions older than this are purged by the retention sweeper
    pub max_session_age_secs: u64,
    /// How often the retention sweeper runs
    pub sweep_interval_secs: u64,
    /// Largest create/update pre-image kept inline on the record
    pub max_snapshot_bytes: u64,
    /// Pending events buffered before new ones are dropped
    pub event_queue_capacity: usize,
    /// Per-listener delivery budget
    pub listener_timeout_ms: u64,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            history_file: PathBuf::from("undo_history.json"),
            backup_dir: PathBuf::from(".ena_undo_backups"),
            max_session_age_secs: 7 * 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
            max_snapshot_bytes: 1024 * 1024,
            event_queue_capacity: 256,
            listener_timeout_ms: 5_000,
        }
    }
}

impl UndoConfig {
    /// Defaults with both storage paths placed under `dir`
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let defaults = Self::default();
        Self {
            history_file: dir.join(&defaults.history_file),
            backup_dir: dir.join(&defaults.backup_dir),
            ..defaults
        }
    }

    /// Layer an optional TOML file and `ENA_UNDO_*` variables over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: UndoConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the log unusable
    pub fn validate(&self) -> Result<()> {
        if self.history_file.as_os_str().is_empty() {
            return Err(UndoError::config("history_file cannot be empty"));
        }
        if self.backup_dir.as_os_str().is_empty() {
            return Err(UndoError::config("backup_dir cannot be empty"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(UndoError::config("sweep_interval_secs must be greater than 0"));
        }
        if self.event_queue_capacity == 0 {
            return Err(UndoError::config("event_queue_capacity must be greater than 0"));
        }
        if self.listener_timeout_ms == 0 {
            return Err(UndoError::config("listener_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Maximum session age as a duration
    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs(self.max_session_age_secs)
    }

    /// Retention sweep interval as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Listener timeout as a duration
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }
}
