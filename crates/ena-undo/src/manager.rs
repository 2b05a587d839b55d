//! Collaborator-facing undo manager
//!
//! One `UndoManager` is built at startup and handed to every caller; clones
//! share the same store, backup directory and listeners.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::backup::BackupStore;
use crate::config::UndoConfig;
use crate::error::{Result, UndoError};
use crate::events::{EventNotifier, ListenerResult, UndoEvent, UndoEventType};
use crate::executor::UndoExecutor;
use crate::models::{HistoryStats, OperationType, UndoSession};
use crate::retention::{RetentionHandle, RetentionSweeper};
use crate::store::SessionStore;
use crate::tracker::OperationTracker;

/// Name given to sessions started implicitly by a track call
pub const AUTO_SESSION_NAME: &str = "Auto session";

/// Tracks file operations and reverses them on request
#[derive(Debug, Clone)]
pub struct UndoManager {
    config: Arc<UndoConfig>,
    store: Arc<SessionStore>,
    backups: BackupStore,
    tracker: OperationTracker,
    executor: UndoExecutor,
    notifier: EventNotifier,
    sweeper: RetentionSweeper,
}

impl UndoManager {
    /// Build a manager, loading any existing history from `config.history_file`
    pub fn open(config: UndoConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(SessionStore::open(&config.history_file)?);
        let backups = BackupStore::new(&config.backup_dir);
        let notifier = EventNotifier::new(config.event_queue_capacity, config.listener_timeout());
        let sweeper = RetentionSweeper::new(
            Arc::clone(&store),
            backups.clone(),
            notifier.clone(),
            config.max_session_age(),
            config.sweep_interval(),
        );

        info!(
            history = %config.history_file.display(),
            backups = %config.backup_dir.display(),
            "Undo manager ready"
        );

        Ok(Self {
            tracker: OperationTracker::new(backups.clone(), config.max_snapshot_bytes),
            executor: UndoExecutor::new(backups.clone()),
            backups,
            config: Arc::new(config),
            store,
            notifier,
            sweeper,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &UndoConfig {
        &self.config
    }

    /// Start a new session and make it current, replacing any current one
    pub async fn start_session(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<UndoSession> {
        let session = UndoSession::new(name, description);
        let previous = self.store.insert_current(session.clone());
        if let Err(e) = self.store.persist().await {
            error!(session_id = %session.id, error = %e, "Failed to persist new session, discarding it");
            self.store.rollback_current(&session.id, previous);
            return Err(e);
        }

        info!(session_id = %session.id, name = %session.name, "Started undo session");
        self.notifier.publish(
            UndoEvent::new(UndoEventType::SessionCreated)
                .with_session(&session.id)
                .with_data(json!({ "name": session.name, "implicit": false })),
        );
        Ok(session)
    }

    /// Stop appending to the current session
    pub fn end_session(&self) {
        if let Some(id) = self.store.clear_current() {
            debug!(session_id = %id, "Ended undo session");
        }
    }

    /// The session new operations are appended to, if any
    pub fn current_session(&self) -> Option<UndoSession> {
        self.store.current_id().and_then(|id| self.store.get(&id))
    }

    /// Record the pre-image of an operation the caller is about to perform
    ///
    /// Must be called before the filesystem is mutated. Starts an implicit
    /// session when none is current.
    ///
    /// # Returns
    ///
    /// The new operation's id
    pub async fn track_operation(
        &self,
        op_type: OperationType,
        original_path: impl AsRef<Path>,
        new_path: Option<&Path>,
    ) -> Result<String> {
        let mut op = self
            .tracker
            .capture(op_type, original_path.as_ref(), new_path)
            .await?;
        let op_id = op.id.clone();
        let backup = op.backup_path.clone();
        let path = op.original_path.clone();

        // Appends to an existing session hold its lock until persisted, so a
        // session undo never misses an operation added while it runs.
        let (session_id, created, _guard) = loop {
            let expected = self.store.live_current_id();
            let guard = match &expected {
                Some(id) => match self.store.session_lock(id) {
                    Some(lock) => Some(lock.lock_owned().await),
                    None => continue,
                },
                None => None,
            };
            match self.store.append_if_current(expected.as_deref(), op, auto_session) {
                Ok((id, created)) => break (id, created, guard),
                Err(returned) => op = returned,
            }
        };

        if let Err(e) = self.store.persist().await {
            error!(op_id = %op_id, error = %e, "Failed to persist tracked operation, discarding it");
            self.store.discard_operation(&session_id, &op_id);
            if created {
                // Concurrent tracks may already have joined the new session.
                self.store.remove_session_if_empty(&session_id);
            }
            if let Some(backup) = backup {
                self.backups.remove_backup(&backup).await;
            }
            return Err(e);
        }

        if created {
            info!(session_id = %session_id, "Started implicit undo session");
            self.notifier.publish(
                UndoEvent::new(UndoEventType::SessionCreated)
                    .with_session(&session_id)
                    .with_data(json!({ "name": AUTO_SESSION_NAME, "implicit": true })),
            );
        }

        info!(
            session_id = %session_id,
            op_id = %op_id,
            op_type = %op_type,
            path = %path.display(),
            "Tracked operation"
        );
        self.notifier.publish(
            UndoEvent::new(UndoEventType::OperationTracked)
                .with_session(&session_id)
                .with_operation(&op_id)
                .with_data(json!({ "type": op_type, "path": path })),
        );

        Ok(op_id)
    }

    /// Reverse a single operation
    ///
    /// Fails with `AlreadyUndone` without touching the filesystem if the
    /// operation was reversed before.
    pub async fn undo_operation(&self, op_id: &str) -> Result<()> {
        let (session_id, _) = self
            .store
            .find_operation(op_id)
            .ok_or_else(|| UndoError::not_found(format!("operation {}", op_id)))?;

        let lock = self
            .store
            .session_lock(&session_id)
            .ok_or_else(|| UndoError::not_found(format!("operation {}", op_id)))?;
        let _guard = lock.lock().await;

        self.undo_locked(&session_id, op_id).await?;
        self.store.persist().await
    }

    /// Reverse every operation of a session, newest first
    ///
    /// Best-effort: stops at the first failure and returns it, leaving the
    /// operations reversed so far marked undone. Operations already undone
    /// individually are skipped.
    pub async fn undo_session(&self, session_id: &str) -> Result<()> {
        let lock = self
            .store
            .session_lock(session_id)
            .ok_or_else(|| UndoError::not_found(format!("session {}", session_id)))?;
        let _guard = lock.lock().await;

        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| UndoError::not_found(format!("session {}", session_id)))?;
        if session.undone {
            return Err(UndoError::AlreadyUndone(format!("session {}", session_id)));
        }

        for op in session.operations.iter().rev().filter(|op| !op.undone) {
            if let Err(e) = self.undo_locked(session_id, &op.id).await {
                warn!(
                    session_id = %session_id,
                    op_id = %op.id,
                    error = %e,
                    "Session undo stopped at failing operation"
                );
                if let Err(persist_err) = self.store.persist().await {
                    error!(error = %persist_err, "Failed to persist partial session undo");
                }
                return Err(e);
            }
        }

        let now = Utc::now();
        self.store.update_session(session_id, |s| {
            s.undone = true;
            s.undone_at = Some(now);
        })?;
        if self.store.clear_current_if(session_id) {
            debug!(session_id = %session_id, "Undone session is no longer current");
        }
        self.store.persist().await?;

        info!(
            session_id = %session_id,
            operations = session.operations.len(),
            "Undid session"
        );
        self.notifier.publish(UndoEvent::new(UndoEventType::SessionUndone).with_session(session_id));
        Ok(())
    }

    /// Reverse one operation; the caller holds the session lock
    async fn undo_locked(&self, session_id: &str, op_id: &str) -> Result<()> {
        let op = self
            .store
            .get(session_id)
            .and_then(|s| s.operation(op_id).cloned())
            .ok_or_else(|| UndoError::not_found(format!("operation {}", op_id)))?;

        if op.undone {
            return Err(UndoError::AlreadyUndone(format!("operation {}", op_id)));
        }

        if let Err(e) = self.executor.reverse(&op).await {
            error!(op_id = %op_id, op_type = %op.op_type, error = %e, "Undo failed");
            return Err(e);
        }

        let now = Utc::now();
        self.store.update_session(session_id, |s| {
            if let Some(op) = s.operation_mut(op_id) {
                op.mark_undone(now);
            }
        })?;

        self.notifier.publish(
            UndoEvent::new(UndoEventType::OperationUndone)
                .with_session(session_id)
                .with_operation(op_id),
        );
        Ok(())
    }

    /// All sessions, oldest first
    pub fn get_history(&self) -> Vec<UndoSession> {
        self.store.list()
    }

    /// One session by id
    pub fn get_session(&self, session_id: &str) -> Result<UndoSession> {
        self.store
            .get(session_id)
            .ok_or_else(|| UndoError::not_found(format!("session {}", session_id)))
    }

    /// Purge sessions created more than `older_than` ago, with their backups
    ///
    /// # Returns
    ///
    /// Number of sessions removed
    pub async fn clear_history(&self, older_than: Duration) -> Result<usize> {
        self.sweeper.purge_older_than(older_than).await
    }

    /// Register an async listener for one event type
    pub fn add_event_callback<F, Fut>(&self, event_type: UndoEventType, callback: F)
    where
        F: Fn(UndoEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.notifier.add_listener(event_type, callback);
    }

    /// Wait until all events published so far reached their listeners
    pub async fn flush_events(&self) {
        self.notifier.flush().await;
    }

    /// Spawn the periodic retention sweep
    pub fn start_retention(&self) -> RetentionHandle {
        self.sweeper.start()
    }

    /// Aggregate counts over the current history
    pub fn stats(&self) -> HistoryStats {
        self.store.stats()
    }
}

fn auto_session() -> UndoSession {
    UndoSession::new(
        AUTO_SESSION_NAME,
        "Started automatically by the first tracked operation",
    )
}
