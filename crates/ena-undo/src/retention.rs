//! Retention sweep of aged sessions

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::backup::BackupStore;
use crate::error::Result;
use crate::events::{EventNotifier, UndoEvent, UndoEventType};
use crate::store::SessionStore;

/// Purges sessions past a maximum age together with their backup files
///
/// Purge is unconditional: a session loses its rollback capability once it
/// ages out, whether or not it was ever undone.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: Arc<SessionStore>,
    backups: BackupStore,
    notifier: EventNotifier,
    max_age: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    /// Create a sweeper; nothing runs until [`start`](Self::start)
    pub fn new(
        store: Arc<SessionStore>,
        backups: BackupStore,
        notifier: EventNotifier,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            backups,
            notifier,
            max_age,
            interval,
        }
    }

    /// Remove every session created more than `older_than` ago
    ///
    /// Backup deletion is best-effort: a file that cannot be removed is
    /// logged and left behind, never retried.
    ///
    /// # Returns
    ///
    /// Number of sessions removed
    pub async fn purge_older_than(&self, older_than: Duration) -> Result<usize> {
        // An age beyond what a timestamp can express reaches past every session.
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let candidates = self.store.sessions_older_than(cutoff);
        if candidates.is_empty() {
            debug!(cutoff = %cutoff, "No sessions to purge");
            return Ok(0);
        }

        let mut removed = Vec::with_capacity(candidates.len());
        for session_id in candidates {
            let Some(lock) = self.store.session_lock(&session_id) else {
                continue;
            };
            let _guard = lock.lock().await;
            if let Some(session) = self.store.remove_session(&session_id) {
                removed.push(session);
            }
        }

        let mut failed_backups = 0usize;
        for session in &removed {
            for backup in session.backup_paths() {
                if !self.backups.remove_backup(backup).await {
                    failed_backups += 1;
                }
            }
        }

        self.store.persist().await?;

        info!(
            removed = removed.len(),
            failed_backups,
            cutoff = %cutoff,
            "Purged aged undo sessions"
        );

        self.notifier.publish(
            UndoEvent::new(UndoEventType::HistoryCleared).with_data(json!({
                "removed": removed.len(),
                "cutoff": cutoff,
                "session_ids": removed.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
            })),
        );

        Ok(removed.len())
    }

    /// One sweep with the configured maximum age
    pub async fn sweep_once(&self) -> Result<usize> {
        self.purge_older_than(self.max_age).await
    }

    /// Spawn the periodic sweep on the current runtime
    pub fn start(&self) -> RetentionHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let sweeper = self.clone();

        let task = tokio::spawn(async move {
            let mut interval = time::interval(sweeper.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sweeper.sweep_once().await {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Retention sweeper shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Retention sweeper started"
        );

        RetentionHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Owner of a running retention loop
#[derive(Debug)]
pub struct RetentionHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RetentionHandle {
    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for an in-flight sweep to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RetentionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
