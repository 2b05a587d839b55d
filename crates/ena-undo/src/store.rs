//! Session store and its JSON mirror
//!
//! The committed session map sits behind a short-held lock that is never
//! held across file I/O. Callers that need to serialize work on one session
//! (undo, purge) take that session's async lock from [`SessionStore::session_lock`],
//! so slow I/O on one session never blocks another.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use ena_common::json_store::{load_json_or_default, save_json_atomic};

use crate::error::{Result, UndoError};
use crate::models::{HistoryDocument, HistoryStats, UndoOperation, UndoSession, HISTORY_VERSION};

/// In-memory sessions plus the path of their on-disk mirror
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, UndoSession>>,
    current: RwLock<Option<String>>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    persist_lock: Mutex<()>,
    history_file: PathBuf,
}

impl SessionStore {
    /// An empty store that will persist to `history_file`
    pub fn new(history_file: impl Into<PathBuf>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            session_locks: DashMap::new(),
            persist_lock: Mutex::new(()),
            history_file: history_file.into(),
        }
    }

    /// Load `history_file`, starting empty if it does not exist
    ///
    /// No session is current after a load; the next track starts a new one.
    pub fn open(history_file: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(history_file);
        let document: HistoryDocument = load_json_or_default(&store.history_file)?;

        if document.version > HISTORY_VERSION {
            return Err(UndoError::config(format!(
                "history document version {} is newer than supported version {}",
                document.version, HISTORY_VERSION
            )));
        }

        let count = document.sessions.len();
        {
            let mut sessions = store.sessions.write();
            for session in document.sessions {
                sessions.insert(session.id.clone(), session);
            }
        }

        info!(
            path = %store.history_file.display(),
            sessions = count,
            "Loaded undo history"
        );
        Ok(store)
    }

    /// Path of the JSON mirror
    pub fn history_file(&self) -> &Path {
        &self.history_file
    }

    /// Add a session
    pub fn insert_session(&self, session: UndoSession) {
        self.sessions.write().insert(session.id.clone(), session);
    }

    /// Add a session and make it current, returning the previously current id
    pub fn insert_current(&self, session: UndoSession) -> Option<String> {
        let id = session.id.clone();
        let mut current = self.current.write();
        self.insert_session(session);
        current.replace(id)
    }

    /// Undo [`insert_current`](Self::insert_current) for a session that could not be committed
    pub fn rollback_current(&self, session_id: &str, previous: Option<String>) {
        {
            let mut current = self.current.write();
            let mut sessions = self.sessions.write();
            sessions.remove(session_id);
            if current.as_deref() == Some(session_id) {
                *current = previous.filter(|id| sessions.contains_key(id));
            }
        }
        self.session_locks.remove(session_id);
    }

    /// Clone of a session
    pub fn get(&self, session_id: &str) -> Option<UndoSession> {
        self.sessions.read().get(session_id).cloned()
    }

    /// All sessions, oldest first
    pub fn list(&self) -> Vec<UndoSession> {
        let mut sessions: Vec<UndoSession> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Id of the current session
    pub fn current_id(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Id of the current session if it can still take operations
    ///
    /// An undone session never takes new operations.
    pub fn live_current_id(&self) -> Option<String> {
        let current = self.current.read();
        let sessions = self.sessions.read();
        current
            .as_ref()
            .filter(|id| sessions.get(id.as_str()).is_some_and(|s| !s.undone))
            .cloned()
    }

    /// Clear the current-session pointer
    pub fn clear_current(&self) -> Option<String> {
        self.current.write().take()
    }

    /// Clear the current-session pointer if it points at `session_id`
    pub fn clear_current_if(&self, session_id: &str) -> bool {
        let mut current = self.current.write();
        if current.as_deref() == Some(session_id) {
            *current = None;
            return true;
        }
        false
    }

    /// Append an operation to the session `expected` names as live current
    ///
    /// `expected` is what [`live_current_id`](Self::live_current_id) returned
    /// before the caller took that session's lock. With `None` a session from
    /// `new_session` is started and made current.
    ///
    /// # Returns
    ///
    /// The session id and whether the session was created by this call, or
    /// the operation back when the live current session changed meanwhile
    pub fn append_if_current<F>(
        &self,
        expected: Option<&str>,
        operation: UndoOperation,
        new_session: F,
    ) -> std::result::Result<(String, bool), UndoOperation>
    where
        F: FnOnce() -> UndoSession,
    {
        let mut current = self.current.write();
        let mut sessions = self.sessions.write();

        let live = current
            .as_deref()
            .filter(|id| sessions.get(*id).is_some_and(|s| !s.undone));
        if live != expected {
            return Err(operation);
        }

        match expected {
            Some(id) => match sessions.get_mut(id) {
                Some(session) => {
                    session.operations.push(operation);
                    Ok((id.to_string(), false))
                }
                None => Err(operation),
            },
            None => {
                let mut session = new_session();
                session.operations.push(operation);
                let id = session.id.clone();
                sessions.insert(id.clone(), session);
                *current = Some(id.clone());
                Ok((id, true))
            }
        }
    }

    /// Drop an operation that was appended but could not be committed
    pub fn discard_operation(&self, session_id: &str, operation_id: &str) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.operations.retain(|op| op.id != operation_id);
        }
    }

    /// Find which session owns an operation
    pub fn find_operation(&self, operation_id: &str) -> Option<(String, UndoOperation)> {
        self.sessions.read().values().find_map(|session| {
            session
                .operation(operation_id)
                .map(|op| (session.id.clone(), op.clone()))
        })
    }

    /// Apply `f` to a session in place
    pub fn update_session<F, R>(&self, session_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut UndoSession) -> R,
    {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| UndoError::not_found(format!("session {}", session_id)))?;
        Ok(f(session))
    }

    /// Ids of sessions created before `cutoff`
    pub fn sessions_older_than(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.is_older_than(cutoff))
            .map(|session| session.id.clone())
            .collect()
    }

    /// Remove a session, clearing the current pointer if it pointed at it
    pub fn remove_session(&self, session_id: &str) -> Option<UndoSession> {
        let mut current = self.current.write();
        let removed = self.sessions.write().remove(session_id);
        if removed.is_some() && current.as_deref() == Some(session_id) {
            *current = None;
        }
        self.session_locks.remove(session_id);
        removed
    }

    /// Remove a session only if it holds no operations
    pub fn remove_session_if_empty(&self, session_id: &str) -> bool {
        {
            let mut current = self.current.write();
            let mut sessions = self.sessions.write();
            if !sessions
                .get(session_id)
                .is_some_and(|s| s.operations.is_empty())
            {
                return false;
            }
            sessions.remove(session_id);
            if current.as_deref() == Some(session_id) {
                *current = None;
            }
        }
        self.session_locks.remove(session_id);
        true
    }

    /// The async lock serializing work on one session, `None` for unknown ids
    pub fn session_lock(&self, session_id: &str) -> Option<Arc<Mutex<()>>> {
        // Held while touching the lock table so a concurrent removal either
        // sees the new entry or this call sees the session gone.
        let sessions = self.sessions.read();
        if !sessions.contains_key(session_id) {
            return None;
        }
        Some(Arc::clone(
            self.session_locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        ))
    }

    /// Number of per-session locks currently allocated
    pub fn lock_count(&self) -> usize {
        self.session_locks.len()
    }

    /// Aggregate counts across every session
    pub fn stats(&self) -> HistoryStats {
        let sessions = self.sessions.read();
        let mut stats = HistoryStats {
            sessions: sessions.len(),
            ..HistoryStats::default()
        };
        for op in sessions.values().flat_map(|s| s.operations.iter()) {
            stats.operations += 1;
            if op.undone {
                stats.undone_operations += 1;
            }
            if op.backup_path.is_some() {
                stats.backup_bytes += op.size;
            }
        }
        stats
    }

    /// Current state as a history document
    pub fn snapshot(&self) -> HistoryDocument {
        HistoryDocument {
            sessions: self.list(),
            version: HISTORY_VERSION,
            updated: Utc::now(),
        }
    }

    /// Write the current state to the history file
    ///
    /// Saves are serialized and each one snapshots the state after acquiring
    /// the save lock, so the file never regresses to an older state.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let document = self.snapshot();
        let path = self.history_file.clone();
        let sessions = document.sessions.len();

        tokio::task::spawn_blocking(move || save_json_atomic(&path, &document))
            .await
            .map_err(|e| {
                UndoError::io(&self.history_file, std::io::Error::other(e.to_string()))
            })??;

        debug!(
            path = %self.history_file.display(),
            sessions,
            "Persisted undo history"
        );
        Ok(())
    }
}
