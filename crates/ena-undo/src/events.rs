//! Lifecycle event fan-out
//!
//! Mutators publish onto a bounded queue and return immediately. One
//! dispatcher task drains the queue and hands each event to every listener
//! registered for its type, each call bounded by a timeout. Listener
//! failures are logged and never reach the caller that published the event.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Lifecycle transitions listeners can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoEventType {
    /// A session was started, explicitly or implicitly
    SessionCreated,
    /// An operation's pre-image was captured
    OperationTracked,
    /// A single operation was reversed
    OperationUndone,
    /// Every operation of a session was reversed
    SessionUndone,
    /// Aged sessions were purged
    HistoryCleared,
}

impl fmt::Display for UndoEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SessionCreated => "session_created",
            Self::OperationTracked => "operation_tracked",
            Self::OperationUndone => "operation_undone",
            Self::SessionUndone => "session_undone",
            Self::HistoryCleared => "history_cleared",
        };
        f.write_str(name)
    }
}

/// A published lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEvent {
    /// What happened
    pub event_type: UndoEventType,
    /// Session involved, if any
    pub session_id: Option<String>,
    /// Operation involved, if any
    pub operation_id: Option<String>,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload
    pub data: serde_json::Value,
}

impl UndoEvent {
    /// Create an event with an empty payload
    pub fn new(event_type: UndoEventType) -> Self {
        Self {
            event_type,
            session_id: None,
            operation_id: None,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    /// Attach the session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach the operation id
    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Attach a payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Outcome reported by a listener
pub type ListenerResult = std::result::Result<(), String>;

/// Type-erased async listener
pub type EventCallback = Arc<dyn Fn(UndoEvent) -> BoxFuture<'static, ListenerResult> + Send + Sync>;

type ListenerMap = Arc<RwLock<HashMap<UndoEventType, Vec<EventCallback>>>>;

enum Envelope {
    Event(UndoEvent),
    Flush(oneshot::Sender<()>),
}

/// Bounded, best-effort event dispatcher
#[derive(Clone)]
pub struct EventNotifier {
    listeners: ListenerMap,
    sender: mpsc::Sender<Envelope>,
    receiver: Arc<Mutex<Option<mpsc::Receiver<Envelope>>>>,
    listener_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

impl EventNotifier {
    /// Create a notifier buffering at most `capacity` undelivered events
    ///
    /// The dispatcher task starts on first use inside a tokio runtime.
    pub fn new(capacity: usize, listener_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            listener_timeout,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register an async listener for one event type
    pub fn add_listener<F, Fut>(&self, event_type: UndoEventType, callback: F)
    where
        F: Fn(UndoEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| callback(event).boxed());
        self.listeners
            .write()
            .entry(event_type)
            .or_default()
            .push(callback);
        debug!(event_type = %event_type, "Registered event listener");
    }

    /// Number of listeners registered for `event_type`
    pub fn listener_count(&self, event_type: UndoEventType) -> usize {
        self.listeners
            .read()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Events dropped because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue an event without waiting for delivery
    pub fn publish(&self, event: UndoEvent) {
        self.ensure_dispatcher();

        match self.sender.try_send(Envelope::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Envelope::Event(event))) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = %event.event_type,
                    "Event queue full, dropping event"
                );
            }
            Err(_) => debug!("Event dispatcher stopped, event discarded"),
        }
    }

    /// Wait until every event published before this call has been delivered
    pub async fn flush(&self) {
        self.ensure_dispatcher();

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.sender.send(Envelope::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    fn ensure_dispatcher(&self) {
        let mut slot = self.receiver.lock();
        if slot.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if let Some(receiver) = slot.take() {
            handle.spawn(dispatch_loop(
                receiver,
                Arc::clone(&self.listeners),
                self.listener_timeout,
            ));
        }
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(5))
    }
}

impl fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNotifier")
            .field("listener_timeout", &self.listener_timeout)
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<Envelope>,
    listeners: ListenerMap,
    listener_timeout: Duration,
) {
    while let Some(envelope) = receiver.recv().await {
        match envelope {
            Envelope::Event(event) => deliver(&event, &listeners, listener_timeout).await,
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Event dispatcher exiting");
}

async fn deliver(event: &UndoEvent, listeners: &ListenerMap, listener_timeout: Duration) {
    let callbacks: Vec<EventCallback> = listeners
        .read()
        .get(&event.event_type)
        .cloned()
        .unwrap_or_default();

    if callbacks.is_empty() {
        return;
    }

    let calls = callbacks.into_iter().enumerate().map(|(index, callback)| {
        let event = event.clone();
        // Called inside the future so a panicking closure is caught as well.
        let call = AssertUnwindSafe(async move { (*callback)(event).await }).catch_unwind();
        async move { (index, tokio::time::timeout(listener_timeout, call).await) }
    });

    for (index, outcome) in join_all(calls).await {
        match outcome {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(message))) => warn!(
                event_type = %event.event_type,
                listener = index,
                error = %message,
                "Event listener failed"
            ),
            Ok(Err(_)) => warn!(
                event_type = %event.event_type,
                listener = index,
                "Event listener panicked"
            ),
            Err(_) => warn!(
                event_type = %event.event_type,
                listener = index,
                timeout_ms = listener_timeout.as_millis() as u64,
                "Event listener timed out"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_listener_receives_matching_events_only() {
        let notifier = EventNotifier::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        notifier.add_listener(UndoEventType::OperationTracked, move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(event.operation_id);
                Ok(())
            }
        });

        notifier.publish(UndoEvent::new(UndoEventType::OperationTracked).with_operation("op-1"));
        notifier.publish(UndoEvent::new(UndoEventType::SessionCreated).with_session("s-1"));
        notifier.flush().await;

        assert_eq!(*seen.lock(), vec![Some("op-1".to_string())]);
    }

    #[tokio::test]
    async fn test_every_listener_gets_the_event() {
        let notifier = EventNotifier::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            notifier.add_listener(UndoEventType::SessionUndone, move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        notifier.publish(UndoEvent::new(UndoEventType::SessionUndone));
        notifier.flush().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.listener_count(UndoEventType::SessionUndone), 3);
    }

    #[tokio::test]
    async fn test_stuck_listener_is_timed_out() {
        let notifier = EventNotifier::new(8, Duration::from_millis(50));
        let delivered = Arc::new(AtomicUsize::new(0));

        notifier.add_listener(UndoEventType::OperationUndone, |_| async {
            futures::future::pending::<()>().await;
            Ok(())
        });
        let counter = Arc::clone(&delivered);
        notifier.add_listener(UndoEventType::OperationUndone, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        notifier.publish(UndoEvent::new(UndoEventType::OperationUndone));
        notifier.flush().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_dispatch() {
        let notifier = EventNotifier::default();
        let delivered = Arc::new(AtomicUsize::new(0));

        notifier.add_listener(UndoEventType::SessionCreated, |_| async {
            Err("listener exploded".to_string())
        });
        let counter = Arc::clone(&delivered);
        notifier.add_listener(UndoEventType::SessionCreated, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        notifier.publish(UndoEvent::new(UndoEventType::SessionCreated));
        notifier.publish(UndoEvent::new(UndoEventType::SessionCreated));
        notifier.flush().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_full_queue_drops_events() {
        // No runtime: the dispatcher never starts, so the queue fills up.
        let notifier = EventNotifier::new(2, Duration::from_secs(1));
        for _ in 0..5 {
            notifier.publish(UndoEvent::new(UndoEventType::OperationTracked));
        }
        assert_eq!(notifier.dropped_events(), 3);
    }
}
