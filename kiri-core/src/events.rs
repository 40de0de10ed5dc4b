//! # Event Taxonomy & Bus
//!
//! The engine emits a closed set of events, one payload shape per event
//! name. Listeners are invoked synchronously after the in-memory state is
//! updated and the WAL record is durable; a panicking listener is isolated
//! from the writer and logged.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

/// Everything the engine can tell the outside world.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Initialisation finished. `degraded` is set when recovery had to fall
    /// back to a backup or an empty store.
    Ready {
        degraded: bool,
        warning: Option<String>,
    },
    Error {
        code: &'static str,
        message: String,
    },
    Set {
        key: String,
        value: Value,
        old: Option<Value>,
    },
    Delete {
        key: String,
        old: Value,
    },
    Clear,
    Close,
    /// Numeric add/subtract applied to a key.
    Add {
        key: String,
        amount: f64,
        result: f64,
    },
    /// Value appended to an array key.
    Push {
        key: String,
        value: Value,
    },
    /// Matching elements removed from an array key.
    Pull {
        key: String,
        removed: usize,
    },
}

impl StoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Ready { .. } => EventKind::Ready,
            StoreEvent::Error { .. } => EventKind::Error,
            StoreEvent::Set { .. } => EventKind::Set,
            StoreEvent::Delete { .. } => EventKind::Delete,
            StoreEvent::Clear => EventKind::Clear,
            StoreEvent::Close => EventKind::Close,
            StoreEvent::Add { .. } => EventKind::Add,
            StoreEvent::Push { .. } => EventKind::Push,
            StoreEvent::Pull { .. } => EventKind::Pull,
        }
    }
}

/// Event names for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Error,
    Set,
    Delete,
    Clear,
    Close,
    Add,
    Push,
    Pull,
}

pub type EventCallback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Listener {
    id: u64,
    kind: Option<EventKind>,
    callback: EventCallback,
}

/// Synchronous listener bus.
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to one event kind.
    pub fn subscribe(&self, kind: EventKind, callback: EventCallback) -> ListenerId {
        self.insert(Some(kind), callback)
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self, callback: EventCallback) -> ListenerId {
        self.insert(None, callback)
    }

    fn insert(&self, kind: Option<EventKind>, callback: EventCallback) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push(Listener { id, kind, callback });
        ListenerId(id)
    }

    /// Remove a listener. Idempotent.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id.0);
        listeners.len() != before
    }

    /// Invoke all matching listeners in subscription order. Callbacks run
    /// outside the registry lock so they may subscribe/unsubscribe freely;
    /// a panic in one listener does not reach the writer or later listeners.
    pub fn emit(&self, event: &StoreEvent) {
        let kind = event.kind();
        let matching: Vec<EventCallback> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.kind.is_none() || l.kind == Some(kind))
            .map(|l| Arc::clone(&l.callback))
            .collect();

        for callback in matching {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(event = ?kind, "event listener panicked; continuing");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
