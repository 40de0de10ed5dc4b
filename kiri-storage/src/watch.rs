//! Per-key watcher registry.
//!
//! A watcher is a callback bound to one key, invoked synchronously after
//! every write to that key with `(new, old)`; `new` is `None` for deletes.
//! Delivery is in registration order and happens before the next write to
//! the key is acknowledged. Closures have no identity in Rust, so `watch`
//! hands back a [`WatcherId`] for removal; `unwatch(key, None)` clears the
//! whole key. A panicking watcher is isolated from the writer.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

pub type WatchCallback = Arc<dyn Fn(Option<&Value>, Option<&Value>) + Send + Sync>;

/// Handle identifying one registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherId(u64);

struct WatcherEntry {
    id: u64,
    callback: WatchCallback,
}

#[derive(Default)]
pub struct WatcherRegistry {
    watchers: RwLock<HashMap<String, Vec<WatcherEntry>>>,
    next_id: AtomicU64,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn watch(&self, key: impl Into<String>, callback: WatchCallback) -> WatcherId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers
            .write()
            .entry(key.into())
            .or_default()
            .push(WatcherEntry { id, callback });
        WatcherId(id)
    }

    /// Remove one watcher, or all watchers for the key when `id` is `None`.
    /// Idempotent; returns whether anything was removed.
    pub fn unwatch(&self, key: &str, id: Option<WatcherId>) -> bool {
        let mut watchers = self.watchers.write();
        match id {
            Some(WatcherId(id)) => {
                if let Some(entries) = watchers.get_mut(key) {
                    let before = entries.len();
                    entries.retain(|e| e.id != id);
                    let removed = entries.len() != before;
                    if entries.is_empty() {
                        watchers.remove(key);
                    }
                    removed
                } else {
                    false
                }
            }
            None => watchers.remove(key).is_some(),
        }
    }

    /// Deliver `(new, old)` to every watcher of `key`, in registration
    /// order. Callbacks run outside the registry lock.
    pub fn notify(&self, key: &str, new: Option<&Value>, old: Option<&Value>) {
        let callbacks: Vec<WatchCallback> = match self.watchers.read().get(key) {
            Some(entries) => entries.iter().map(|e| Arc::clone(&e.callback)).collect(),
            None => return,
        };
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(new, old))).is_err() {
                warn!(key, "watcher panicked; continuing");
            }
        }
    }

    pub fn count(&self, key: &str) -> usize {
        self.watchers.read().get(key).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.watchers.write().clear();
    }
}
