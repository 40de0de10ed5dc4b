//! # Embedded Client
//!
//! High-level facade for hosts that link the engine in-process. Wraps an
//! `Arc<Store>` and wires the HTTP replication transport when the config
//! names followers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use kiri_core::config::DatabaseConfig;
use kiri_core::events::{EventCallback, EventKind, ListenerId};
use kiri_core::types::{ReplicaRole, ReplicationStatus, StoreStats};
use kiri_core::Result;
use kiri_index::{IndexDescriptor, IndexKind, ResultSet};
use kiri_storage::watch::WatchCallback;
use kiri_storage::{Collection, SetOptions, Store, WatcherId};

/// High-level client for embedded KiriDB usage.
pub struct KiriClient {
    store: Arc<Store>,
}

impl KiriClient {
    /// Open or create a database whose snapshot lives at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(DatabaseConfig::at(path.as_ref())).await
    }

    /// Open with custom configuration. A primary with followers gets the
    /// HTTP transport automatically.
    pub async fn open_with_config(config: DatabaseConfig) -> Result<Self> {
        let needs_transport = config.replication.role == ReplicaRole::Primary
            && !config.replication.followers.is_empty();
        let store = if needs_transport {
            Store::with_transport(config, Some(Arc::new(crate::remote::HttpTransport::new())))
        } else {
            Store::new(config)
        };
        store.init().await?;
        Ok(Self { store })
    }

    // ========== Store Operations ==========

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store.set(key, value).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: Value, ttl_ms: i64) -> Result<()> {
        self.store.set_with(key, value, SetOptions::ttl(ttl_ms)).await
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(key)
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        self.store.has(key)
    }

    pub fn all(&self) -> Result<HashMap<String, Value>> {
        self.store.all()
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn add(&self, key: &str, amount: f64) -> Result<f64> {
        self.store.add(key, amount).await
    }

    pub async fn subtract(&self, key: &str, amount: f64) -> Result<f64> {
        self.store.subtract(key, amount).await
    }

    pub async fn push(&self, key: &str, item: Value) -> Result<usize> {
        self.store.push(key, item).await
    }

    pub async fn pull(&self, key: &str, target: &Value) -> Result<usize> {
        self.store.pull(key, target).await
    }

    // ========== Query ==========

    pub fn find<F>(&self, predicate: F) -> Result<ResultSet>
    where
        F: Fn(&str, &Value) -> bool,
    {
        self.store.find(predicate)
    }

    pub fn query(&self, field: &str, op: &str, value: Value) -> Result<ResultSet> {
        self.store.query(field, op, value)
    }

    pub fn count(&self) -> usize {
        self.store.count()
    }

    // ========== Indexes ==========

    pub async fn create_index(&self, field: &str, kind: IndexKind) -> Result<()> {
        self.store.create_index(field, kind).await
    }

    pub fn drop_index(&self, field: &str) -> Result<bool> {
        self.store.drop_index(field)
    }

    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.store.list_indexes()
    }

    // ========== Collections ==========

    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.store.collection(name)
    }

    // ========== Watchers & Events ==========

    pub fn watch(&self, key: &str, callback: WatchCallback) -> Result<WatcherId> {
        self.store.watch(key, callback)
    }

    pub fn unwatch(&self, key: &str, id: Option<WatcherId>) -> bool {
        self.store.unwatch(key, id)
    }

    pub fn on(&self, kind: EventKind, callback: EventCallback) -> ListenerId {
        self.store.on(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.store.off(id)
    }

    // ========== Replication & Utility ==========

    pub fn role(&self) -> ReplicaRole {
        self.store.role()
    }

    pub fn status(&self) -> Result<ReplicationStatus> {
        self.store.status()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub async fn compact(&self) -> Result<()> {
        self.store.compact().await
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// Underlying engine for advanced operations.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
