//! The store engine.
//!
//! Coordinates the durable layers (WAL, snapshot), the in-memory map with
//! its side-tables (hot cache, TTL, watcher registry), the index manager
//! and the replication controller.
//!
//! ## Single-writer discipline
//!
//! Every mutation serialises through one async mutex, the write pipeline.
//! Inside it, in order: WAL append (the durability point), map + cache +
//! TTL + index update under the state lock, then event and watcher fan-out
//! and the replication enqueue. Readers never take the pipeline lock; they
//! observe the state lock's pre- or post-image atomically. Only WAL I/O and
//! the snapshot rename may block inside the critical section; replication
//! delivery happens on its own task fed by an ordered queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use kiri_core::config::DatabaseConfig;
use kiri_core::events::{EventBus, EventCallback, EventKind, ListenerId, StoreEvent};
use kiri_core::metrics::StoreMetrics;
use kiri_core::traits::{ReadInterceptor, ReplicationTransport, WriteInterceptor};
use kiri_core::types::{
    ConflictEntry, RepOpKind, ReplicaRole, ReplicationOp, ReplicationStatus, StoreStats,
};
use kiri_core::utils::{expiry_for_ttl, now_millis};
use kiri_core::{value, Error, Result};

use kiri_index::{
    Filter, IndexBuilder, IndexDescriptor, IndexKind, IndexLookup, IndexManager, PredicateCache,
    ResultSet,
};

use crate::cache::HotCache;
use crate::collection::{Collection, CollectionCore, NAMESPACE_SEP};
use crate::interceptor::InterceptorChain;
use crate::layout::StorageLayout;
use crate::replication::{ConflictHook, ReplicationController};
use crate::snapshot;
use crate::ttl::TtlTable;
use crate::wal::{Wal, WalOp, WalRecord};
use crate::watch::{WatchCallback, WatcherId, WatcherRegistry};

/// Reserved internal key holding the replica's conflict log.
const CONFLICT_LOG_KEY: &str = "_conflicts";
/// Most recent conflicts retained.
const CONFLICT_LOG_CAP: usize = 100;
/// Keys per batch during cooperative index builds.
const INDEX_BUILD_BATCH: usize = 256;
/// Compiled scan predicates retained.
const PREDICATE_CACHE_CAP: usize = 256;

/// Options for `set_with`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Relative TTL in milliseconds. Zero or negative makes the key
    /// eligible for deletion at the next sweep.
    pub ttl_ms: Option<i64>,
}

impl SetOptions {
    pub fn ttl(ttl_ms: i64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
        }
    }
}

/// Where a mutation came from; decides divergence tracking and broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrigin {
    Local,
    Replication,
}

struct StoreState {
    map: HashMap<String, Value>,
    ttl: TtlTable,
    /// Timestamp of the last local (non-replication) write per key. On a
    /// replica a surviving entry marks divergence from the primary.
    local_write_ts: HashMap<String, u64>,
    indexes: IndexManager,
    ops_since_save: u64,
}

impl StoreState {
    fn empty() -> Self {
        Self {
            map: HashMap::new(),
            ttl: TtlTable::new(),
            local_write_ts: HashMap::new(),
            indexes: IndexManager::new(),
            ops_since_save: 0,
        }
    }
}

pub struct Store {
    config: DatabaseConfig,
    layout: StorageLayout,
    /// The write pipeline: held for the whole of every mutation.
    write_lock: Mutex<()>,
    state: RwLock<StoreState>,
    wal: RwLock<Option<Arc<Wal>>>,
    cache: HotCache,
    watchers: WatcherRegistry,
    events: EventBus,
    interceptors: InterceptorChain,
    predicates: PredicateCache,
    collections: RwLock<HashMap<String, Arc<CollectionCore>>>,
    replication: RwLock<Option<Arc<ReplicationController>>>,
    transport: RwLock<Option<Arc<dyn ReplicationTransport>>>,
    metrics: StoreMetrics,
    ready: AtomicBool,
    closing: AtomicBool,
    shutdown: watch::Sender<bool>,
    /// Self-handle for background tasks and collection views. Stores only
    /// ever live inside an `Arc`.
    self_ref: Weak<Store>,
}

impl Store {
    /// Build a store. Nothing touches the disk until `init`.
    pub fn new(config: DatabaseConfig) -> Arc<Self> {
        Self::with_transport(config, None)
    }

    /// Build a store with an outbound replication transport. Required when
    /// the config names followers; tests use in-memory transports.
    pub fn with_transport(
        config: DatabaseConfig,
        transport: Option<Arc<dyn ReplicationTransport>>,
    ) -> Arc<Self> {
        let layout = StorageLayout::new(&config.path);
        let (shutdown, _) = watch::channel(false);
        Arc::new_cyclic(|self_ref| Self {
            cache: HotCache::new(config.cache_limit),
            predicates: PredicateCache::new(PREDICATE_CACHE_CAP),
            layout,
            config,
            write_lock: Mutex::new(()),
            state: RwLock::new(StoreState::empty()),
            wal: RwLock::new(None),
            watchers: WatcherRegistry::new(),
            events: EventBus::new(),
            interceptors: InterceptorChain::new(),
            collections: RwLock::new(HashMap::new()),
            replication: RwLock::new(None),
            transport: RwLock::new(transport),
            metrics: StoreMetrics::new(),
            ready: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            shutdown,
            self_ref: self_ref.clone(),
        })
    }

    // ========== Lifecycle ==========

    /// Recover state from disk, start the background tasks and emit
    /// `ready`. Idempotent.
    pub async fn init(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }

        let recovered = snapshot::load(&self.layout)?;
        let warning = recovered.warning;
        let mut map = recovered.data;
        let mut ttl = TtlTable::new();

        let (records, skipped) = Wal::replay(self.layout.wal())?;
        let replayed = records.len();
        let now = now_millis();
        for record in records {
            match record.op {
                WalOp::Put => {
                    if let (Some(k), Some(v)) = (record.k, record.v) {
                        map.insert(k.clone(), v);
                        ttl.remove(&k);
                    }
                }
                WalOp::Del => {
                    if let Some(k) = record.k {
                        map.remove(&k);
                        ttl.remove(&k);
                    }
                }
                WalOp::Clr => {
                    map.clear();
                    ttl.clear();
                }
                WalOp::Ttl => {
                    if let (Some(k), Some(exp)) = (record.k, record.exp) {
                        // expiries already in the past are discarded
                        if exp > now && map.contains_key(&k) {
                            ttl.set(k, exp);
                        }
                    }
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "WAL replay skipped malformed lines");
        }

        let wal = Arc::new(Wal::open(self.layout.wal(), self.config.wal.sync_on_write)?);
        {
            let mut state = self.state.write();
            state.map = map;
            state.ttl = ttl;
            state.local_write_ts.clear();
            state.ops_since_save = 0;
        }
        *self.wal.write() = Some(wal);

        let controller = Arc::new(ReplicationController::new(
            &self.config.replication,
            self.transport.read().clone(),
            self.shutdown.subscribe(),
        )?);
        *self.replication.write() = Some(controller);

        self.spawn_background_tasks();

        let degraded = warning.is_some();
        self.ready.store(true, Ordering::SeqCst);
        info!(
            path = %self.layout.snapshot().display(),
            entries = self.count(),
            replayed,
            "store ready"
        );
        self.events.emit(&StoreEvent::Ready { degraded, warning });
        Ok(())
    }

    /// Final compaction, task shutdown, `close` event. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.closing.store(true, Ordering::SeqCst);
        self.compact().await?;
        let _ = self.shutdown.send(true);
        self.ready.store(false, Ordering::SeqCst);
        self.events.emit(&StoreEvent::Close);
        info!("store closed");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    fn wal_handle(&self) -> Result<Arc<Wal>> {
        self.wal.read().clone().ok_or(Error::NotReady)
    }

    fn controller(&self) -> Result<Arc<ReplicationController>> {
        self.replication.read().clone().ok_or(Error::NotReady)
    }

    // ========== Store operations ==========

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.set_with(key, value, SetOptions::default()).await
    }

    pub async fn set_with(&self, key: &str, value: Value, options: SetOptions) -> Result<()> {
        self.ensure_ready()?;
        let value = self.interceptors.before_write(key, value)?;
        let expiry = options.ttl_ms.map(|ttl| expiry_for_ttl(now_millis(), ttl));

        let _pipeline = self.write_lock.lock().await;
        let old = self.commit_put(key, value.clone(), expiry, WriteOrigin::Local)?;
        self.interceptors.after_write(key, &value);
        self.events.emit(&StoreEvent::Set {
            key: key.to_string(),
            value: value.clone(),
            old: old.clone(),
        });
        self.watchers.notify(key, Some(&value), old.as_ref());
        self.broadcast(RepOpKind::Set, key, Some(&value));
        self.metrics.record_write();
        Ok(())
    }

    /// O(1) read: hot cache first (promoting on hit), then the map,
    /// populating the cache on the way out.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_ready()?;
        self.interceptors.before_read(key)?;
        self.metrics.record_read();

        if let Some(cached) = self.cache.get(key) {
            return Ok(Some(self.interceptors.after_read(key, cached)));
        }
        let state = self.state.read();
        match state.map.get(key) {
            Some(found) => {
                // populated under the state lock so a concurrent write
                // cannot slip a newer value in between
                self.cache.put(key.to_string(), found.clone());
                Ok(Some(self.interceptors.after_read(key, found.clone())))
            }
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self.state.read().map.contains_key(key))
    }

    /// Full clone of the key→value map.
    pub fn all(&self) -> Result<HashMap<String, Value>> {
        self.ensure_ready()?;
        Ok(self.state.read().map.clone())
    }

    /// Store size; O(1).
    pub fn count(&self) -> usize {
        self.state.read().map.len()
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        let _pipeline = self.write_lock.lock().await;
        self.delete_in_pipeline(key, WriteOrigin::Local)
    }

    /// Shared delete path; caller holds the write pipeline.
    fn delete_in_pipeline(&self, key: &str, origin: WriteOrigin) -> Result<bool> {
        let old = self.commit_delete(key, origin)?;
        match old {
            Some(old) => {
                self.events.emit(&StoreEvent::Delete {
                    key: key.to_string(),
                    old: old.clone(),
                });
                self.watchers.notify(key, None, Some(&old));
                if origin == WriteOrigin::Local {
                    self.broadcast(RepOpKind::Delete, key, None);
                }
                self.metrics.record_write();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.ensure_ready()?;
        let _pipeline = self.write_lock.lock().await;
        self.commit_clear()?;
        self.events.emit(&StoreEvent::Clear);
        self.broadcast(RepOpKind::Clear, "", None);
        self.metrics.record_write();
        Ok(())
    }

    /// Numeric increment. A missing or non-numeric current value coerces
    /// to 0.
    pub async fn add(&self, key: &str, amount: f64) -> Result<f64> {
        self.ensure_ready()?;
        let _pipeline = self.write_lock.lock().await;
        let current = {
            let state = self.state.read();
            state.map.get(key).and_then(value::as_f64).unwrap_or(0.0)
        };
        let result = current + amount;
        let number = serde_json::Number::from_f64(result).ok_or_else(|| Error::Validation {
            message: format!("numeric result {result} is not representable"),
        })?;
        let value = self.interceptors.before_write(key, Value::Number(number))?;

        let old = self.commit_put(key, value.clone(), None, WriteOrigin::Local)?;
        self.interceptors.after_write(key, &value);
        self.events.emit(&StoreEvent::Set {
            key: key.to_string(),
            value: value.clone(),
            old: old.clone(),
        });
        self.events.emit(&StoreEvent::Add {
            key: key.to_string(),
            amount,
            result,
        });
        self.watchers.notify(key, Some(&value), old.as_ref());
        self.broadcast(RepOpKind::Set, key, Some(&value));
        self.metrics.record_write();
        Ok(result)
    }

    pub async fn subtract(&self, key: &str, amount: f64) -> Result<f64> {
        self.add(key, -amount).await
    }

    /// Append to an array value. A missing key becomes a one-element
    /// array; pushing to a non-array fails validation.
    pub async fn push(&self, key: &str, item: Value) -> Result<usize> {
        self.ensure_ready()?;
        let _pipeline = self.write_lock.lock().await;
        let current = self.state.read().map.get(key).cloned();
        let items = match current {
            None => vec![item.clone()],
            Some(Value::Array(mut items)) => {
                items.push(item.clone());
                items
            }
            Some(other) => {
                return Err(Error::Validation {
                    message: format!(
                        "cannot push to {} value at '{key}'",
                        value::type_name(&other)
                    ),
                })
            }
        };
        let length = items.len();
        let value = self.interceptors.before_write(key, Value::Array(items))?;

        let old = self.commit_put(key, value.clone(), None, WriteOrigin::Local)?;
        self.interceptors.after_write(key, &value);
        self.events.emit(&StoreEvent::Set {
            key: key.to_string(),
            value: value.clone(),
            old: old.clone(),
        });
        self.events.emit(&StoreEvent::Push {
            key: key.to_string(),
            value: item,
        });
        self.watchers.notify(key, Some(&value), old.as_ref());
        self.broadcast(RepOpKind::Set, key, Some(&value));
        self.metrics.record_write();
        Ok(length)
    }

    /// Remove all elements equal to `target` from an array value. Returns
    /// how many were removed; a missing key removes nothing.
    pub async fn pull(&self, key: &str, target: &Value) -> Result<usize> {
        self.ensure_ready()?;
        let _pipeline = self.write_lock.lock().await;
        let current = self.state.read().map.get(key).cloned();
        let mut items = match current {
            None => return Ok(0),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::Validation {
                    message: format!(
                        "cannot pull from {} value at '{key}'",
                        value::type_name(&other)
                    ),
                })
            }
        };
        let before = items.len();
        items.retain(|v| v != target);
        let removed = before - items.len();
        if removed == 0 {
            return Ok(0);
        }
        let value = self.interceptors.before_write(key, Value::Array(items))?;

        let old = self.commit_put(key, value.clone(), None, WriteOrigin::Local)?;
        self.interceptors.after_write(key, &value);
        self.events.emit(&StoreEvent::Set {
            key: key.to_string(),
            value: value.clone(),
            old: old.clone(),
        });
        self.events.emit(&StoreEvent::Pull {
            key: key.to_string(),
            removed,
        });
        self.watchers.notify(key, Some(&value), old.as_ref());
        self.broadcast(RepOpKind::Set, key, Some(&value));
        self.metrics.record_write();
        Ok(removed)
    }

    // ========== Commit helpers (write pipeline held) ==========

    /// WAL append then in-memory apply. Nothing in memory changes when the
    /// append fails.
    fn commit_put(
        &self,
        key: &str,
        value: Value,
        expiry: Option<u64>,
        origin: WriteOrigin,
    ) -> Result<Option<Value>> {
        let wal = self.wal_handle()?;
        wal.append(&WalRecord::put(key, value.clone()))?;
        if let Some(exp) = expiry {
            wal.append(&WalRecord::ttl(key, exp))?;
        }

        let mut state = self.state.write();
        let old = state.map.insert(key.to_string(), value.clone());
        match expiry {
            Some(exp) => state.ttl.set(key, exp),
            None => {
                state.ttl.remove(key);
            }
        }
        match origin {
            WriteOrigin::Local => {
                state.local_write_ts.insert(key.to_string(), now_millis());
            }
            WriteOrigin::Replication => {
                state.local_write_ts.remove(key);
            }
        }
        state.ops_since_save += 1;
        state.indexes.apply(key, Some(&value));
        self.cache.put(key.to_string(), value);
        Ok(old)
    }

    fn commit_delete(&self, key: &str, origin: WriteOrigin) -> Result<Option<Value>> {
        // absent keys produce no WAL record
        if !self.state.read().map.contains_key(key) {
            return Ok(None);
        }
        let wal = self.wal_handle()?;
        wal.append(&WalRecord::del(key))?;

        let mut state = self.state.write();
        let old = state.map.remove(key);
        state.ttl.remove(key);
        match origin {
            WriteOrigin::Local => {
                state.local_write_ts.insert(key.to_string(), now_millis());
            }
            WriteOrigin::Replication => {
                state.local_write_ts.remove(key);
            }
        }
        state.ops_since_save += 1;
        state.indexes.apply(key, None);
        self.cache.remove(key);
        Ok(old)
    }

    fn commit_clear(&self) -> Result<()> {
        let wal = self.wal_handle()?;
        wal.append(&WalRecord::clr())?;

        let mut state = self.state.write();
        state.map.clear();
        state.ttl.clear();
        state.local_write_ts.clear();
        state.ops_since_save += 1;
        state.indexes.clear_contents();
        self.cache.clear();
        Ok(())
    }

    /// Queue a mutation for follower delivery. Internal keys never leave
    /// the node; replicas never broadcast.
    fn broadcast(&self, op: RepOpKind, key: &str, value: Option<&Value>) {
        if key.starts_with('_') {
            return;
        }
        if let Some(controller) = self.replication.read().as_ref() {
            if controller.is_primary() {
                let node_id = controller.node_id().to_string();
                let ts = now_millis();
                let op = match op {
                    RepOpKind::Set => ReplicationOp::set(
                        key,
                        value.cloned().unwrap_or(Value::Null),
                        ts,
                        node_id,
                    ),
                    RepOpKind::Delete => ReplicationOp::delete(key, ts, node_id),
                    RepOpKind::Clear => ReplicationOp::clear(ts, node_id),
                };
                controller.enqueue(op);
            }
        }
    }

    // ========== Watchers & events ==========

    pub fn watch(&self, key: &str, callback: WatchCallback) -> Result<WatcherId> {
        self.ensure_ready()?;
        Ok(self.watchers.watch(key, callback))
    }

    pub fn unwatch(&self, key: &str, id: Option<WatcherId>) -> bool {
        self.watchers.unwatch(key, id)
    }

    pub fn on(&self, kind: EventKind, callback: EventCallback) -> ListenerId {
        self.events.subscribe(kind, callback)
    }

    pub fn on_any(&self, callback: EventCallback) -> ListenerId {
        self.events.subscribe_all(callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    // ========== Interceptors ==========

    pub fn add_write_interceptor(&self, interceptor: Arc<dyn WriteInterceptor>) {
        self.interceptors.add_write(interceptor);
    }

    pub fn add_read_interceptor(&self, interceptor: Arc<dyn ReadInterceptor>) {
        self.interceptors.add_read(interceptor);
    }

    // ========== Query ==========

    /// Full scan with a caller predicate over `(key, value)`.
    pub fn find<F>(&self, predicate: F) -> Result<ResultSet>
    where
        F: Fn(&str, &Value) -> bool,
    {
        self.ensure_ready()?;
        let state = self.state.read();
        let rows = state
            .map
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(ResultSet::new(rows))
    }

    /// Field comparison (`where` in other bindings). Dispatches to a
    /// compatible index when one exists, otherwise degrades to a compiled
    /// predicate scan.
    pub fn query(&self, field: &str, op: &str, value: Value) -> Result<ResultSet> {
        self.ensure_ready()?;
        let filter = Filter::new(field, op, value)?;
        let state = self.state.read();
        let rows = match state.indexes.lookup(&filter) {
            IndexLookup::Keys(keys) => keys
                .into_iter()
                .filter_map(|k| {
                    let v = state.map.get(&k)?.clone();
                    Some((k, v))
                })
                .collect(),
            IndexLookup::Unsupported => {
                debug!(
                    field = %filter.field,
                    op = filter.op.as_str(),
                    "index cannot serve operator; falling back to scan"
                );
                self.scan_rows(&state, &filter)
            }
            IndexLookup::None => self.scan_rows(&state, &filter),
        };
        Ok(ResultSet::new(rows))
    }

    fn scan_rows(&self, state: &StoreState, filter: &Filter) -> Vec<(String, Value)> {
        let predicate = self.predicates.get_or_compile(filter);
        state
            .map
            .iter()
            .filter(|(_, v)| predicate(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ========== Indexes ==========

    /// Create a secondary index. On a populated store the build runs in
    /// batches, yielding between them; writes made while it runs are
    /// buffered and folded in before the index becomes visible. Shutdown
    /// cancels the build, discarding the partial index.
    pub async fn create_index(&self, field: &str, kind: IndexKind) -> Result<()> {
        self.ensure_ready()?;
        self.state.write().indexes.begin_build(field, kind)?;

        let keys: Vec<String> = self.state.read().map.keys().cloned().collect();
        let mut builder = IndexBuilder::new(field, kind);
        for batch in keys.chunks(INDEX_BUILD_BATCH) {
            if self.closing.load(Ordering::SeqCst) {
                self.state.write().indexes.abort_build(field);
                return Err(Error::Internal {
                    message: format!("index build on '{field}' cancelled by shutdown"),
                });
            }
            {
                let state = self.state.read();
                for key in batch {
                    if let Some(value) = state.map.get(key) {
                        builder.insert(key, value);
                    }
                }
            }
            tokio::task::yield_now().await;
        }

        // publish under the pipeline so no write can race the buffer fold
        let _pipeline = self.write_lock.lock().await;
        self.state.write().indexes.publish(field, builder)?;
        info!(field, ?kind, "index created");
        Ok(())
    }

    pub fn drop_index(&self, field: &str) -> Result<bool> {
        self.ensure_ready()?;
        Ok(self.state.write().indexes.drop_index(field))
    }

    pub fn list_indexes(&self) -> Vec<IndexDescriptor> {
        self.state.read().indexes.list()
    }

    // ========== Collections ==========

    /// Namespaced document view. Ids are seeded from existing keys on
    /// first access so a restart can never reuse one.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.ensure_ready()?;
        let store = self.self_ref.upgrade().ok_or_else(|| Error::Internal {
            message: "store handle no longer alive".to_string(),
        })?;
        if name.is_empty() || name.contains(NAMESPACE_SEP) || name.starts_with('_') {
            return Err(Error::Validation {
                message: format!("invalid collection name '{name}'"),
            });
        }
        let core = {
            let mut collections = self.collections.write();
            if let Some(core) = collections.get(name) {
                Arc::clone(core)
            } else {
                let next_id = self.namespace_max_id(&format!("{name}{NAMESPACE_SEP}")) + 1;
                let core = Arc::new(CollectionCore::new(next_id));
                collections.insert(name.to_string(), Arc::clone(&core));
                core
            }
        };
        Ok(Collection::new(store, name.to_string(), core))
    }

    pub(crate) fn namespace_rows(&self, prefix: &str) -> Vec<(String, Value)> {
        let state = self.state.read();
        let mut rows: Vec<(String, Value)> = state
            .map
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        rows.sort_by(|(a, _), (b, _)| a.cmp(b));
        rows
    }

    fn namespace_max_id(&self, prefix: &str) -> u64 {
        let state = self.state.read();
        state
            .map
            .keys()
            .filter_map(|k| k.strip_prefix(prefix))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }

    // ========== Replication ==========

    pub fn role(&self) -> ReplicaRole {
        self.replication
            .read()
            .as_ref()
            .map(|c| c.role())
            .unwrap_or(self.config.replication.role)
    }

    pub fn node_id(&self) -> Result<String> {
        Ok(self.controller()?.node_id().to_string())
    }

    pub fn status(&self) -> Result<ReplicationStatus> {
        Ok(self.controller()?.status())
    }

    pub fn set_conflict_handler(&self, hook: ConflictHook) -> Result<()> {
        self.controller()?.set_conflict_hook(hook);
        Ok(())
    }

    /// The replica's persisted conflict log, newest last.
    pub fn conflicts(&self) -> Vec<ConflictEntry> {
        self.state
            .read()
            .map
            .get(CONFLICT_LOG_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Apply one mutation received through the replication channel.
    /// Replica only; internal keys are rejected. An incoming `set` against
    /// a key carrying a divergent local write is a conflict, resolved by
    /// the configured hook or last-writer-wins with the remote preferred.
    pub async fn apply_op(&self, op: ReplicationOp) -> Result<()> {
        self.ensure_ready()?;
        let controller = self.controller()?;
        if controller.role() != ReplicaRole::Replica {
            return Err(Error::ConstraintViolation {
                message: "replication ops are only accepted by replicas".to_string(),
            });
        }
        if op.key.starts_with('_') {
            return Err(Error::ConstraintViolation {
                message: format!("internal key '{}' is not replicated", op.key),
            });
        }

        match op.op {
            RepOpKind::Set => {
                let incoming = op.value.clone().ok_or_else(|| Error::Replication {
                    message: "set op is missing a value".to_string(),
                })?;

                let _pipeline = self.write_lock.lock().await;
                let divergent = {
                    let state = self.state.read();
                    state.local_write_ts.get(&op.key).copied().map(|local_ts| {
                        let local_value =
                            state.map.get(&op.key).cloned().unwrap_or(Value::Null);
                        (local_ts, local_value)
                    })
                };

                let (chosen, conflict) = match divergent {
                    Some((local_ts, local_value)) => {
                        let (chosen, strategy) =
                            controller.resolve_conflict(&local_value, &incoming, &op);
                        let entry = ConflictEntry {
                            key: op.key.clone(),
                            local_ts,
                            remote_ts: op.ts,
                            strategy: strategy.to_string(),
                            node_id: op.node_id.clone(),
                            resolved_at: now_millis(),
                        };
                        (chosen, Some(entry))
                    }
                    None => (incoming, None),
                };

                let old = self.commit_put(&op.key, chosen.clone(), None, WriteOrigin::Replication)?;
                self.events.emit(&StoreEvent::Set {
                    key: op.key.clone(),
                    value: chosen.clone(),
                    old: old.clone(),
                });
                self.watchers.notify(&op.key, Some(&chosen), old.as_ref());
                self.metrics.record_write();

                if let Some(entry) = conflict {
                    info!(key = %entry.key, strategy = %entry.strategy, "replica conflict resolved");
                    self.append_conflict(entry)?;
                }
                Ok(())
            }
            RepOpKind::Delete => {
                let _pipeline = self.write_lock.lock().await;
                self.delete_in_pipeline(&op.key, WriteOrigin::Replication)?;
                Ok(())
            }
            RepOpKind::Clear => {
                let _pipeline = self.write_lock.lock().await;
                self.commit_clear()?;
                self.events.emit(&StoreEvent::Clear);
                self.metrics.record_write();
                Ok(())
            }
        }
    }

    /// Append to the bounded conflict log. Pipeline held by the caller.
    fn append_conflict(&self, entry: ConflictEntry) -> Result<()> {
        let mut log = self.conflicts();
        log.push(entry);
        if log.len() > CONFLICT_LOG_CAP {
            let overflow = log.len() - CONFLICT_LOG_CAP;
            log.drain(..overflow);
        }
        let value = serde_json::to_value(&log)?;
        self.commit_put(CONFLICT_LOG_KEY, value, None, WriteOrigin::Local)?;
        Ok(())
    }

    // ========== Maintenance ==========

    /// Snapshot compaction: persist the full map atomically, then truncate
    /// the WAL. Linearised at the rename; the pipeline is held throughout
    /// so no append can interleave.
    pub async fn compact(&self) -> Result<()> {
        self.ensure_ready()?;
        let _pipeline = self.write_lock.lock().await;
        let data = {
            let state = self.state.read();
            if state.ops_since_save == 0 {
                return Ok(());
            }
            state.map.clone()
        };
        snapshot::write(&self.layout, &data, self.config.backup_retention)?;
        self.wal_handle()?.reset()?;
        self.state.write().ops_since_save = 0;
        debug!(entries = data.len(), "snapshot compaction complete");
        Ok(())
    }

    /// Delete every key whose TTL has expired, through the full delete
    /// path (WAL record, events, watchers, index maintenance, broadcast).
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.ensure_ready()?;
        let expired = self.state.read().ttl.expired(now_millis());
        let mut removed = 0usize;
        for key in expired {
            let _pipeline = self.write_lock.lock().await;
            // the key may have been refreshed since the scan
            let still_expired = self
                .state
                .read()
                .ttl
                .get(&key)
                .map_or(false, |exp| exp <= now_millis());
            if !still_expired {
                continue;
            }
            if self.delete_in_pipeline(&key, WriteOrigin::Local)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "TTL sweep removed expired keys");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> StoreStats {
        let cache = self.cache.stats();
        let state = self.state.read();
        StoreStats {
            reads: self.metrics.reads(),
            writes: self.metrics.writes(),
            hits: cache.hits,
            misses: cache.misses,
            hit_rate: cache.hit_rate,
            size: state.map.len(),
            ttl_count: state.ttl.len(),
        }
    }

    // ========== Background tasks ==========

    fn spawn_background_tasks(&self) {
        // TTL sweeper
        let weak = self.self_ref.clone();
        let mut shutdown = self.shutdown.subscribe();
        let sweep_every = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + sweep_every, sweep_every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let store = match weak.upgrade() {
                            Some(store) => store,
                            None => break,
                        };
                        if let Err(e) = store.sweep_expired().await {
                            warn!(error = %e, "TTL sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("TTL sweeper stopped");
                        break;
                    }
                }
            }
        });

        // autosave compaction
        let weak = self.self_ref.clone();
        let mut shutdown = self.shutdown.subscribe();
        let save_every = self.config.save_interval;
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + save_every, save_every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let store = match weak.upgrade() {
                            Some(store) => store,
                            None => break,
                        };
                        if let Err(e) = store.compact().await {
                            error!(error = %e, "snapshot compaction failed");
                            store.events.emit(&StoreEvent::Error {
                                code: e.error_code(),
                                message: e.to_string(),
                            });
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("autosave task stopped");
                        break;
                    }
                }
            }
        });
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // signal background tasks; a clean close() already did this
        let _ = self.shutdown.send(true);
    }
}
