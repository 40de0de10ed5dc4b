//! # Store Engine Behaviour Tests
//!
//! Covers the public store contract: basic operations, watcher delivery
//! order, event emission, cache coherence and the numeric/array mutators.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use kiri_core::config::DatabaseConfig;
use kiri_core::events::{EventKind, StoreEvent};
use kiri_core::Error;
use kiri_storage::{SetOptions, Store};

fn config_in(tmp: &TempDir) -> DatabaseConfig {
    DatabaseConfig::at(tmp.path().join("kiri.db"))
}

async fn open(tmp: &TempDir) -> Arc<Store> {
    let store = Store::new(config_in(tmp));
    store.init().await.unwrap();
    store
}

// =============================================================================
// Basic Operations
// =============================================================================

#[tokio::test]
async fn test_set_get_has_delete() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.set("user:1", json!({"name": "aiko"})).await.unwrap();
    assert_eq!(store.get("user:1").unwrap(), Some(json!({"name": "aiko"})));
    assert!(store.has("user:1").unwrap());
    assert_eq!(store.count(), 1);

    assert!(store.delete("user:1").await.unwrap());
    assert!(!store.has("user:1").unwrap());
    assert_eq!(store.get("user:1").unwrap(), None);

    // deleting an absent key is a no-op, not an error
    assert!(!store.delete("user:1").await.unwrap());
}

#[tokio::test]
async fn test_all_and_clear() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.set("a", json!(1)).await.unwrap();
    store.set("b", json!(2)).await.unwrap();
    let all = store.all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["a"], json!(1));

    store.clear().await.unwrap();
    assert_eq!(store.count(), 0);
    assert!(store.all().unwrap().is_empty());
}

#[tokio::test]
async fn test_operations_before_init_fail_not_ready() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));

    assert!(matches!(
        store.set("a", json!(1)).await.unwrap_err(),
        Error::NotReady
    ));
    assert!(matches!(store.get("a").unwrap_err(), Error::NotReady));
    assert!(matches!(store.clear().await.unwrap_err(), Error::NotReady));
}

#[tokio::test]
async fn test_set_overwrites_and_reports_old_value() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let olds = Arc::new(Mutex::new(Vec::new()));
    let olds_in = Arc::clone(&olds);
    store.on(
        EventKind::Set,
        Arc::new(move |event| {
            if let StoreEvent::Set { old, .. } = event {
                olds_in.lock().push(old.clone());
            }
        }),
    );

    store.set("k", json!(1)).await.unwrap();
    store.set("k", json!(2)).await.unwrap();

    assert_eq!(*olds.lock(), vec![None, Some(json!(1))]);
    assert_eq!(store.get("k").unwrap(), Some(json!(2)));
}

// =============================================================================
// Watchers
// =============================================================================

#[tokio::test]
async fn test_watchers_fire_in_registration_order_exactly_once() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let log: Arc<Mutex<Vec<(u8, Option<Value>, Option<Value>)>>> =
        Arc::new(Mutex::new(Vec::new()));

    for tag in [1u8, 2u8] {
        let log = Arc::clone(&log);
        store
            .watch(
                "k",
                Arc::new(move |new, old| {
                    log.lock().push((tag, new.cloned(), old.cloned()));
                }),
            )
            .unwrap();
    }

    store.set("k", json!("v1")).await.unwrap();
    store.set("k", json!("v2")).await.unwrap();

    let log = log.lock();
    assert_eq!(
        *log,
        vec![
            (1, Some(json!("v1")), None),
            (2, Some(json!("v1")), None),
            (1, Some(json!("v2")), Some(json!("v1"))),
            (2, Some(json!("v2")), Some(json!("v1"))),
        ]
    );
}

#[tokio::test]
async fn test_watcher_sees_delete_and_unwatch_stops_delivery() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_in = Arc::clone(&calls);
    let id = store
        .watch(
            "k",
            Arc::new(move |new, old| {
                calls_in.lock().push((new.cloned(), old.cloned()));
            }),
        )
        .unwrap();

    store.set("k", json!(1)).await.unwrap();
    store.delete("k").await.unwrap();
    assert_eq!(
        *calls.lock(),
        vec![(Some(json!(1)), None), (None, Some(json!(1)))]
    );

    assert!(store.unwatch("k", Some(id)));
    store.set("k", json!(2)).await.unwrap();
    assert_eq!(calls.lock().len(), 2);
}

#[tokio::test]
async fn test_watchers_are_per_key() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let count = Arc::new(Mutex::new(0));
    let count_in = Arc::clone(&count);
    store
        .watch("watched", Arc::new(move |_, _| *count_in.lock() += 1))
        .unwrap();

    store.set("other", json!(1)).await.unwrap();
    store.set("watched", json!(1)).await.unwrap();
    assert_eq!(*count.lock(), 1);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_event_taxonomy_on_mutations() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let kinds_in = Arc::clone(&kinds);
    store.on_any(Arc::new(move |event| kinds_in.lock().push(event.kind())));

    store.set("a", json!(1)).await.unwrap();
    store.add("n", 5.0).await.unwrap();
    store.push("arr", json!("x")).await.unwrap();
    store.pull("arr", &json!("x")).await.unwrap();
    store.delete("a").await.unwrap();
    store.clear().await.unwrap();

    let kinds = kinds.lock();
    assert_eq!(
        *kinds,
        vec![
            EventKind::Set,                 // set a
            EventKind::Set,                 // add writes n
            EventKind::Add,
            EventKind::Set,                 // push writes arr
            EventKind::Push,
            EventKind::Set,                 // pull writes arr
            EventKind::Pull,
            EventKind::Delete,
            EventKind::Clear,
        ]
    );
}

#[tokio::test]
async fn test_ready_event_fires_on_init() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));

    let ready = Arc::new(Mutex::new(None));
    let ready_in = Arc::clone(&ready);
    store.on(
        EventKind::Ready,
        Arc::new(move |event| {
            if let StoreEvent::Ready { degraded, .. } = event {
                *ready_in.lock() = Some(*degraded);
            }
        }),
    );

    store.init().await.unwrap();
    assert_eq!(*ready.lock(), Some(false));
}

#[tokio::test]
async fn test_close_event_and_idempotent_close() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let closed = Arc::new(Mutex::new(0));
    let closed_in = Arc::clone(&closed);
    store.on(EventKind::Close, Arc::new(move |_| *closed_in.lock() += 1));

    store.set("a", json!(1)).await.unwrap();
    store.close().await.unwrap();
    store.close().await.unwrap();
    assert_eq!(*closed.lock(), 1);
    assert!(!store.is_ready());
}

// =============================================================================
// Cache Coherence
// =============================================================================

#[tokio::test]
async fn test_cache_never_serves_stale_values() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.set("k", json!(1)).await.unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!(1)));
    // overwrite must be visible immediately despite the cached copy
    store.set("k", json!(2)).await.unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!(2)));

    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").unwrap(), None);
}

#[tokio::test]
async fn test_cache_eviction_does_not_touch_the_store() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.cache_limit = 2;
    let store = Store::new(config);
    store.init().await.unwrap();

    for i in 0..10 {
        store.set(&format!("k{i}"), json!(i)).await.unwrap();
    }
    // every key is still readable even though the cache only holds two
    for i in 0..10 {
        assert_eq!(store.get(&format!("k{i}")).unwrap(), Some(json!(i)));
    }
    assert_eq!(store.count(), 10);
}

#[tokio::test]
async fn test_stats_track_reads_writes_hits_misses() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.set("a", json!(1)).await.unwrap();
    store.get("a").unwrap(); // hit: set wrote through
    store.get("missing").unwrap(); // miss

    let stats = store.stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.reads, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.size, 1);
    assert_eq!(stats.ttl_count, 0);
}

// =============================================================================
// Numeric & Array Mutators
// =============================================================================

#[tokio::test]
async fn test_add_and_subtract_coerce_to_zero() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    assert_eq!(store.add("counter", 5.0).await.unwrap(), 5.0);
    assert_eq!(store.subtract("counter", 2.0).await.unwrap(), 3.0);
    assert_eq!(store.get("counter").unwrap(), Some(json!(3.0)));

    // a non-numeric stored value coerces to 0
    store.set("label", json!("not a number")).await.unwrap();
    assert_eq!(store.add("label", 4.0).await.unwrap(), 4.0);

    // subtracting from a missing key counts down from 0
    assert_eq!(store.subtract("debt", 7.0).await.unwrap(), -7.0);
}

#[tokio::test]
async fn test_push_and_pull() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    assert_eq!(store.push("tags", json!("a")).await.unwrap(), 1);
    assert_eq!(store.push("tags", json!("b")).await.unwrap(), 2);
    assert_eq!(store.push("tags", json!("a")).await.unwrap(), 3);

    assert_eq!(store.pull("tags", &json!("a")).await.unwrap(), 2);
    assert_eq!(store.get("tags").unwrap(), Some(json!(["b"])));

    // pulling a value that is not there removes nothing
    assert_eq!(store.pull("tags", &json!("zzz")).await.unwrap(), 0);
    // pulling from a missing key is a no-op
    assert_eq!(store.pull("absent", &json!(1)).await.unwrap(), 0);

    store.set("scalar", json!(5)).await.unwrap();
    assert!(store.push("scalar", json!(1)).await.is_err());
    assert!(store.pull("scalar", &json!(1)).await.is_err());
}

// =============================================================================
// Interceptors
// =============================================================================

struct Redactor;

impl kiri_core::traits::ReadInterceptor for Redactor {
    fn after_read(&self, _key: &str, mut value: Value) -> Value {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("password");
        }
        value
    }
}

struct RejectEmpty;

impl kiri_core::traits::WriteInterceptor for RejectEmpty {
    fn before_write(&self, _key: &str, value: Value) -> kiri_core::Result<Value> {
        if value == json!({}) {
            return Err(Error::Validation {
                message: "empty documents are rejected".to_string(),
            });
        }
        Ok(value)
    }
}

#[tokio::test]
async fn test_interceptors_transform_and_veto() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.add_read_interceptor(Arc::new(Redactor));
    store.add_write_interceptor(Arc::new(RejectEmpty));

    store
        .set("u", json!({"name": "aiko", "password": "hunter2"}))
        .await
        .unwrap();
    assert_eq!(store.get("u").unwrap(), Some(json!({"name": "aiko"})));

    // vetoed write leaves no state behind
    assert!(store.set("bad", json!({})).await.is_err());
    assert!(!store.has("bad").unwrap());
}

// =============================================================================
// TTL option plumbing
// =============================================================================

#[tokio::test]
async fn test_set_with_ttl_populates_table() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store
        .set_with("session", json!({"u": "x"}), SetOptions::ttl(60_000))
        .await
        .unwrap();
    assert_eq!(store.stats().ttl_count, 1);

    // a plain set clears the TTL entry
    store.set("session", json!({"u": "y"})).await.unwrap();
    assert_eq!(store.stats().ttl_count, 0);
}
