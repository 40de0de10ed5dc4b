//! # TTL Expiry Tests
//!
//! The sweeper deletes expired keys through the full delete path, so
//! expiry must produce WAL records, events and watcher notifications like
//! any other delete.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use kiri_core::config::DatabaseConfig;
use kiri_core::events::{EventKind, StoreEvent};
use kiri_storage::{SetOptions, Store};

fn config_in(tmp: &TempDir) -> DatabaseConfig {
    DatabaseConfig::at(tmp.path().join("kiri.db"))
}

#[tokio::test]
async fn test_session_expiry_via_sweep() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));
    store.init().await.unwrap();

    let deletes = Arc::new(Mutex::new(Vec::new()));
    let deletes_in = Arc::clone(&deletes);
    store.on(
        EventKind::Delete,
        Arc::new(move |event| {
            if let StoreEvent::Delete { key, .. } = event {
                deletes_in.lock().push(key.clone());
            }
        }),
    );

    store
        .set_with("session", json!({"u": "x"}), SetOptions::ttl(30))
        .await
        .unwrap();
    assert!(store.has("session").unwrap());

    tokio::time::sleep(Duration::from_millis(80)).await;
    let removed = store.sweep_expired().await.unwrap();

    assert_eq!(removed, 1);
    assert!(!store.has("session").unwrap());
    assert_eq!(store.stats().ttl_count, 0);
    // the delete event fired exactly once
    assert_eq!(*deletes.lock(), vec!["session".to_string()]);

    // sweeping again changes nothing
    assert_eq!(store.sweep_expired().await.unwrap(), 0);
    assert_eq!(deletes.lock().len(), 1);
}

#[tokio::test]
async fn test_zero_and_negative_ttl_expire_at_next_sweep() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));
    store.init().await.unwrap();

    store
        .set_with("zero", json!(1), SetOptions::ttl(0))
        .await
        .unwrap();
    store
        .set_with("negative", json!(2), SetOptions::ttl(-500))
        .await
        .unwrap();
    store.set("forever", json!(3)).await.unwrap();

    assert_eq!(store.sweep_expired().await.unwrap(), 2);
    assert!(!store.has("zero").unwrap());
    assert!(!store.has("negative").unwrap());
    assert!(store.has("forever").unwrap());
}

#[tokio::test]
async fn test_unexpired_keys_survive_sweep() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));
    store.init().await.unwrap();

    store
        .set_with("long", json!(1), SetOptions::ttl(60_000))
        .await
        .unwrap();
    assert_eq!(store.sweep_expired().await.unwrap(), 0);
    assert!(store.has("long").unwrap());
    assert_eq!(store.stats().ttl_count, 1);
}

#[tokio::test]
async fn test_overwrite_without_ttl_cancels_expiry() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));
    store.init().await.unwrap();

    store
        .set_with("k", json!(1), SetOptions::ttl(20))
        .await
        .unwrap();
    store.set("k", json!(2)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.sweep_expired().await.unwrap(), 0);
    assert_eq!(store.get("k").unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_delete_clears_ttl_entry() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));
    store.init().await.unwrap();

    store
        .set_with("k", json!(1), SetOptions::ttl(60_000))
        .await
        .unwrap();
    store.delete("k").await.unwrap();
    assert_eq!(store.stats().ttl_count, 0);
}

#[tokio::test]
async fn test_background_sweeper_runs_without_manual_calls() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.sweep_interval = Duration::from_millis(25);
    let store = Store::new(config);
    store.init().await.unwrap();

    store
        .set_with("ephemeral", json!(1), SetOptions::ttl(5))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!store.has("ephemeral").unwrap());
}

#[tokio::test]
async fn test_expiry_goes_through_the_wal() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store
            .set_with("gone", json!(1), SetOptions::ttl(0))
            .await
            .unwrap();
        store.sweep_expired().await.unwrap();
    }

    // the sweep's delete was logged: the key stays gone after replay
    let store = Store::new(config);
    store.init().await.unwrap();
    assert!(!store.has("gone").unwrap());
}
