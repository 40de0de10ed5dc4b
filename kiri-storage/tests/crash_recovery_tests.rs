//! # Crash Recovery & Compaction Tests
//!
//! Tests for:
//! - WAL replay after a crash (drop without close)
//! - Snapshot compaction and WAL truncation
//! - `clr` semantics across restarts
//! - Backup fallback when the snapshot is corrupt

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use kiri_core::config::DatabaseConfig;
use kiri_core::events::{EventKind, StoreEvent};
use kiri_storage::{SetOptions, Store};

fn config_in(tmp: &TempDir) -> DatabaseConfig {
    DatabaseConfig::at(tmp.path().join("kiri.db"))
}

fn wal_lines(tmp: &TempDir) -> Vec<String> {
    match std::fs::read_to_string(tmp.path().join("kiri.log")) {
        Ok(contents) => contents.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Basic Durability
// =============================================================================

#[tokio::test]
async fn test_basic_durability_after_crash() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    // Session 1: write, then "crash" (drop without close)
    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store.set("a", json!(1)).await.unwrap();
    }

    // Session 2: recover
    let store = Store::new(config);
    store.init().await.unwrap();
    assert_eq!(store.get("a").unwrap(), Some(json!(1)));

    let lines = wal_lines(&tmp);
    assert_eq!(lines.len(), 1, "expected exactly one WAL record");
    assert!(lines[0].contains("\"op\":\"put\""));
    assert!(lines[0].contains("\"k\":\"a\""));
}

#[tokio::test]
async fn test_crash_recovery_larger_dataset() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        for i in 0..500 {
            store
                .set(&format!("k{i}"), json!({"n": i, "payload": "x".repeat(32)}))
                .await
                .unwrap();
        }
        store.delete("k0").await.unwrap();
    }

    let store = Store::new(config);
    store.init().await.unwrap();
    assert_eq!(store.count(), 499);
    assert!(!store.has("k0").unwrap());
    assert_eq!(store.get("k499").unwrap().unwrap()["n"], json!(499));
}

#[tokio::test]
async fn test_failed_writes_leave_no_trace_after_restart() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store.set("good", json!(1)).await.unwrap();
    }

    // simulate a torn final append
    {
        use std::io::Write;
        let mut wal = std::fs::OpenOptions::new()
            .append(true)
            .open(tmp.path().join("kiri.log"))
            .unwrap();
        wal.write_all(b"{\"op\":\"put\",\"k\":\"torn\",\"v\":{\"incom").unwrap();
    }

    let store = Store::new(config);
    store.init().await.unwrap();
    assert!(store.has("good").unwrap());
    assert!(!store.has("torn").unwrap());
}

// =============================================================================
// Compaction
// =============================================================================

#[tokio::test]
async fn test_compaction_truncates_wal_and_keeps_data() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let store = Store::new(config.clone());
    store.init().await.unwrap();

    for i in 0..1000 {
        store.set(&format!("k{i}"), json!(i)).await.unwrap();
    }
    store.compact().await.unwrap();

    // WAL is empty, snapshot holds everything
    assert_eq!(
        std::fs::metadata(tmp.path().join("kiri.log")).unwrap().len(),
        0
    );
    let snapshot: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("kiri.db")).unwrap())
            .unwrap();
    assert_eq!(snapshot.as_object().unwrap().len(), 1000);

    // the next write appends a single fresh record
    store.set("k1000", json!(1000)).await.unwrap();
    assert_eq!(wal_lines(&tmp).len(), 1);

    // a crash now loses nothing
    drop(store);
    let store = Store::new(config);
    store.init().await.unwrap();
    assert_eq!(store.count(), 1001);
    assert_eq!(store.get("k1000").unwrap(), Some(json!(1000)));
}

#[tokio::test]
async fn test_compaction_without_changes_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let store = Store::new(config_in(&tmp));
    store.init().await.unwrap();

    store.set("a", json!(1)).await.unwrap();
    store.compact().await.unwrap();
    let modified = std::fs::metadata(tmp.path().join("kiri.db"))
        .unwrap()
        .modified()
        .unwrap();

    store.compact().await.unwrap();
    let modified_again = std::fs::metadata(tmp.path().join("kiri.db"))
        .unwrap()
        .modified()
        .unwrap();
    assert_eq!(modified, modified_again);
}

#[tokio::test]
async fn test_close_compacts() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let store = Store::new(config.clone());
    store.init().await.unwrap();
    store.set("a", json!({"deep": [1, 2, 3]})).await.unwrap();
    store.close().await.unwrap();

    assert_eq!(
        std::fs::metadata(tmp.path().join("kiri.log")).unwrap().len(),
        0
    );
    let store = Store::new(config);
    store.init().await.unwrap();
    assert_eq!(store.get("a").unwrap(), Some(json!({"deep": [1, 2, 3]})));
}

// =============================================================================
// Clear Across Restart
// =============================================================================

#[tokio::test]
async fn test_clear_record_voids_earlier_writes_on_replay() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();
        store.clear().await.unwrap();
        store.set("c", json!(3)).await.unwrap();
    }

    let store = Store::new(config);
    store.init().await.unwrap();
    assert_eq!(store.count(), 1);
    assert!(!store.has("a").unwrap());
    assert_eq!(store.get("c").unwrap(), Some(json!(3)));
}

// =============================================================================
// Corruption & Backups
// =============================================================================

#[tokio::test]
async fn test_corrupt_snapshot_recovers_from_backup() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store.set("a", json!(1)).await.unwrap();
        store.compact().await.unwrap(); // snapshot v1, no backup yet
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.set("b", json!(2)).await.unwrap();
        store.compact().await.unwrap(); // snapshot v2, backup of v1
    }

    // corrupt the live snapshot
    std::fs::write(tmp.path().join("kiri.db"), b"** not json **").unwrap();

    let store = Store::new(config);
    let ready = Arc::new(Mutex::new(None));
    let ready_in = Arc::clone(&ready);
    store.on(
        EventKind::Ready,
        Arc::new(move |event| {
            if let StoreEvent::Ready { degraded, warning } = event {
                *ready_in.lock() = Some((*degraded, warning.clone()));
            }
        }),
    );
    store.init().await.unwrap();

    // backup held v1; the (truncated-at-compaction) WAL adds nothing
    assert_eq!(store.get("a").unwrap(), Some(json!(1)));
    let (degraded, warning) = ready.lock().clone().unwrap();
    assert!(degraded);
    assert!(warning.unwrap().contains("backup"));
}

#[tokio::test]
async fn test_unrecoverable_snapshot_starts_empty_with_warning() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    std::fs::write(tmp.path().join("kiri.db"), b"garbage").unwrap();

    let store = Store::new(config);
    let degraded = Arc::new(Mutex::new(false));
    let degraded_in = Arc::clone(&degraded);
    store.on(
        EventKind::Ready,
        Arc::new(move |event| {
            if let StoreEvent::Ready { degraded, .. } = event {
                *degraded_in.lock() = *degraded;
            }
        }),
    );
    store.init().await.unwrap();

    assert!(*degraded.lock());
    assert_eq!(store.count(), 0);
    // the degraded store still accepts writes
    store.set("fresh", json!(true)).await.unwrap();
    assert!(store.has("fresh").unwrap());
}

// =============================================================================
// TTL Records Across Restart
// =============================================================================

#[tokio::test]
async fn test_live_ttl_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store
            .set_with("session", json!(1), SetOptions::ttl(60_000))
            .await
            .unwrap();
    }

    let store = Store::new(config);
    store.init().await.unwrap();
    assert_eq!(store.stats().ttl_count, 1);
}

#[tokio::test]
async fn test_expired_ttl_record_is_discarded_on_replay() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    {
        let store = Store::new(config.clone());
        store.init().await.unwrap();
        store
            .set_with("session", json!(1), SetOptions::ttl(20))
            .await
            .unwrap();
    }
    std::thread::sleep(std::time::Duration::from_millis(50));

    let store = Store::new(config);
    store.init().await.unwrap();
    // the expiry lies in the past: the TTL record is dropped at replay
    assert_eq!(store.stats().ttl_count, 0);
    assert!(store.has("session").unwrap());
}
