//! # KiriDB Store Engine
//!
//! File-backed document store: an in-memory key→JSON map made durable by a
//! write-ahead log with periodic snapshot compaction.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                              │
//! │                                                              │
//! │  set/delete ──> WAL append ──> map + cache + TTL + indexes  │
//! │                   │                    │                     │
//! │                   ▼                    ▼                     │
//! │               fsync (opt)     events ─> watchers             │
//! │                                        │                     │
//! │                                        ▼                     │
//! │                            replication broadcast (primary)   │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                               │
//! │                                                              │
//! │  get ──> hot cache (LRU) ──miss──> map ──> cache fill        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutations serialise through a single write pipeline; the order of
//! records in the WAL equals the order of acknowledgement to callers.

pub mod cache;
pub mod collection;
pub mod interceptor;
pub mod layout;
pub mod registry;
pub mod replication;
pub mod snapshot;
pub mod store;
pub mod ttl;
pub mod wal;
pub mod watch;

pub use cache::{CacheStats, HotCache};
pub use collection::{doc_matches, Collection, FieldRule, FieldType, Schema};
pub use interceptor::InterceptorChain;
pub use layout::StorageLayout;
pub use registry::StoreRegistry;
pub use replication::{ConflictHook, ReplicationController};
pub use store::{SetOptions, Store};
pub use wal::{Wal, WalOp, WalRecord};
pub use watch::{WatcherId, WatcherRegistry};
