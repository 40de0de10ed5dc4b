//! # KiriDB Core
//!
//! This crate provides the fundamental building blocks for KiriDB:
//! - The JSON value model and dot-path projection
//! - Error types
//! - Configuration
//! - The event taxonomy and listener bus
//! - Shared replication and statistics types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    kiri-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • value      - Value helpers & ordering        │
//! │  • path       - Dot-path projection             │
//! │  • error      - Error handling                  │
//! │  • config     - Engine configuration            │
//! │  • events     - Event taxonomy & bus            │
//! │  • metrics    - Read/write counters             │
//! │  • types      - Replication & stats types       │
//! │  • traits     - Cross-crate interfaces          │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod path;
pub mod traits;
pub mod types;
pub mod utils;
pub mod value;

// Re-export commonly used types
pub use error::{Error, Result};
pub use events::{EventBus, EventKind, ListenerId, StoreEvent};
pub use types::{
    ConflictEntry, FollowerHealth, RepOpKind, ReplicaRole, ReplicationOp, ReplicationStatus,
    StoreStats, Timestamp,
};

/// The JSON value type stored by the engine.
pub use serde_json::Value;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u32 = 1;
