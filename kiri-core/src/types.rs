//! # Shared Types
//!
//! Types that cross crate boundaries: the replication wire op, role and
//! health structures, and the stats snapshot surfaced by the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Role of a node in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    /// Sole write origin; broadcasts every non-internal mutation.
    Primary,
    /// Applies mutations received through the replication channel.
    Replica,
}

impl Default for ReplicaRole {
    fn default() -> Self {
        ReplicaRole::Primary
    }
}

/// Kind of a replicated mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepOpKind {
    Set,
    Delete,
    Clear,
}

/// Wire format of one replicated mutation: `{op, key, value?, ts, node_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOp {
    pub op: RepOpKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub ts: Timestamp,
    pub node_id: String,
}

impl ReplicationOp {
    pub fn set(key: impl Into<String>, value: Value, ts: Timestamp, node_id: impl Into<String>) -> Self {
        Self {
            op: RepOpKind::Set,
            key: key.into(),
            value: Some(value),
            ts,
            node_id: node_id.into(),
        }
    }

    pub fn delete(key: impl Into<String>, ts: Timestamp, node_id: impl Into<String>) -> Self {
        Self {
            op: RepOpKind::Delete,
            key: key.into(),
            value: None,
            ts,
            node_id: node_id.into(),
        }
    }

    pub fn clear(ts: Timestamp, node_id: impl Into<String>) -> Self {
        Self {
            op: RepOpKind::Clear,
            key: String::new(),
            value: None,
            ts,
            node_id: node_id.into(),
        }
    }
}

/// Health record the primary keeps per follower endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerHealth {
    pub endpoint: String,
    pub alive: bool,
    pub fail_count: u32,
    /// Last successful contact, ms since epoch.
    pub last_ping: Option<Timestamp>,
    /// Observed round-trip of the last successful request.
    pub lag_ms: Option<u64>,
}

impl FollowerHealth {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            alive: true,
            fail_count: 0,
            last_ping: None,
            lag_ms: None,
        }
    }
}

/// One resolved replica conflict, appended to the bounded conflict log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub key: String,
    pub local_ts: Timestamp,
    pub remote_ts: Timestamp,
    /// `lww_remote` for the default policy, `custom` for a configured hook.
    pub strategy: String,
    /// Originating node of the remote op.
    pub node_id: String,
    pub resolved_at: Timestamp,
}

/// Replication state surfaced through `status()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub role: ReplicaRole,
    pub node_id: String,
    pub followers: Vec<FollowerHealth>,
}

/// Store statistics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub ttl_count: usize,
}
