//! # Configuration Management
//!
//! Handles all configuration for the KiriDB engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::ReplicaRole;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the snapshot file (`<base>.<ext>`). The WAL, backups and the
    /// in-flight temp file are derived from it as siblings.
    pub path: PathBuf,
    /// Maximum number of entries kept in the hot cache.
    pub cache_limit: usize,
    /// Interval of the automatic snapshot compaction task.
    pub save_interval: Duration,
    /// Interval of the TTL sweeper.
    pub sweep_interval: Duration,
    /// Number of snapshot backups to retain.
    pub backup_retention: usize,
    pub wal: WalConfig,
    pub replication: ReplicationConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/kiri.db"),
            cache_limit: 1024,
            save_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            backup_retention: 5,
            wal: WalConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Convenience constructor used by hosts and tests.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Write-ahead log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Fsync after every append. Turning this off trades the crash-loss
    /// window of the OS page cache for append throughput.
    pub sync_on_write: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self { sync_on_write: true }
    }
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub role: ReplicaRole,
    /// Stable node identity; generated when absent.
    pub node_id: Option<String>,
    /// Follower endpoints the primary broadcasts to.
    pub followers: Vec<String>,
    /// Heartbeat interval.
    pub sync_interval: Duration,
    /// Per-request timeout for broadcasts and heartbeats.
    pub request_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            role: ReplicaRole::Primary,
            node_id: None,
            followers: Vec::new(),
            sync_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.cache_limit, 1024);
        assert_eq!(config.save_interval, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.backup_retention, 5);
        assert!(config.wal.sync_on_write);
        assert_eq!(config.replication.role, ReplicaRole::Primary);
        assert_eq!(config.replication.request_timeout, Duration::from_secs(5));
    }
}
