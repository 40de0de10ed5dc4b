//! # Core Traits
//!
//! Interfaces at the engine's seams.
//!
//! ## Design Philosophy
//!
//! 1. **Async at IO boundaries**: the replication transport is async
//! 2. **Error Propagation**: all fallible operations return `Result`
//! 3. **Testability**: seams allow in-memory mocks (see the replication
//!    tests in `kiri-storage`)

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ReplicationOp;
use serde_json::Value;

/// Outbound replication channel. The HTTP implementation lives in
/// `kiri-api`; tests use in-memory mocks.
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Deliver one mutation to a follower. 2xx-equivalent success means the
    /// follower received *and applied* the op.
    async fn send_op(&self, endpoint: &str, op: &ReplicationOp) -> Result<()>;

    /// Heartbeat ping.
    async fn ping(&self, endpoint: &str) -> Result<()>;
}

/// Write-side middleware. Interceptors run in registration order; the value
/// returned by each feeds the next, and an `Err` vetoes the write before
/// anything reaches the WAL.
pub trait WriteInterceptor: Send + Sync {
    fn before_write(&self, key: &str, value: Value) -> Result<Value> {
        let _ = key;
        Ok(value)
    }

    /// Runs after the mutation is durable and applied.
    fn after_write(&self, key: &str, value: &Value) {
        let _ = (key, value);
    }
}

/// Read-side middleware, mirror of [`WriteInterceptor`].
pub trait ReadInterceptor: Send + Sync {
    fn before_read(&self, key: &str) -> Result<()> {
        let _ = key;
        Ok(())
    }

    /// May transform the value handed back to the caller.
    fn after_read(&self, key: &str, value: Value) -> Value {
        let _ = key;
        value
    }
}
