//! # Remote Client & Replication Transport
//!
//! HTTP access to a running kiri-server: a typed client mirroring the
//! embedded surface, and the [`ReplicationTransport`] implementation the
//! primary uses to reach its followers.

use async_trait::async_trait;
use serde_json::Value;

use kiri_core::traits::ReplicationTransport;
use kiri_core::types::{ReplicationOp, ReplicationStatus, StoreStats};
use kiri_core::{Error, Result};

use crate::server::{DeleteResponse, QueryRequest, QueryRow};

fn transport_err(context: &str, e: reqwest::Error) -> Error {
    Error::Replication {
        message: format!("{context}: {e}"),
    }
}

/// Outbound replication channel over HTTP. Per-request deadlines are
/// enforced by the replication controller, so the client itself carries no
/// timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicationTransport for HttpTransport {
    async fn send_op(&self, endpoint: &str, op: &ReplicationOp) -> Result<()> {
        let url = format!("{}/replication/apply", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(op)
            .send()
            .await
            .map_err(|e| transport_err("broadcast failed", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Replication {
                message: format!("follower answered {}", response.status()),
            })
        }
    }

    async fn ping(&self, endpoint: &str) -> Result<()> {
        let url = format!("{}/replication/ping", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_err("ping failed", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Replication {
                message: format!("ping answered {}", response.status()),
            })
        }
    }
}

/// Typed client for a remote kiri-server.
pub struct RemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteClient {
    /// Connect and verify the server answers its health check.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self> {
        let base_url = endpoint.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::new();

        client
            .get(format!("{base_url}/health"))
            .send()
            .await
            .map_err(|e| transport_err("connection failed", e))?;

        Ok(Self { base_url, client })
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.client
            .get(format!("{}/kv/{key}", self.base_url))
            .send()
            .await
            .map_err(|e| transport_err("get failed", e))?
            .json()
            .await
            .map_err(|e| transport_err("get decode failed", e))
    }

    pub async fn set(&self, key: &str, value: &Value, ttl_ms: Option<i64>) -> Result<()> {
        let mut request = self
            .client
            .put(format!("{}/kv/{key}", self.base_url))
            .json(value);
        if let Some(ttl) = ttl_ms {
            request = request.query(&[("ttl", ttl)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_err("set failed", e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Replication {
                message: format!("set answered {}", response.status()),
            })
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let response: DeleteResponse = self
            .client
            .delete(format!("{}/kv/{key}", self.base_url))
            .send()
            .await
            .map_err(|e| transport_err("delete failed", e))?
            .json()
            .await
            .map_err(|e| transport_err("delete decode failed", e))?;
        Ok(response.deleted)
    }

    pub async fn query(&self, field: &str, op: &str, value: Value) -> Result<Vec<QueryRow>> {
        let request = QueryRequest {
            field: field.to_string(),
            op: op.to_string(),
            value,
        };
        self.client
            .post(format!("{}/query", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_err("query failed", e))?
            .json()
            .await
            .map_err(|e| transport_err("query decode failed", e))
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.client
            .get(format!("{}/stats", self.base_url))
            .send()
            .await
            .map_err(|e| transport_err("stats failed", e))?
            .json()
            .await
            .map_err(|e| transport_err("stats decode failed", e))
    }

    pub async fn status(&self) -> Result<ReplicationStatus> {
        self.client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| transport_err("status failed", e))?
            .json()
            .await
            .map_err(|e| transport_err("status decode failed", e))
    }
}
