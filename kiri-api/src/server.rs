//! # HTTP Server Implementation
//!
//! REST API over the store engine. Mutating kv routes are refused with 409
//! on replicas; a replica only changes through the replication inbound
//! endpoint, which acknowledges receipt-and-application with a 2xx.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kiri_core::config::DatabaseConfig;
use kiri_core::types::{ReplicaRole, ReplicationOp, ReplicationStatus, StoreStats};
use kiri_core::utils::now_millis;
use kiri_core::Error;
use kiri_storage::{SetOptions, Store};

// ========== API Types ==========

#[derive(Debug, Serialize, Deserialize)]
pub struct SetParams {
    #[serde(default)]
    pub ttl: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRequest {
    pub field: String,
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryRow {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub applied: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub node_id: String,
    pub ts: u64,
}

// ========== Server State ==========

pub struct AppState {
    pub store: Arc<Store>,
}

impl AppState {
    pub async fn new(config: DatabaseConfig) -> kiri_core::Result<Self> {
        let store = Store::with_transport(
            config,
            Some(Arc::new(crate::remote::HttpTransport::new())),
        );
        store.init().await?;
        Ok(Self { store })
    }
}

fn error_response(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        Error::Validation { .. } => StatusCode::BAD_REQUEST,
        Error::ConstraintViolation { .. } => StatusCode::CONFLICT,
        Error::Replication { .. } => StatusCode::BAD_REQUEST,
        Error::Configuration { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Replicas only mutate through the replication channel.
fn reject_replica_write(store: &Store) -> Result<(), (StatusCode, String)> {
    if store.role() == ReplicaRole::Replica {
        return Err(error_response(Error::ConstraintViolation {
            message: "replica rejects local writes; send them to the primary".to_string(),
        }));
    }
    Ok(())
}

// ========== Routes ==========

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/status", get(status))
        .route("/kv", get(all_entries))
        .route("/kv/:key", get(get_key).put(put_key).delete(delete_key))
        .route("/query", post(run_query))
        .route("/replication/apply", post(apply_op))
        .route("/replication/ping", get(ping))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(config: DatabaseConfig, addr: &str) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config).await?);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "kiri-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StoreStats> {
    Json(state.store.stats())
}

async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReplicationStatus>, (StatusCode, String)> {
    state.store.status().map(Json).map_err(error_response)
}

async fn all_entries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let all = state.store.all().map_err(error_response)?;
    Ok(Json(serde_json::to_value(all).unwrap_or(Value::Null)))
}

async fn get_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Option<Value>>, (StatusCode, String)> {
    state.store.get(&key).map(Json).map_err(error_response)
}

async fn put_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<SetParams>,
    Json(value): Json<Value>,
) -> Result<StatusCode, (StatusCode, String)> {
    reject_replica_write(&state.store)?;
    let options = SetOptions { ttl_ms: params.ttl };
    state
        .store
        .set_with(&key, value, options)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    reject_replica_write(&state.store)?;
    let deleted = state.store.delete(&key).await.map_err(error_response)?;
    Ok(Json(DeleteResponse { deleted }))
}

async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Vec<QueryRow>>, (StatusCode, String)> {
    let results = state
        .store
        .query(&request.field, &request.op, request.value)
        .map_err(error_response)?;
    let rows = results
        .into_iter()
        .map(|(key, value)| QueryRow { key, value })
        .collect();
    Ok(Json(rows))
}

async fn apply_op(
    State(state): State<Arc<AppState>>,
    Json(op): Json<ReplicationOp>,
) -> Result<Json<ApplyResponse>, (StatusCode, String)> {
    state.store.apply_op(op).await.map_err(error_response)?;
    Ok(Json(ApplyResponse { applied: true }))
}

async fn ping(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PingResponse>, (StatusCode, String)> {
    let node_id = state.store.node_id().map_err(error_response)?;
    Ok(Json(PingResponse {
        node_id,
        ts: now_millis(),
    }))
}
