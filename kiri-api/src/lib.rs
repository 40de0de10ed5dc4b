//! # KiriDB API
//!
//! The network surface over the store engine: an axum REST router (kv,
//! query, replication inbound, heartbeat, status), the reqwest-backed
//! remote client and replication transport, and the embedded client facade
//! hosts link against.

pub mod client;
pub mod remote;
pub mod server;

pub use client::KiriClient;
pub use remote::{HttpTransport, RemoteClient};
pub use server::{create_router, run_server, AppState};
