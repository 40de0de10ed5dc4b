//! # KiriDB Server
//!
//! Run with: `cargo run --bin kiri-server -- --data ./data/kiri.db --port 3000`
//!
//! Replication flags: `--replica` turns the node into a follower;
//! `--follower <url>` (repeatable) gives a primary its fan-out targets.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, Level};

use kiri_core::config::DatabaseConfig;
use kiri_core::types::ReplicaRole;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let data = args
        .iter()
        .position(|a| a == "--data")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/kiri.db"));

    let port: u16 = args
        .iter()
        .position(|a| a == "--port")
        .and_then(|i| args.get(i + 1))
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let node_id = args
        .iter()
        .position(|a| a == "--node-id")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let followers: Vec<String> = args
        .iter()
        .enumerate()
        .filter(|(_, a)| *a == "--follower")
        .filter_map(|(i, _)| args.get(i + 1).cloned())
        .collect();

    let role = if args.iter().any(|a| a == "--replica") {
        ReplicaRole::Replica
    } else {
        ReplicaRole::Primary
    };

    let mut config = DatabaseConfig::at(&data);
    config.replication.role = role;
    config.replication.node_id = node_id;
    config.replication.followers = followers;

    let addr = format!("0.0.0.0:{port}");
    info!(data = %data.display(), ?role, "starting kiri-server");

    kiri_api::run_server(config, &addr).await
}
