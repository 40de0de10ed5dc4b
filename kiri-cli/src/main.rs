//! # KiriDB CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::Level;

use kiri_api::RemoteClient;
use kiri_core::config::DatabaseConfig;
use kiri_core::types::ReplicaRole;

#[derive(Parser)]
#[command(name = "kiridb")]
#[command(about = "KiriDB - embeddable file-backed document store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start a server node
    Start {
        /// Snapshot file path
        #[arg(long, default_value = "./data/kiri.db")]
        data: PathBuf,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// Run as a replica instead of a primary
        #[arg(long)]
        replica: bool,
        /// Follower endpoint (repeatable)
        #[arg(long = "follower")]
        followers: Vec<String>,
        #[arg(long)]
        node_id: Option<String>,
    },
    /// Check a server's health
    Health {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
    },
    /// Print a server's stats
    Stats {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
    },
    /// Print a server's replication status
    Status {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            data,
            port,
            replica,
            followers,
            node_id,
        } => {
            tracing_subscriber::fmt()
                .with_max_level(Level::INFO)
                .init();

            let mut config = DatabaseConfig::at(&data);
            config.replication.role = if replica {
                ReplicaRole::Replica
            } else {
                ReplicaRole::Primary
            };
            config.replication.followers = followers;
            config.replication.node_id = node_id;

            kiri_api::run_server(config, &format!("0.0.0.0:{port}")).await?;
        }
        Commands::Health { url } => {
            RemoteClient::connect(&url).await?;
            println!("{url} ok");
        }
        Commands::Stats { url } => {
            let client = RemoteClient::connect(&url).await?;
            let stats = client.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Status { url } => {
            let client = RemoteClient::connect(&url).await?;
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
