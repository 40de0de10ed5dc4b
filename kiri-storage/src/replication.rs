//! Replication controller.
//!
//! The primary enqueues every durable non-internal mutation from inside the
//! writer critical section; a dedicated task drains the FIFO and delivers
//! each op to every follower with a bounded per-request timeout. Broadcast
//! order therefore equals WAL order, and a slow or dead follower can only
//! fail its own delivery, never the primary's write path. Follower health
//! is tracked per endpoint and exposed through `status()`. Buffered replay
//! of ops missed while a follower was down is intentionally absent;
//! operator-driven resync is the recovery path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use kiri_core::config::ReplicationConfig;
use kiri_core::traits::ReplicationTransport;
use kiri_core::types::{FollowerHealth, ReplicaRole, ReplicationOp, ReplicationStatus};
use kiri_core::{Error, Result, Value};

/// Consecutive failures after which a follower is marked down.
const DOWN_AFTER_FAILURES: u32 = 3;

pub type ConflictHook = Arc<dyn Fn(&Value, &Value, &ReplicationOp) -> Value + Send + Sync>;

type HealthTable = Arc<RwLock<HashMap<String, FollowerHealth>>>;

pub struct ReplicationController {
    role: ReplicaRole,
    node_id: String,
    followers: Vec<String>,
    health: HealthTable,
    tx: Option<mpsc::UnboundedSender<ReplicationOp>>,
    on_conflict: RwLock<Option<ConflictHook>>,
}

impl ReplicationController {
    /// Build the controller and spawn the broadcast and heartbeat tasks
    /// when this node is a primary with followers.
    pub fn new(
        config: &ReplicationConfig,
        transport: Option<Arc<dyn ReplicationTransport>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| format!("node-{:016x}", rand::random::<u64>()));

        let broadcasting = config.role == ReplicaRole::Primary && !config.followers.is_empty();

        let health: HealthTable = Arc::new(RwLock::new(
            config
                .followers
                .iter()
                .map(|f| (f.clone(), FollowerHealth::new(f.clone())))
                .collect(),
        ));

        let tx = if broadcasting {
            let transport = transport.ok_or_else(|| Error::Configuration {
                message: "primary has followers configured but no replication transport"
                    .to_string(),
            })?;
            let (tx, rx) = mpsc::unbounded_channel();
            spawn_broadcast_task(
                rx,
                transport.clone(),
                config.followers.clone(),
                Arc::clone(&health),
                config.request_timeout,
                shutdown.clone(),
            );
            spawn_heartbeat_task(
                transport,
                config.followers.clone(),
                Arc::clone(&health),
                config.sync_interval,
                config.request_timeout,
                shutdown,
            );
            Some(tx)
        } else {
            None
        };

        info!(%node_id, role = ?config.role, followers = config.followers.len(), "replication controller started");

        Ok(Self {
            role: config.role,
            node_id,
            followers: config.followers.clone(),
            health,
            tx,
            on_conflict: RwLock::new(None),
        })
    }

    pub fn role(&self) -> ReplicaRole {
        self.role
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_primary(&self) -> bool {
        self.role == ReplicaRole::Primary
    }

    /// Queue one mutation for broadcast. Called from the writer critical
    /// section; never blocks on the network.
    pub fn enqueue(&self, op: ReplicationOp) {
        if let Some(tx) = &self.tx {
            if tx.send(op).is_err() {
                warn!("replication task gone; dropping broadcast");
            }
        }
    }

    pub fn set_conflict_hook(&self, hook: ConflictHook) {
        *self.on_conflict.write() = Some(hook);
    }

    /// Resolve an incoming op against a conflicting local value. Returns
    /// the winning value and the strategy label recorded in the conflict
    /// log.
    pub fn resolve_conflict(
        &self,
        local: &Value,
        remote: &Value,
        op: &ReplicationOp,
    ) -> (Value, &'static str) {
        if let Some(hook) = self.on_conflict.read().as_ref() {
            (hook(local, remote, op), "custom")
        } else {
            // the primary is the source of truth
            (remote.clone(), "lww_remote")
        }
    }

    pub fn status(&self) -> ReplicationStatus {
        let health = self.health.read();
        let mut followers: Vec<FollowerHealth> = self
            .followers
            .iter()
            .filter_map(|f| health.get(f).cloned())
            .collect();
        followers.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        ReplicationStatus {
            role: self.role,
            node_id: self.node_id.clone(),
            followers,
        }
    }
}

fn mark_success(health: &HealthTable, endpoint: &str, rtt: Duration, now: u64) {
    let mut health = health.write();
    if let Some(entry) = health.get_mut(endpoint) {
        entry.alive = true;
        entry.fail_count = 0;
        entry.last_ping = Some(now);
        entry.lag_ms = Some(rtt.as_millis() as u64);
    }
}

fn mark_failure(health: &HealthTable, endpoint: &str) {
    let mut health = health.write();
    if let Some(entry) = health.get_mut(endpoint) {
        entry.fail_count += 1;
        if entry.fail_count >= DOWN_AFTER_FAILURES {
            if entry.alive {
                warn!(endpoint, failures = entry.fail_count, "follower marked down");
            }
            entry.alive = false;
        }
    }
}

fn spawn_broadcast_task(
    mut rx: mpsc::UnboundedReceiver<ReplicationOp>,
    transport: Arc<dyn ReplicationTransport>,
    followers: Vec<String>,
    health: HealthTable,
    request_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                op = rx.recv() => {
                    let op = match op {
                        Some(op) => op,
                        None => break,
                    };
                    for endpoint in &followers {
                        let started = Instant::now();
                        match timeout(request_timeout, transport.send_op(endpoint, &op)).await {
                            Ok(Ok(())) => mark_success(
                                &health,
                                endpoint,
                                started.elapsed(),
                                kiri_core::utils::now_millis(),
                            ),
                            Ok(Err(e)) => {
                                debug!(%endpoint, error = %e, "broadcast failed");
                                mark_failure(&health, endpoint);
                            }
                            Err(_) => {
                                debug!(%endpoint, "broadcast timed out");
                                mark_failure(&health, endpoint);
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("broadcast task stopping");
                    break;
                }
            }
        }
    });
}

fn spawn_heartbeat_task(
    transport: Arc<dyn ReplicationTransport>,
    followers: Vec<String>,
    health: HealthTable,
    sync_interval: Duration,
    request_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = interval(sync_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for endpoint in &followers {
                        let started = Instant::now();
                        match timeout(request_timeout, transport.ping(endpoint)).await {
                            Ok(Ok(())) => mark_success(
                                &health,
                                endpoint,
                                started.elapsed(),
                                kiri_core::utils::now_millis(),
                            ),
                            _ => mark_failure(&health, endpoint),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("heartbeat task stopping");
                    break;
                }
            }
        }
    });
}
