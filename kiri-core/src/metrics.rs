//! # Metrics
//!
//! Lock-free counters for the store's read/write traffic. Cache hit/miss
//! accounting lives with the cache itself; the store combines both into the
//! stats snapshot it surfaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct StoreMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_read(&self) {
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}
