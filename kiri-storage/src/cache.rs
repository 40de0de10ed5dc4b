//! Hot cache: a bounded LRU over recently touched entries.
//!
//! The cache is written through on every set and invalidated on delete, so
//! it never serves a value that differs from the store map. Eviction only
//! drops the cache entry, never the underlying key.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

pub struct HotCache {
    lru: Mutex<LruCache<String, Value>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl HotCache {
    pub fn new(limit: usize) -> Self {
        let limit = NonZeroUsize::new(limit.max(1)).unwrap();
        Self {
            lru: Mutex::new(LruCache::new(limit)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Lookup with promotion and hit/miss accounting.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut lru = self.lru.lock();
        match lru.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Lookup without promotion or accounting (tests, invariant checks).
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.lru.lock().peek(key).cloned()
    }

    /// Insert or refresh; at capacity the least-recently-used entry falls
    /// out.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.lru.lock().push(key.into(), value);
    }

    pub fn remove(&self, key: &str) {
        self.lru.lock().pop(key);
    }

    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.len(),
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}
