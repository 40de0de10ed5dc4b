//! TTL side-table: key -> absolute expiry (ms since epoch).
//!
//! Presence implies eventual auto-delete by the sweeper. The table is
//! mutated only inside the writer critical section, in lockstep with the
//! map: a set without TTL clears the entry, a delete removes it.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct TtlTable {
    entries: HashMap<String, u64>,
}

impl TtlTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, expires_at: u64) {
        self.entries.insert(key.into(), expires_at);
    }

    pub fn remove(&mut self, key: &str) -> Option<u64> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys whose expiry is at or before `now`.
    pub fn expired(&self, now: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, exp)| **exp <= now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
