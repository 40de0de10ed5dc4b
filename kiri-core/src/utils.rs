//! # Common Utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

/// Absolute expiry for a relative TTL. Zero and negative TTLs produce an
/// expiry at or before "now", making the key eligible at the next sweep.
pub fn expiry_for_ttl(now: u64, ttl_ms: i64) -> u64 {
    if ttl_ms >= 0 {
        now.saturating_add(ttl_ms as u64)
    } else {
        now.saturating_sub(ttl_ms.unsigned_abs())
    }
}
