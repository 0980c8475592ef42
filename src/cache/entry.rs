//! Cache entry with TTL and LRU tracking.

/// Timestamps of a cached PDU.
#[derive(Clone, Copy, Debug)]
pub struct CacheEntry {
    /// When this entry was last seen (Unix milliseconds).
    last_seen: u64,
    /// When this entry expires (Unix milliseconds).
    expires_at: u64,
}

impl CacheEntry {
    pub fn new(current_time_ms: u64, ttl_ms: u64) -> Self {
        Self {
            last_seen: current_time_ms,
            expires_at: current_time_ms.saturating_add(ttl_ms),
        }
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn is_expired(&self, current_time_ms: u64) -> bool {
        current_time_ms > self.expires_at
    }

    /// Record another sighting, extending the expiry.
    pub fn refresh(&mut self, current_time_ms: u64, ttl_ms: u64) {
        self.last_seen = current_time_ms;
        self.expires_at = current_time_ms.saturating_add(ttl_ms);
    }

    /// Time since last sighting (for LRU eviction).
    pub fn idle_time(&self, current_time_ms: u64) -> u64 {
        current_time_ms.saturating_sub(self.last_seen)
    }
}
