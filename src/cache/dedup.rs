//! Dedup cache of raw incoming PDUs.

use std::collections::HashMap;

use super::entry::CacheEntry;

/// Default maximum number of remembered PDUs.
pub const DEFAULT_PDU_CACHE_SIZE: usize = 1_000;

/// Default lifetime of a remembered PDU (1 minute in milliseconds).
pub const DEFAULT_PDU_CACHE_TTL_MS: u64 = 60_000;

/// Bounded cache of raw PDU bytes.
///
/// Eviction removes an expired entry first, then the least recently seen.
#[derive(Clone, Debug)]
pub struct PduCache {
    entries: HashMap<Vec<u8>, CacheEntry>,
    max_entries: usize,
    ttl_ms: u64,
}

impl PduCache {
    pub fn new(max_entries: usize, ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(1000)),
            max_entries,
            ttl_ms,
        }
    }

    /// Records `pdu`, returning true if it was not seen before (or expired).
    pub fn insert_if_new(&mut self, pdu: &[u8], current_time_ms: u64) -> bool {
        if self.max_entries == 0 {
            return true;
        }
        if let Some(entry) = self.entries.get_mut(pdu) {
            let expired = entry.is_expired(current_time_ms);
            entry.refresh(current_time_ms, self.ttl_ms);
            return expired;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_one(current_time_ms);
        }
        self.entries
            .insert(pdu.to_vec(), CacheEntry::new(current_time_ms, self.ttl_ms));
        true
    }

    /// Check if a PDU is cached (and not expired).
    pub fn contains(&self, pdu: &[u8], current_time_ms: u64) -> bool {
        self.entries
            .get(pdu)
            .is_some_and(|e| !e.is_expired(current_time_ms))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries.
    pub fn purge_expired(&mut self, current_time_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(current_time_ms));
        before - self.entries.len()
    }

    /// Evict one entry (expired first, then LRU).
    fn evict_one(&mut self, current_time_ms: u64) {
        let victim = self
            .entries
            .iter()
            .find(|(_, e)| e.is_expired(current_time_ms))
            .or_else(|| {
                self.entries
                    .iter()
                    .max_by_key(|(_, e)| e.idle_time(current_time_ms))
            })
            .map(|(k, _)| k.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}
