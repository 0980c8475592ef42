//! Caching Entities
//!
//! Bounded cache of recently received raw Network PDUs. Every non-beacon
//! PDU is looked up before decryption so that relayed and repeated copies
//! of the same PDU are processed once.

mod dedup;
mod entry;

pub use dedup::{PduCache, DEFAULT_PDU_CACHE_SIZE, DEFAULT_PDU_CACHE_TTL_MS};
pub use entry::CacheEntry;
