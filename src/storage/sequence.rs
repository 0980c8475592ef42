//! Outgoing sequence numbers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Address;
use crate::network::MAX_SEQUENCE;

/// Per-source sequence number counter.
///
/// Cloning yields another handle to the same counters, so the numbers can
/// be read from any thread while the event loop allocates them.
#[derive(Clone, Debug, Default)]
pub struct SequenceCounter {
    next: Arc<Mutex<HashMap<Address, u32>>>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the counter of `source` from storage.
    pub fn restore(&self, source: Address, next: u32) {
        self.next.lock().insert(source, next);
    }

    /// Allocate the next sequence number of `source`.
    ///
    /// Returns `None` once the 24-bit space is exhausted; the source may
    /// not transmit again until the IV Index increases.
    pub fn allocate(&self, source: Address) -> Option<u32> {
        let mut next = self.next.lock();
        let counter = next.entry(source).or_insert(0);
        if *counter > MAX_SEQUENCE {
            return None;
        }
        let sequence = *counter;
        *counter += 1;
        Some(sequence)
    }

    /// Sequence number the next allocation for `source` returns.
    pub fn peek(&self, source: Address) -> u32 {
        self.next.lock().get(&source).copied().unwrap_or(0)
    }

    /// Restart every counter at 0 after the IV Index increased.
    pub fn reset_all(&self) -> Vec<Address> {
        let mut next = self.next.lock();
        for counter in next.values_mut() {
            *counter = 0;
        }
        next.keys().copied().collect()
    }
}
