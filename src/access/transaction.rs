//! Transaction identifiers.
//!
//! Every (source element, destination) pair keeps the TID of its last
//! transaction. A message continuing the transaction reuses it while the
//! transaction is active; anything else starts a new one.

use std::collections::HashMap;

use rand::Rng;

use crate::model::Address;

/// A transaction stays active this long after its last message.
pub const TRANSACTION_TIMEOUT_MS: u64 = 6_000;

/// Upper bound on tracked (source, destination) pairs.
const MAX_TRANSACTIONS: usize = 1_024;

#[derive(Clone, Copy, Debug)]
struct Transaction {
    tid: u8,
    last_used_ms: u64,
}

impl Transaction {
    fn is_active(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_used_ms) < TRANSACTION_TIMEOUT_MS
    }
}

/// Outgoing TID state.
#[derive(Debug, Default)]
pub struct TransactionTable {
    entries: HashMap<(Address, Address), Transaction>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// TID for the next message from `source` to `destination`.
    pub fn next_tid(
        &mut self,
        source: Address,
        destination: Address,
        continue_transaction: bool,
        now_ms: u64,
    ) -> u8 {
        let key = (source, destination);
        let tid = match self.entries.get(&key) {
            Some(t) if continue_transaction && t.is_active(now_ms) => t.tid,
            Some(t) => t.tid.wrapping_add(1),
            None => {
                self.evict_if_full();
                rand::rng().random()
            }
        };
        self.entries.insert(
            key,
            Transaction {
                tid,
                last_used_ms: now_ms,
            },
        );
        tid
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_full(&mut self) {
        if self.entries.len() < MAX_TRANSACTIONS {
            return;
        }
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, t)| t.last_used_ms)
            .map(|(key, _)| *key)
        {
            self.entries.remove(&oldest);
        }
    }
}

/// Receive-side duplicate detection for transaction messages.
///
/// A message repeating the last (source, destination, TID) within
/// [`TRANSACTION_TIMEOUT_MS`] belongs to the same transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastTransaction {
    last: Option<(Address, Address, u8, u64)>,
}

impl LastTransaction {
    /// Record the message and report whether it starts a new transaction.
    pub fn is_new(&mut self, source: Address, destination: Address, tid: u8, now_ms: u64) -> bool {
        let repeated = matches!(
            self.last,
            Some((s, d, t, at)) if s == source && d == destination && t == tid
                && now_ms.saturating_sub(at) < TRANSACTION_TIMEOUT_MS
        );
        self.last = Some((source, destination, tid, now_ms));
        !repeated
    }
}
