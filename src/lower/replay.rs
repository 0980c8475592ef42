//! Replay protection.
//!
//! Every source keeps the SeqAuth of the last accepted message and the one
//! before it. A message is accepted when its SeqAuth is newer than the last,
//! when it falls strictly between the previous and the last (a segmented
//! message overtaken by a newer one), or when it repeats the last SeqAuth
//! while that message is still being reassembled.

use std::collections::HashMap;

use tracing::trace;

use crate::model::Address;
use crate::storage::ReplayRecord;

/// Result of a replay check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayVerdict {
    /// Accepted; `Some` carries the updated record to persist.
    Accept(Option<ReplayRecord>),
    Reject,
}

/// In-memory replay protection list, seeded from storage.
#[derive(Debug, Default)]
pub struct ReplayCache {
    records: HashMap<Address, ReplayRecord>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&mut self, records: impl IntoIterator<Item = (Address, ReplayRecord)>) {
        self.records.extend(records);
    }

    pub fn record(&self, source: Address) -> Option<ReplayRecord> {
        self.records.get(&source).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check `seq_auth` from `source` and record it when accepted.
    ///
    /// `in_progress` is true when a reassembly of the message with this
    /// SeqAuth is ongoing or was just completed.
    pub fn check(&mut self, source: Address, seq_auth: u64, in_progress: bool) -> ReplayVerdict {
        let Some(current) = self.records.get(&source).copied() else {
            let record = ReplayRecord {
                last: seq_auth,
                previous: None,
            };
            self.records.insert(source, record);
            return ReplayVerdict::Accept(Some(record));
        };

        let missed = seq_auth < current.last
            && current.previous.is_some_and(|previous| seq_auth > previous);
        let repeated = seq_auth == current.last && in_progress;
        if seq_auth <= current.last && !missed && !repeated {
            trace!(src = %source, seq_auth, last = current.last, "Replay rejected");
            return ReplayVerdict::Reject;
        }
        if repeated {
            return ReplayVerdict::Accept(None);
        }

        let record = ReplayRecord {
            last: if missed { current.last } else { seq_auth },
            previous: Some(seq_auth.min(current.last)),
        };
        self.records.insert(source, record);
        ReplayVerdict::Accept(Some(record))
    }
}
