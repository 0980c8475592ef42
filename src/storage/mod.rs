//! Persistence
//!
//! The engine persists three things: the next sequence number of every
//! local element, the IV Index state, and the replay protection records of
//! remote sources. [`Storage`] is the interface; [`MemoryStorage`] keeps
//! values in memory and [`FileStorage`] writes them to a CBOR file.

mod file;
mod sequence;

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;
use crate::model::{Address, IvIndexState};

pub use file::FileStorage;
pub use sequence::SequenceCounter;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("storage encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("corrupt storage file: {0}")]
    Corrupt(String),
}

/// Replay protection record of one source address.
///
/// `previous` is the SeqAuth accepted before `last`; segments of that
/// message may still be arriving.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayRecord {
    pub last: u64,
    pub previous: Option<u64>,
}

/// Persistence interface consumed by the engine.
pub trait Storage: Send {
    /// Next sequence number to use for `source`.
    fn sequence_number(&self, source: Address) -> Option<u32>;

    fn set_sequence_number(&mut self, source: Address, sequence: u32) -> Result<(), StorageError>;

    fn iv_index_state(&self) -> Option<IvIndexState>;

    fn set_iv_index_state(&mut self, state: IvIndexState) -> Result<(), StorageError>;

    fn replay_record(&self, source: Address) -> Option<ReplayRecord>;

    fn set_replay_record(&mut self, source: Address, record: ReplayRecord) -> Result<(), StorageError>;

    /// All stored replay records, used to seed the replay cache.
    fn replay_records(&self) -> Vec<(Address, ReplayRecord)>;
}

/// Volatile storage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryStorage {
    pub(crate) sequences: HashMap<Address, u32>,
    pub(crate) iv_index: Option<IvIndexState>,
    pub(crate) replay: HashMap<Address, ReplayRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn sequence_number(&self, source: Address) -> Option<u32> {
        self.sequences.get(&source).copied()
    }

    fn set_sequence_number(&mut self, source: Address, sequence: u32) -> Result<(), StorageError> {
        self.sequences.insert(source, sequence);
        Ok(())
    }

    fn iv_index_state(&self) -> Option<IvIndexState> {
        self.iv_index
    }

    fn set_iv_index_state(&mut self, state: IvIndexState) -> Result<(), StorageError> {
        self.iv_index = Some(state);
        Ok(())
    }

    fn replay_record(&self, source: Address) -> Option<ReplayRecord> {
        self.replay.get(&source).copied()
    }

    fn set_replay_record(&mut self, source: Address, record: ReplayRecord) -> Result<(), StorageError> {
        self.replay.insert(source, record);
        Ok(())
    }

    fn replay_records(&self) -> Vec<(Address, ReplayRecord)> {
        self.replay.iter().map(|(a, r)| (*a, *r)).collect()
    }
}
