//! File-backed storage.
//!
//! State is kept in memory and rewritten to disk as a CBOR map on every
//! change. Writes go to a temporary file that is then renamed over the
//! previous one.

use std::path::{Path, PathBuf};
use tracing::debug;

use super::{MemoryStorage, ReplayRecord, Storage, StorageError};
use crate::codec::{self, Value};
use crate::model::{Address, IvIndex, IvIndexState};

const FORMAT_VERSION: u64 = 1;

/// Storage persisted to a CBOR file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    state: MemoryStorage,
}

impl FileStorage {
    /// Open the storage file, starting empty when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let state = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|e| StorageError::Io {
                path: path.clone(),
                source: e,
            })?;
            decode_state(&codec::decode(&bytes)?)?
        } else {
            MemoryStorage::default()
        };
        debug!(path = %path.display(), sequences = state.sequences.len(), "Storage opened");
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        let bytes = codec::encode(&encode_state(&self.state));
        let tmp = self.path.with_extension("tmp");
        let io_err = |e| StorageError::Io {
            path: self.path.clone(),
            source: e,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl Storage for FileStorage {
    fn sequence_number(&self, source: Address) -> Option<u32> {
        self.state.sequence_number(source)
    }

    fn set_sequence_number(&mut self, source: Address, sequence: u32) -> Result<(), StorageError> {
        self.state.set_sequence_number(source, sequence)?;
        self.flush()
    }

    fn iv_index_state(&self) -> Option<IvIndexState> {
        self.state.iv_index_state()
    }

    fn set_iv_index_state(&mut self, state: IvIndexState) -> Result<(), StorageError> {
        self.state.set_iv_index_state(state)?;
        self.flush()
    }

    fn replay_record(&self, source: Address) -> Option<ReplayRecord> {
        self.state.replay_record(source)
    }

    fn set_replay_record(&mut self, source: Address, record: ReplayRecord) -> Result<(), StorageError> {
        self.state.set_replay_record(source, record)?;
        self.flush()
    }

    fn replay_records(&self) -> Vec<(Address, ReplayRecord)> {
        self.state.replay_records()
    }
}

// ============================================================================
// CBOR layout
// ============================================================================

fn encode_state(state: &MemoryStorage) -> Value {
    let mut sequences: Vec<_> = state.sequences.iter().collect();
    sequences.sort();
    let mut replay: Vec<_> = state.replay.iter().collect();
    replay.sort_by_key(|(a, _)| **a);

    let mut entries = vec![
        ("version", Value::Unsigned(FORMAT_VERSION)),
        (
            "sequences",
            Value::Map(
                sequences
                    .into_iter()
                    .map(|(a, s)| (Value::Unsigned(a.value().into()), Value::from(*s)))
                    .collect(),
            ),
        ),
        (
            "replay",
            Value::Map(
                replay
                    .into_iter()
                    .map(|(a, r)| {
                        let previous = r.previous.map(Value::Unsigned).unwrap_or(Value::Null);
                        (
                            Value::Unsigned(a.value().into()),
                            Value::Array(vec![Value::Unsigned(r.last), previous]),
                        )
                    })
                    .collect(),
            ),
        ),
    ];
    if let Some(iv) = state.iv_index {
        entries.push((
            "iv_index",
            Value::text_map([
                ("index", Value::from(iv.iv_index.index)),
                ("update_active", Value::from(iv.iv_index.update_active)),
                (
                    "transition_ms",
                    iv.transition_ms.map(Value::Unsigned).unwrap_or(Value::Null),
                ),
                ("recovery_active", Value::from(iv.recovery_active)),
            ]),
        ));
    }
    Value::text_map(entries)
}

fn corrupt(what: &str) -> StorageError {
    StorageError::Corrupt(what.to_string())
}

fn address_key(value: &Value) -> Result<Address, StorageError> {
    value
        .as_u64()
        .and_then(|a| u16::try_from(a).ok())
        .map(Address::new)
        .ok_or_else(|| corrupt("address key"))
}

fn decode_state(root: &Value) -> Result<MemoryStorage, StorageError> {
    let version = root.get("version").and_then(Value::as_u64).ok_or_else(|| corrupt("version"))?;
    if version != FORMAT_VERSION {
        return Err(StorageError::Corrupt(format!("unsupported version {}", version)));
    }
    let mut state = MemoryStorage::default();

    if let Some(map) = root.get("sequences").and_then(Value::as_map) {
        for (k, v) in map {
            let seq = v
                .as_u64()
                .and_then(|s| u32::try_from(s).ok())
                .ok_or_else(|| corrupt("sequence number"))?;
            state.sequences.insert(address_key(k)?, seq);
        }
    }

    if let Some(map) = root.get("replay").and_then(Value::as_map) {
        for (k, v) in map {
            let record = match v.as_array() {
                Some([last, previous]) => ReplayRecord {
                    last: last.as_u64().ok_or_else(|| corrupt("replay record"))?,
                    previous: previous.as_u64(),
                },
                _ => return Err(corrupt("replay record")),
            };
            state.replay.insert(address_key(k)?, record);
        }
    }

    if let Some(iv) = root.get("iv_index") {
        let index = iv
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| corrupt("iv_index.index"))?;
        state.iv_index = Some(IvIndexState {
            iv_index: IvIndex::new(
                index,
                iv.get("update_active").and_then(Value::as_bool).unwrap_or(false),
            ),
            transition_ms: iv.get("transition_ms").and_then(Value::as_u64),
            recovery_active: iv.get("recovery_active").and_then(Value::as_bool).unwrap_or(false),
        });
    }

    Ok(state)
}
