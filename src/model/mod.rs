//! Key & Address Model
//!
//! Value objects shared by every layer: 16-bit mesh addresses, Network and
//! Application Keys with their Key Refresh phase, the IV Index, and the
//! Node / Element / Model tree of the mesh network.

mod address;
mod iv_index;
mod keys;
mod network;
mod node;

use thiserror::Error;

pub use address::{Address, AddressKind, MeshAddress};
pub use iv_index::{IvIndex, IvIndexState};
pub use keys::{
    ApplicationKey, KeyIndex, KeyRefreshPhase, NetworkKey, NetworkKeyDerivatives, MAX_KEY_INDEX,
};
pub use network::MeshNetwork;
pub use node::{
    Element, Features, Model, ModelId, Node, Publish, PublishPeriod, Retransmit,
    DEFAULT_TTL_SENTINEL,
};

/// Errors raised while constructing or mutating model objects.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("key index out of range: {0} (max 4095)")]
    InvalidKeyIndex(u16),

    #[error("network key {0} not found")]
    NetworkKeyNotFound(KeyIndex),

    #[error("application key {0} not found")]
    ApplicationKeyNotFound(KeyIndex),

    #[error("key {0} already exists")]
    KeyExists(KeyIndex),

    #[error("key refresh already in progress for network key {0}")]
    KeyRefreshInProgress(KeyIndex),

    #[error("key {0} is in use and cannot be deleted")]
    KeyInUse(KeyIndex),

    #[error("address {0} is not a unicast address")]
    NotUnicast(Address),

    #[error("address range starting at {address} overlaps node {existing}")]
    AddressOverlap { address: Address, existing: Address },

    #[error("invalid hex key: {0}")]
    InvalidHexKey(String),
}

/// Parses a 32-character hex string into 128-bit key material.
pub fn parse_key(hex_str: &str) -> Result<[u8; 16], ModelError> {
    let mut key = [0u8; 16];
    hex::decode_to_slice(hex_str.trim(), &mut key)
        .map_err(|_| ModelError::InvalidHexKey(hex_str.to_string()))?;
    Ok(key)
}
