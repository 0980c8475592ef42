//! meshcore: Bluetooth Mesh protocol engine
//!
//! Implements the mesh networking stack of a provisioned node: the
//! Network, Lower Transport, Upper Transport and Access layers, proxy
//! filter configuration, and the persistence of sequence numbers, IV Index
//! and replay protection state. A [`MeshManager`] ties the layers to a
//! [`Bearer`] and drives them from a single event loop.

pub mod access;
pub mod bearer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod lower;
pub mod manager;
pub mod model;
pub mod network;
pub mod proxy;
pub mod storage;
pub mod upper;

// Re-export model types
pub use model::{
    Address, ApplicationKey, Element, Features, IvIndex, IvIndexState, KeyIndex, MeshAddress,
    MeshNetwork, Model, ModelError, ModelId, NetworkKey, Node,
};

// Re-export config types
pub use config::{Config, ConfigError, NetworkConfig, UdpConfig};

// Re-export access types
pub use access::{
    AccessError, AccessRequest, GenericOnOffClient, GenericOnOffServer, MeshMessage, MessageId,
    ModelDelegate, StaticMessage, UnknownMessage,
};

// Re-export bearer types
pub use bearer::udp::UdpBearer;
pub use bearer::{bearer_channel, Bearer, BearerError, BearerEvent, BearerRx, BearerTx, PduType};

// Re-export storage types
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};

// Re-export proxy types
pub use proxy::{FilterType, ProxyFilter};

// Re-export manager types
pub use manager::{
    ManagerError, ManagerState, MeshEvent, MeshHandle, MeshManager, MessageHandle,
    MessageOutcome, ProxyFilterCommand,
};
