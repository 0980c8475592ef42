//! Built-in message set.

pub mod config_heartbeat;
pub mod generic_onoff;

use std::sync::Arc;

use super::message::{MeshMessage, StaticMessage};

pub use config_heartbeat::{
    ConfigHeartbeatPublicationGet, ConfigHeartbeatPublicationSet, ConfigHeartbeatPublicationStatus,
    ConfigHeartbeatSubscriptionGet, ConfigHeartbeatSubscriptionSet,
    ConfigHeartbeatSubscriptionStatus, ConfigRequest, ConfigStatus, HeartbeatPublicationState,
};
pub use generic_onoff::{
    GenericOnOffGet, GenericOnOffSet, GenericOnOffSetUnacknowledged, GenericOnOffStatus,
    OnOffSetParameters, OnOffTransition, Transition, TransitionTime,
};

/// Decode `parameters` as `T` when `opcode` matches.
pub fn decode_as<T: StaticMessage>(opcode: u32, parameters: &[u8]) -> Option<Arc<dyn MeshMessage>> {
    if opcode != T::OPCODE {
        return None;
    }
    T::decode(parameters).map(|m| Arc::new(m) as Arc<dyn MeshMessage>)
}

/// Decode a Configuration Status sent to the local Configuration Client.
pub fn decode_config_status(opcode: u32, parameters: &[u8]) -> Option<Arc<dyn MeshMessage>> {
    decode_as::<ConfigHeartbeatPublicationStatus>(opcode, parameters)
        .or_else(|| decode_as::<ConfigHeartbeatSubscriptionStatus>(opcode, parameters))
}
