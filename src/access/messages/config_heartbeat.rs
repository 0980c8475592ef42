//! Configuration Heartbeat Publication and Subscription messages.
//!
//! These travel under a Device Key. Multi-byte fields are little-endian.

use std::any::Any;

use crate::access::message::{MeshMessage, MessageKind, StaticMessage};
use crate::model::{Address, Features, KeyIndex, MAX_KEY_INDEX};

pub const CONFIG_HEARTBEAT_PUBLICATION_GET: u32 = 0x8038;
pub const CONFIG_HEARTBEAT_PUBLICATION_SET: u32 = 0x8039;
pub const CONFIG_HEARTBEAT_PUBLICATION_STATUS: u32 = 0x06;
pub const CONFIG_HEARTBEAT_SUBSCRIPTION_GET: u32 = 0x803A;
pub const CONFIG_HEARTBEAT_SUBSCRIPTION_SET: u32 = 0x803B;
pub const CONFIG_HEARTBEAT_SUBSCRIPTION_STATUS: u32 = 0x803C;

/// Status codes carried by configuration Status messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConfigStatus {
    Success,
    InvalidAddress,
    InvalidNetKeyIndex,
    CannotSet,
    UnspecifiedError,
    Other(u8),
}

impl ConfigStatus {
    pub fn code(self) -> u8 {
        match self {
            ConfigStatus::Success => 0x00,
            ConfigStatus::InvalidAddress => 0x01,
            ConfigStatus::InvalidNetKeyIndex => 0x04,
            ConfigStatus::CannotSet => 0x0F,
            ConfigStatus::UnspecifiedError => 0x10,
            ConfigStatus::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => ConfigStatus::Success,
            0x01 => ConfigStatus::InvalidAddress,
            0x04 => ConfigStatus::InvalidNetKeyIndex,
            0x0F => ConfigStatus::CannotSet,
            0x10 => ConfigStatus::UnspecifiedError,
            other => ConfigStatus::Other(other),
        }
    }
}

fn address_le(bytes: &[u8]) -> Address {
    Address::new(u16::from_le_bytes([bytes[0], bytes[1]]))
}

macro_rules! device_key_message {
    ($ty:ty, $opcode:expr, $kind:expr) => {
        impl MeshMessage for $ty {
            fn opcode(&self) -> u32 {
                $opcode
            }

            fn parameters(&self) -> Vec<u8> {
                self.encode()
            }

            fn kind(&self) -> MessageKind {
                $kind
            }

            fn requires_device_key(&self) -> bool {
                true
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

// ============================================================================
// Publication
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigHeartbeatPublicationGet;

impl ConfigHeartbeatPublicationGet {
    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}

device_key_message!(
    ConfigHeartbeatPublicationGet,
    CONFIG_HEARTBEAT_PUBLICATION_GET,
    MessageKind::Acknowledged {
        response_opcode: CONFIG_HEARTBEAT_PUBLICATION_STATUS
    }
);

impl StaticMessage for ConfigHeartbeatPublicationGet {
    const OPCODE: u32 = CONFIG_HEARTBEAT_PUBLICATION_GET;

    fn decode(parameters: &[u8]) -> Option<Self> {
        parameters.is_empty().then_some(Self)
    }
}

/// Heartbeat Publication state as carried by Set and Status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatPublicationState {
    pub destination: Address,
    pub count_log: u8,
    pub period_log: u8,
    pub ttl: u8,
    pub features: Features,
    pub network_key: KeyIndex,
}

impl HeartbeatPublicationState {
    /// The disabled state reported when no publication is configured.
    pub fn disabled() -> Self {
        Self {
            destination: Address::UNASSIGNED,
            count_log: 0,
            period_log: 0,
            ttl: 0,
            features: Features::default(),
            network_key: 0,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.destination.value().to_le_bytes());
        out.push(self.count_log);
        out.push(self.period_log);
        out.push(self.ttl);
        out.extend_from_slice(&self.features.bits().to_le_bytes());
        out.extend_from_slice(&self.network_key.to_le_bytes());
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != 9 {
            return None;
        }
        let network_key = u16::from_le_bytes([data[7], data[8]]);
        if network_key > MAX_KEY_INDEX {
            return None;
        }
        Some(Self {
            destination: address_le(&data[0..2]),
            count_log: data[2],
            period_log: data[3],
            ttl: data[4],
            features: Features::from_bits(u16::from_le_bytes([data[5], data[6]])),
            network_key,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigHeartbeatPublicationSet(pub HeartbeatPublicationState);

impl ConfigHeartbeatPublicationSet {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        self.0.encode(&mut out);
        out
    }
}

device_key_message!(
    ConfigHeartbeatPublicationSet,
    CONFIG_HEARTBEAT_PUBLICATION_SET,
    MessageKind::Acknowledged {
        response_opcode: CONFIG_HEARTBEAT_PUBLICATION_STATUS
    }
);

impl StaticMessage for ConfigHeartbeatPublicationSet {
    const OPCODE: u32 = CONFIG_HEARTBEAT_PUBLICATION_SET;

    fn decode(parameters: &[u8]) -> Option<Self> {
        HeartbeatPublicationState::decode(parameters).map(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigHeartbeatPublicationStatus {
    pub status: ConfigStatus,
    pub state: HeartbeatPublicationState,
}

impl ConfigHeartbeatPublicationStatus {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.push(self.status.code());
        self.state.encode(&mut out);
        out
    }
}

device_key_message!(
    ConfigHeartbeatPublicationStatus,
    CONFIG_HEARTBEAT_PUBLICATION_STATUS,
    MessageKind::Response
);

impl StaticMessage for ConfigHeartbeatPublicationStatus {
    const OPCODE: u32 = CONFIG_HEARTBEAT_PUBLICATION_STATUS;

    fn decode(parameters: &[u8]) -> Option<Self> {
        let (status, rest) = parameters.split_first()?;
        Some(Self {
            status: ConfigStatus::from_code(*status),
            state: HeartbeatPublicationState::decode(rest)?,
        })
    }
}

// ============================================================================
// Subscription
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigHeartbeatSubscriptionGet;

impl ConfigHeartbeatSubscriptionGet {
    fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}

device_key_message!(
    ConfigHeartbeatSubscriptionGet,
    CONFIG_HEARTBEAT_SUBSCRIPTION_GET,
    MessageKind::Acknowledged {
        response_opcode: CONFIG_HEARTBEAT_SUBSCRIPTION_STATUS
    }
);

impl StaticMessage for ConfigHeartbeatSubscriptionGet {
    const OPCODE: u32 = CONFIG_HEARTBEAT_SUBSCRIPTION_GET;

    fn decode(parameters: &[u8]) -> Option<Self> {
        parameters.is_empty().then_some(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigHeartbeatSubscriptionSet {
    pub source: Address,
    pub destination: Address,
    pub period_log: u8,
}

impl ConfigHeartbeatSubscriptionSet {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        out.extend_from_slice(&self.source.value().to_le_bytes());
        out.extend_from_slice(&self.destination.value().to_le_bytes());
        out.push(self.period_log);
        out
    }
}

device_key_message!(
    ConfigHeartbeatSubscriptionSet,
    CONFIG_HEARTBEAT_SUBSCRIPTION_SET,
    MessageKind::Acknowledged {
        response_opcode: CONFIG_HEARTBEAT_SUBSCRIPTION_STATUS
    }
);

impl StaticMessage for ConfigHeartbeatSubscriptionSet {
    const OPCODE: u32 = CONFIG_HEARTBEAT_SUBSCRIPTION_SET;

    fn decode(parameters: &[u8]) -> Option<Self> {
        if parameters.len() != 5 {
            return None;
        }
        Some(Self {
            source: address_le(&parameters[0..2]),
            destination: address_le(&parameters[2..4]),
            period_log: parameters[4],
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigHeartbeatSubscriptionStatus {
    pub status: ConfigStatus,
    pub source: Address,
    pub destination: Address,
    pub period_log: u8,
    pub count_log: u8,
    pub min_hops: u8,
    pub max_hops: u8,
}

impl ConfigHeartbeatSubscriptionStatus {
    /// Status of a disabled subscription.
    pub fn disabled(status: ConfigStatus) -> Self {
        Self {
            status,
            source: Address::UNASSIGNED,
            destination: Address::UNASSIGNED,
            period_log: 0,
            count_log: 0,
            min_hops: 0,
            max_hops: 0,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.push(self.status.code());
        out.extend_from_slice(&self.source.value().to_le_bytes());
        out.extend_from_slice(&self.destination.value().to_le_bytes());
        out.push(self.period_log);
        out.push(self.count_log);
        out.push(self.min_hops);
        out.push(self.max_hops);
        out
    }
}

device_key_message!(
    ConfigHeartbeatSubscriptionStatus,
    CONFIG_HEARTBEAT_SUBSCRIPTION_STATUS,
    MessageKind::Response
);

impl StaticMessage for ConfigHeartbeatSubscriptionStatus {
    const OPCODE: u32 = CONFIG_HEARTBEAT_SUBSCRIPTION_STATUS;

    fn decode(parameters: &[u8]) -> Option<Self> {
        if parameters.len() != 9 {
            return None;
        }
        Some(Self {
            status: ConfigStatus::from_code(parameters[0]),
            source: address_le(&parameters[1..3]),
            destination: address_le(&parameters[3..5]),
            period_log: parameters[5],
            count_log: parameters[6],
            min_hops: parameters[7],
            max_hops: parameters[8],
        })
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// A configuration message the local Configuration Server understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigRequest {
    HeartbeatPublicationGet(ConfigHeartbeatPublicationGet),
    HeartbeatPublicationSet(ConfigHeartbeatPublicationSet),
    HeartbeatSubscriptionGet(ConfigHeartbeatSubscriptionGet),
    HeartbeatSubscriptionSet(ConfigHeartbeatSubscriptionSet),
}

impl ConfigRequest {
    pub fn decode(opcode: u32, parameters: &[u8]) -> Option<Self> {
        match opcode {
            CONFIG_HEARTBEAT_PUBLICATION_GET => {
                ConfigHeartbeatPublicationGet::decode(parameters).map(Self::HeartbeatPublicationGet)
            }
            CONFIG_HEARTBEAT_PUBLICATION_SET => {
                ConfigHeartbeatPublicationSet::decode(parameters).map(Self::HeartbeatPublicationSet)
            }
            CONFIG_HEARTBEAT_SUBSCRIPTION_GET => {
                ConfigHeartbeatSubscriptionGet::decode(parameters).map(Self::HeartbeatSubscriptionGet)
            }
            CONFIG_HEARTBEAT_SUBSCRIPTION_SET => {
                ConfigHeartbeatSubscriptionSet::decode(parameters).map(Self::HeartbeatSubscriptionSet)
            }
            _ => None,
        }
    }

    pub fn opcode(&self) -> u32 {
        match self {
            Self::HeartbeatPublicationGet(_) => CONFIG_HEARTBEAT_PUBLICATION_GET,
            Self::HeartbeatPublicationSet(_) => CONFIG_HEARTBEAT_PUBLICATION_SET,
            Self::HeartbeatSubscriptionGet(_) => CONFIG_HEARTBEAT_SUBSCRIPTION_GET,
            Self::HeartbeatSubscriptionSet(_) => CONFIG_HEARTBEAT_SUBSCRIPTION_SET,
        }
    }
}
