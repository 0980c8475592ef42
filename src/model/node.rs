//! Node, Element and Model tree.

use std::fmt;

use super::address::{Address, MeshAddress};
use super::keys::KeyIndex;
use crate::crypto::Key;

/// TTL value meaning "use the node's default TTL".
pub const DEFAULT_TTL_SENTINEL: u8 = 0xFF;

/// Model identifier: SIG models use the low 16 bits, vendor models carry
/// the company identifier in the high 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u32);

impl ModelId {
    pub const CONFIGURATION_SERVER: ModelId = ModelId(0x0000);
    pub const CONFIGURATION_CLIENT: ModelId = ModelId(0x0001);
    pub const HEALTH_SERVER: ModelId = ModelId(0x0002);
    pub const HEALTH_CLIENT: ModelId = ModelId(0x0003);
    pub const GENERIC_ON_OFF_SERVER: ModelId = ModelId(0x1000);
    pub const GENERIC_ON_OFF_CLIENT: ModelId = ModelId(0x1001);

    pub const fn sig(id: u16) -> Self {
        Self(id as u32)
    }

    pub const fn vendor(company: u16, id: u16) -> Self {
        Self(((company as u32) << 16) | id as u32)
    }

    pub fn is_sig(&self) -> bool {
        self.0 <= 0xFFFF
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Configuration models are secured with the Device Key.
    pub fn requires_device_key(&self) -> bool {
        *self == Self::CONFIGURATION_SERVER || *self == Self::CONFIGURATION_CLIENT
    }
}

impl fmt::Debug for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sig() {
            write!(f, "ModelId(0x{:04X})", self.0)
        } else {
            write!(f, "ModelId(0x{:04X}:0x{:04X})", self.0 >> 16, self.0 & 0xFFFF)
        }
    }
}

/// Publish period encoded as steps and resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PublishPeriod {
    /// Number of steps (0..=63). 0 disables periodic publishing.
    pub steps: u8,
    /// Resolution: 0 = 100 ms, 1 = 1 s, 2 = 10 s, 3 = 10 min.
    pub resolution: u8,
}

impl PublishPeriod {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_ms(ms: u64) -> Self {
        let (resolution, unit) = match ms {
            0..=6_300 => (0, 100),
            6_301..=63_000 => (1, 1_000),
            63_001..=630_000 => (2, 10_000),
            _ => (3, 600_000),
        };
        Self {
            steps: (ms / unit).min(63) as u8,
            resolution,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        let unit = match self.resolution {
            0 => 100,
            1 => 1_000,
            2 => 10_000,
            _ => 600_000,
        };
        u64::from(self.steps & 0x3F) * unit
    }

    pub fn is_enabled(&self) -> bool {
        self.steps > 0
    }
}

/// Retransmission parameters for publications and network transmit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Retransmit {
    pub count: u8,
    pub interval_ms: u64,
}

/// Publication settings of a Model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publish {
    pub address: MeshAddress,
    pub application_key: KeyIndex,
    /// TTL, or [`DEFAULT_TTL_SENTINEL`].
    pub ttl: u8,
    pub period: PublishPeriod,
    pub retransmit: Retransmit,
}

/// Feature bitmap used by Heartbeat messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Features(u16);

impl Features {
    pub const RELAY: u16 = 0x0001;
    pub const PROXY: u16 = 0x0002;
    pub const FRIEND: u16 = 0x0004;
    pub const LOW_POWER: u16 = 0x0008;

    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0x000F)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, feature: u16) -> bool {
        self.0 & feature != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A Model on an Element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Model {
    pub model_id: ModelId,
    pub bound_application_keys: Vec<KeyIndex>,
    pub subscriptions: Vec<MeshAddress>,
    pub publish: Option<Publish>,
}

impl Model {
    pub fn new(model_id: ModelId) -> Self {
        Self {
            model_id,
            bound_application_keys: Vec::new(),
            subscriptions: Vec::new(),
            publish: None,
        }
    }

    pub fn bind(mut self, app_key: KeyIndex) -> Self {
        if !self.bound_application_keys.contains(&app_key) {
            self.bound_application_keys.push(app_key);
        }
        self
    }

    pub fn subscribe(mut self, address: MeshAddress) -> Self {
        if !self.subscriptions.contains(&address) {
            self.subscriptions.push(address);
        }
        self
    }

    pub fn is_bound_to(&self, app_key: KeyIndex) -> bool {
        self.bound_application_keys.contains(&app_key)
    }

    pub fn is_subscribed_to(&self, address: Address) -> bool {
        self.subscriptions.iter().any(|s| s.address == address)
    }
}

/// An Element: an addressable entity within a Node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub location: u16,
    pub models: Vec<Model>,
}

impl Element {
    pub fn new(models: Vec<Model>) -> Self {
        Self { location: 0, models }
    }

    pub fn model(&self, model_id: ModelId) -> Option<&Model> {
        self.models.iter().find(|m| m.model_id == model_id)
    }
}

/// A provisioned Node.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub primary_address: Address,
    pub elements: Vec<Element>,
    pub device_key: Option<Key>,
    pub network_keys: Vec<KeyIndex>,
    pub application_keys: Vec<KeyIndex>,
    pub features: Features,
    pub default_ttl: Option<u8>,
}

impl Node {
    pub fn new(name: impl Into<String>, primary_address: Address, elements: Vec<Element>) -> Self {
        Self {
            name: name.into(),
            primary_address,
            elements,
            device_key: None,
            network_keys: Vec::new(),
            application_keys: Vec::new(),
            features: Features::default(),
            default_ttl: None,
        }
    }

    /// Number of unicast addresses the node occupies (at least one).
    pub fn element_count(&self) -> u16 {
        self.elements.len().max(1) as u16
    }

    /// Last unicast address of the node.
    pub fn last_address(&self) -> Address {
        self.primary_address.offset(self.element_count() - 1)
    }

    pub fn contains_address(&self, address: Address) -> bool {
        address >= self.primary_address && address <= self.last_address()
    }

    /// Element index for a unicast address belonging to this node.
    pub fn element_index(&self, address: Address) -> Option<usize> {
        self.contains_address(address)
            .then(|| (address.value() - self.primary_address.value()) as usize)
    }

    pub fn element_address(&self, index: usize) -> Address {
        self.primary_address.offset(index as u16)
    }

    pub fn knows_network_key(&self, index: KeyIndex) -> bool {
        self.network_keys.contains(&index)
    }
}
