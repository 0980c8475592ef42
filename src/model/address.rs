//! 16-bit mesh addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto;

/// Classification of a 16-bit mesh address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Unassigned,
    Unicast,
    Virtual,
    Group,
    AllProxies,
    AllFriends,
    AllRelays,
    AllNodes,
    /// Reserved for future use (0xFF00..=0xFFFB).
    Rfu,
}

/// A 16-bit mesh address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u16);

impl Address {
    pub const UNASSIGNED: Address = Address(0x0000);
    pub const MIN_UNICAST: Address = Address(0x0001);
    pub const MAX_UNICAST: Address = Address(0x7FFF);
    pub const MIN_VIRTUAL: Address = Address(0x8000);
    pub const MAX_VIRTUAL: Address = Address(0xBFFF);
    pub const MIN_GROUP: Address = Address(0xC000);
    pub const MAX_GROUP: Address = Address(0xFEFF);
    pub const ALL_PROXIES: Address = Address(0xFFFC);
    pub const ALL_FRIENDS: Address = Address(0xFFFD);
    pub const ALL_RELAYS: Address = Address(0xFFFE);
    pub const ALL_NODES: Address = Address(0xFFFF);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u16 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    pub fn kind(&self) -> AddressKind {
        match self.0 {
            0x0000 => AddressKind::Unassigned,
            0x0001..=0x7FFF => AddressKind::Unicast,
            0x8000..=0xBFFF => AddressKind::Virtual,
            0xC000..=0xFEFF => AddressKind::Group,
            0xFF00..=0xFFFB => AddressKind::Rfu,
            0xFFFC => AddressKind::AllProxies,
            0xFFFD => AddressKind::AllFriends,
            0xFFFE => AddressKind::AllRelays,
            0xFFFF => AddressKind::AllNodes,
        }
    }

    /// Returns false for the reserved range 0xFF00..=0xFFFB.
    pub fn is_valid(&self) -> bool {
        self.0 < 0xFF00 || self.0 > 0xFFFB
    }

    pub fn is_unassigned(&self) -> bool {
        self.0 == 0
    }

    pub fn is_unicast(&self) -> bool {
        self.0 & 0x8000 == 0 && !self.is_unassigned()
    }

    pub fn is_virtual(&self) -> bool {
        self.0 & 0xC000 == 0x8000
    }

    /// Group address, including the fixed special groups.
    pub fn is_group(&self) -> bool {
        self.0 & 0xC000 == 0xC000 && self.is_valid()
    }

    pub fn is_special_group(&self) -> bool {
        self.0 >= 0xFF00
    }

    /// Offsets a unicast address by an element index.
    pub fn offset(&self, by: u16) -> Address {
        Address(self.0.wrapping_add(by))
    }
}

impl From<u16> for Address {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:04X})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// A destination address, carrying the Label UUID for virtual addresses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct MeshAddress {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_label: Option<[u8; 16]>,
}

impl MeshAddress {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            virtual_label: None,
        }
    }

    /// Creates a virtual address from its Label UUID.
    pub fn from_label(label: [u8; 16]) -> Self {
        Self {
            address: Address::new(crypto::virtual_address(&label)),
            virtual_label: Some(label),
        }
    }
}

impl From<Address> for MeshAddress {
    fn from(address: Address) -> Self {
        Self::new(address)
    }
}

impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.virtual_label {
            Some(label) => write!(f, "{} ({})", self.address, hex::encode(label)),
            None => write!(f, "{}", self.address),
        }
    }
}
