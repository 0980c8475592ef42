//! Network and Application Keys with Key Refresh phases.

use std::fmt;

use super::ModelError;
use crate::crypto::{self, Key};

/// Global key index (12 bits).
pub type KeyIndex = u16;

/// Largest valid key index.
pub const MAX_KEY_INDEX: KeyIndex = 0x0FFF;

/// Key Refresh Procedure phase of a Network Key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum KeyRefreshPhase {
    /// Phase 0: only the current key is in use.
    #[default]
    NormalOperation,
    /// Phase 1: new key distributed, old key still used for transmission.
    KeyDistribution,
    /// Phase 2: new key used for transmission, old key still accepted.
    UsingNewKeys,
}

impl fmt::Display for KeyRefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyRefreshPhase::NormalOperation => "normal operation",
            KeyRefreshPhase::KeyDistribution => "key distribution",
            KeyRefreshPhase::UsingNewKeys => "using new keys",
        };
        write!(f, "{}", s)
    }
}

/// Material derived from a Network Key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkKeyDerivatives {
    pub nid: u8,
    pub encryption_key: Key,
    pub privacy_key: Key,
    pub network_id: [u8; 8],
    pub beacon_key: Key,
    pub identity_key: Key,
    pub private_beacon_key: Key,
}

impl NetworkKeyDerivatives {
    pub fn derive(key: &Key) -> Self {
        let k2 = crypto::k2(key, &[0x00]);
        Self {
            nid: k2.nid,
            encryption_key: k2.encryption_key,
            privacy_key: k2.privacy_key,
            network_id: crypto::k3(key),
            beacon_key: crypto::beacon_key(key),
            identity_key: crypto::identity_key(key),
            private_beacon_key: crypto::private_beacon_key(key),
        }
    }
}

impl fmt::Debug for NetworkKeyDerivatives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKeyDerivatives")
            .field("nid", &format_args!("0x{:02X}", self.nid))
            .field("network_id", &hex::encode(self.network_id))
            .finish_non_exhaustive()
    }
}

fn check_index(index: KeyIndex) -> Result<(), ModelError> {
    if index > MAX_KEY_INDEX {
        return Err(ModelError::InvalidKeyIndex(index));
    }
    Ok(())
}

/// A Network Key.
///
/// `old_key` is present exactly when the key is not in
/// [`KeyRefreshPhase::NormalOperation`].
#[derive(Clone)]
pub struct NetworkKey {
    index: KeyIndex,
    name: String,
    key: Key,
    old_key: Option<Key>,
    phase: KeyRefreshPhase,
    derivatives: NetworkKeyDerivatives,
    old_derivatives: Option<NetworkKeyDerivatives>,
}

impl NetworkKey {
    pub fn new(index: KeyIndex, key: Key) -> Result<Self, ModelError> {
        check_index(index)?;
        Ok(Self {
            index,
            name: format!("Network Key {}", index),
            key,
            old_key: None,
            phase: KeyRefreshPhase::NormalOperation,
            derivatives: NetworkKeyDerivatives::derive(&key),
            old_derivatives: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn index(&self) -> KeyIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn old_key(&self) -> Option<&Key> {
        self.old_key.as_ref()
    }

    pub fn phase(&self) -> KeyRefreshPhase {
        self.phase
    }

    /// The primary Network Key has index 0.
    pub fn is_primary(&self) -> bool {
        self.index == 0
    }

    pub fn derivatives(&self) -> &NetworkKeyDerivatives {
        &self.derivatives
    }

    pub fn old_derivatives(&self) -> Option<&NetworkKeyDerivatives> {
        self.old_derivatives.as_ref()
    }

    /// Keys used for transmission in the current phase.
    ///
    /// During key distribution the old key is still used to transmit.
    pub fn transmit_derivatives(&self) -> &NetworkKeyDerivatives {
        match (self.phase, &self.old_derivatives) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.derivatives,
        }
    }

    /// Sets or clears the old key, moving the phase accordingly.
    ///
    /// Setting an old key starts key distribution; clearing it returns the
    /// key to normal operation.
    pub fn set_old_key(&mut self, old_key: Option<Key>) {
        self.old_derivatives = old_key.as_ref().map(NetworkKeyDerivatives::derive);
        self.old_key = old_key;
        self.phase = if self.old_key.is_some() {
            KeyRefreshPhase::KeyDistribution
        } else {
            KeyRefreshPhase::NormalOperation
        };
    }

    /// Starts the Key Refresh Procedure with new key material.
    pub fn update_key(&mut self, new_key: Key) -> Result<(), ModelError> {
        if self.phase != KeyRefreshPhase::NormalOperation {
            return Err(ModelError::KeyRefreshInProgress(self.index));
        }
        let current = self.key;
        self.key = new_key;
        self.derivatives = NetworkKeyDerivatives::derive(&new_key);
        self.set_old_key(Some(current));
        Ok(())
    }

    /// Moves from key distribution to using new keys.
    ///
    /// Returns false when the key is not in the key distribution phase.
    pub fn use_new_keys(&mut self) -> bool {
        if self.phase != KeyRefreshPhase::KeyDistribution {
            return false;
        }
        self.phase = KeyRefreshPhase::UsingNewKeys;
        true
    }

    /// Revokes old key material, completing the Key Refresh Procedure.
    pub fn revoke_old_key(&mut self) {
        self.set_old_key(None);
    }

    /// Key Refresh flag advertised in beacons.
    pub fn key_refresh_flag(&self) -> bool {
        self.phase == KeyRefreshPhase::UsingNewKeys
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKey")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("nid", &format_args!("0x{:02X}", self.derivatives.nid))
            .finish()
    }
}

/// An Application Key, bound to exactly one Network Key.
#[derive(Clone)]
pub struct ApplicationKey {
    index: KeyIndex,
    name: String,
    key: Key,
    aid: u8,
    old_key: Option<Key>,
    old_aid: Option<u8>,
    bound_network_key: KeyIndex,
}

impl ApplicationKey {
    pub fn new(index: KeyIndex, key: Key, bound_network_key: KeyIndex) -> Result<Self, ModelError> {
        check_index(index)?;
        check_index(bound_network_key)?;
        Ok(Self {
            index,
            name: format!("Application Key {}", index),
            key,
            aid: crypto::k4(&key),
            old_key: None,
            old_aid: None,
            bound_network_key,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn index(&self) -> KeyIndex {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn aid(&self) -> u8 {
        self.aid
    }

    pub fn old_key(&self) -> Option<&Key> {
        self.old_key.as_ref()
    }

    pub fn old_aid(&self) -> Option<u8> {
        self.old_aid
    }

    pub fn bound_network_key(&self) -> KeyIndex {
        self.bound_network_key
    }

    /// Replaces the key material, keeping the previous key as old key.
    pub fn update_key(&mut self, new_key: Key) {
        self.old_key = Some(self.key);
        self.old_aid = Some(self.aid);
        self.key = new_key;
        self.aid = crypto::k4(&new_key);
    }

    pub fn revoke_old_key(&mut self) {
        self.old_key = None;
        self.old_aid = None;
    }

    /// Key and AID to transmit with, given the bound Network Key's phase.
    pub fn transmit_key(&self, phase: KeyRefreshPhase) -> (&Key, u8) {
        match (phase, &self.old_key, self.old_aid) {
            (KeyRefreshPhase::KeyDistribution, Some(old), Some(aid)) => (old, aid),
            _ => (&self.key, self.aid),
        }
    }
}

impl fmt::Debug for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationKey")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("aid", &format_args!("0x{:02X}", self.aid))
            .field("bound_network_key", &self.bound_network_key)
            .finish()
    }
}
