//! Network Layer
//!
//! Deduplicates, decrypts and authenticates incoming bearer PDUs, applies
//! network beacons to the IV Index and Key Refresh state, and prepares
//! outgoing Network PDUs including their Network Transmit repetitions.

pub mod beacon;
pub mod pdu;
#[cfg(test)]
mod tests;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::bearer::PduType;
use crate::cache::PduCache;
use crate::config::NetworkConfig;
use crate::crypto::CryptoError;
use crate::model::{Address, IvIndex, IvIndexState, KeyIndex, KeyRefreshPhase, MeshNetwork};

pub use beacon::{MeshBeacon, NetworkBeacon, NetworkBeaconKind, UnprovisionedDeviceBeacon};
pub use pdu::{
    NetworkPdu, NonceType, OutgoingFrame, TransportType, MAX_NETWORK_PDU_SIZE, MAX_SEQUENCE,
    MIN_CONTROL_PDU_SIZE, MIN_NETWORK_PDU_SIZE,
};

/// Errors raised while sending through the Network Layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network key {0} not found")]
    NetworkKeyNotFound(KeyIndex),

    #[error("no network key available")]
    NoNetworkKey,

    #[error("sequence numbers exhausted for {0}")]
    SequenceExhausted(Address),

    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),
}

/// A PDU accepted by the Network Layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Network PDU for the Lower Transport Layer.
    Network(NetworkPdu),
    /// Authenticated or unprovisioned-device beacon.
    Beacon(MeshBeacon),
    /// Proxy Configuration message from the connected proxy.
    ProxyConfiguration(NetworkPdu),
}

/// State changes caused by a network beacon.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BeaconOutcome {
    /// The IV Index moved from the first to the second value.
    pub iv_index_changed: Option<(IvIndex, IvIndex)>,
    /// The transmit IV Index increased; sequence numbers restart at 0.
    pub reset_sequences: bool,
    /// A Network Key moved to this Key Refresh phase.
    pub key_refresh: Option<(KeyIndex, KeyRefreshPhase)>,
    /// The beacon identified the key of a newly connected proxy.
    pub proxy_connected: bool,
}

/// A Network PDU waiting for its next Network Transmit repetition.
#[derive(Clone, Debug)]
struct PendingTransmit {
    pdu: Vec<u8>,
    remaining: u8,
    interval_ms: u64,
    next_at_ms: u64,
}

/// Network Layer state.
pub struct NetworkLayer {
    cache: PduCache,
    proxy_network_key: Option<KeyIndex>,
    repeats: Vec<PendingTransmit>,
}

impl NetworkLayer {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            cache: PduCache::new(config.dedup_cache_size, config.dedup_cache_ttl_ms),
            proxy_network_key: None,
            repeats: Vec::new(),
        }
    }

    // === Receive ===

    /// Process a PDU received from the bearer.
    ///
    /// Duplicates, foreign and unauthenticated PDUs yield `None`.
    pub fn receive(
        &mut self,
        data: &[u8],
        pdu_type: PduType,
        network: &MeshNetwork,
        now_ms: u64,
    ) -> Option<Incoming> {
        if pdu_type == PduType::ProvisioningPdu {
            return None;
        }
        if pdu_type != PduType::MeshBeacon && !self.cache.insert_if_new(data, now_ms) {
            trace!(bytes = data.len(), "Duplicate PDU dropped");
            return None;
        }

        let keys = network.network_keys();
        let iv_index = network.iv_index();
        let incoming = match pdu_type {
            PduType::NetworkPdu => {
                NetworkPdu::decode(data, NonceType::Network, keys, iv_index).map(Incoming::Network)
            }
            PduType::MeshBeacon => MeshBeacon::decode(data, keys).map(Incoming::Beacon),
            PduType::ProxyConfiguration => NetworkPdu::decode(data, NonceType::Proxy, keys, iv_index)
                .filter(|pdu| pdu.transport_type == TransportType::Control)
                .map(Incoming::ProxyConfiguration),
            PduType::ProvisioningPdu => None,
        };
        if incoming.is_none() {
            debug!(pdu_type = %pdu_type, bytes = data.len(), "Unrecognized or undecryptable PDU dropped");
        }
        incoming
    }

    /// Whether `data` was seen recently.
    pub fn is_cached(&self, data: &[u8], now_ms: u64) -> bool {
        self.cache.contains(data, now_ms)
    }

    /// Apply a network beacon to the IV Index and Key Refresh state.
    pub fn handle_network_beacon(
        &mut self,
        beacon: &NetworkBeacon,
        network: &mut MeshNetwork,
        iv_state: &mut IvIndexState,
        config: &NetworkConfig,
        now_ms: u64,
    ) -> BeaconOutcome {
        let mut outcome = BeaconOutcome::default();

        // Beacons of secondary subnets only identify the proxy's key.
        if network
            .primary_network_key()
            .is_some_and(|primary| primary.index() != beacon.network_key)
        {
            if self.proxy_network_key.is_none() {
                outcome.proxy_connected = self.set_proxy_network_key(beacon.network_key);
            }
            return outcome;
        }

        let current = iv_state.iv_index;
        if iv_state.can_overwrite(
            beacon.iv_index,
            now_ms,
            config.iv_update_test_mode,
            config.allow_iv_index_recovery_over_42,
        ) {
            if beacon.iv_index != current {
                info!(from = %current, to = %beacon.iv_index, "IV Index updated");
                iv_state.recovery_active =
                    beacon.iv_index.index > current.index.saturating_add(1) && !beacon.iv_index.update_active;
                iv_state.iv_index = beacon.iv_index;
                iv_state.transition_ms = Some(now_ms);
                network.set_iv_index(beacon.iv_index);
                outcome.iv_index_changed = Some((current, beacon.iv_index));
                outcome.reset_sequences = beacon.iv_index.transmit_index() > current.transmit_index();
            }

            if let Some(key) = network.network_key_mut(beacon.network_key) {
                match key.phase() {
                    KeyRefreshPhase::KeyDistribution
                        if beacon.key_refresh_flag && beacon.valid_for_key_refresh =>
                    {
                        key.use_new_keys();
                        info!(net_key = beacon.network_key, "Key Refresh: using new keys");
                        outcome.key_refresh = Some((beacon.network_key, KeyRefreshPhase::UsingNewKeys));
                    }
                    KeyRefreshPhase::UsingNewKeys
                        if !beacon.key_refresh_flag && beacon.valid_for_key_refresh =>
                    {
                        key.revoke_old_key();
                        network.revoke_old_application_keys(beacon.network_key);
                        info!(net_key = beacon.network_key, "Key Refresh completed, old keys revoked");
                        outcome.key_refresh = Some((beacon.network_key, KeyRefreshPhase::NormalOperation));
                    }
                    _ => {}
                }
            }
        } else if Some(beacon.iv_index) != current.previous() {
            warn!(
                received = %beacon.iv_index,
                current = %current,
                "Discarding beacon: IV Index cannot be overwritten"
            );
            return outcome;
        }

        outcome.proxy_connected = self.set_proxy_network_key(beacon.network_key);
        outcome
    }

    // === Proxy ===

    /// Network Key used by the connected proxy, if known.
    pub fn proxy_network_key(&self) -> Option<KeyIndex> {
        self.proxy_network_key
    }

    /// Record the proxy's Network Key. Returns true when no key was known,
    /// i.e. the proxy has just connected.
    pub fn set_proxy_network_key(&mut self, key: KeyIndex) -> bool {
        let just_connected = self.proxy_network_key.is_none();
        self.proxy_network_key = Some(key);
        just_connected
    }

    /// Forget the proxy key when the bearer closes.
    pub fn clear_proxy_network_key(&mut self) {
        self.proxy_network_key = None;
    }

    // === Send ===

    /// Encrypt an outgoing frame with the given Network Key.
    pub fn encode(
        &self,
        frame: &OutgoingFrame,
        network_key: KeyIndex,
        network: &MeshNetwork,
        nonce_type: NonceType,
    ) -> Result<NetworkPdu, NetworkError> {
        let key = network
            .network_key(network_key)
            .ok_or(NetworkError::NetworkKeyNotFound(network_key))?;
        Ok(NetworkPdu::encode(frame, key, network.iv_index(), nonce_type)?)
    }

    /// Network Key for Proxy Configuration messages.
    pub fn proxy_configuration_key(&self, network: &MeshNetwork) -> Result<KeyIndex, NetworkError> {
        self.proxy_network_key
            .filter(|&k| network.network_key(k).is_some())
            .or_else(|| network.primary_network_key().map(|k| k.index()))
            .or_else(|| network.network_keys().first().map(|k| k.index()))
            .ok_or(NetworkError::NoNetworkKey)
    }

    /// Group, virtual and local unicast destinations are also delivered to
    /// the local node.
    pub fn should_loop_back(network: &MeshNetwork, destination: Address) -> bool {
        destination.is_group() || destination.is_virtual() || network.is_local_unicast(destination)
    }

    /// PDUs with TTL 1 and PDUs for local unicast addresses stay local.
    pub fn should_transmit(network: &MeshNetwork, destination: Address, ttl: u8) -> bool {
        ttl != 1 && !network.is_local_unicast(destination)
    }

    /// Schedule `transmissions - 1` repetitions of a sent PDU.
    pub fn schedule_repeats(&mut self, pdu: Vec<u8>, transmissions: u8, interval_ms: u64, now_ms: u64) {
        if transmissions <= 1 {
            return;
        }
        self.repeats.push(PendingTransmit {
            pdu,
            remaining: transmissions - 1,
            interval_ms,
            next_at_ms: now_ms + interval_ms,
        });
    }

    /// PDUs whose repetition is due.
    pub fn poll_repeats(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        for pending in self.repeats.iter_mut().filter(|p| p.next_at_ms <= now_ms) {
            due.push(pending.pdu.clone());
            pending.remaining -= 1;
            pending.next_at_ms = now_ms + pending.interval_ms;
        }
        self.repeats.retain(|p| p.remaining > 0);
        due
    }

    /// Drop every pending repetition.
    pub fn cancel_repeats(&mut self) {
        self.repeats.clear();
    }

    pub fn pending_repeats(&self) -> usize {
        self.repeats.len()
    }

    /// Earliest repetition deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.repeats.iter().map(|p| p.next_at_ms).min()
    }

    /// Purge expired dedup cache entries.
    pub fn purge_cache(&mut self, now_ms: u64) -> usize {
        self.cache.purge_expired(now_ms)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
