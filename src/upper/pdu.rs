//! Upper Transport PDU encryption.
//!
//! Access payloads are encrypted with AES-CCM under an Application Key
//! (nonce type 0x01) or a Device Key (nonce type 0x02). The nonce binds the
//! sequence number, both addresses and the IV Index. Messages to virtual
//! addresses authenticate the Label UUID as additional data.

use std::fmt;

use crate::crypto::{self, CryptoError, Key, MicSize, NONCE_SIZE};
use crate::lower::AccessMessage;
use crate::model::{Address, ApplicationKey, KeyIndex, MeshAddress, MeshNetwork, NetworkKey};

const APPLICATION_NONCE: u8 = 0x01;
const DEVICE_NONCE: u8 = 0x02;

/// Largest access payload that fits an unsegmented message with a 32-bit
/// TransMIC.
pub const MAX_UNSEGMENTED_ACCESS_PAYLOAD: usize = 11;

/// Keys a message was (or will be) secured with.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySet {
    Application {
        network_key: KeyIndex,
        application_key: KeyIndex,
        key: Key,
        aid: u8,
    },
    Device {
        network_key: KeyIndex,
        /// Node owning the Device Key.
        node: Address,
        key: Key,
    },
}

impl KeySet {
    /// Application key set using the key appropriate for the bound Network
    /// Key's Key Refresh phase.
    pub fn application(app_key: &ApplicationKey, network_key: &NetworkKey) -> Self {
        let (key, aid) = app_key.transmit_key(network_key.phase());
        KeySet::Application {
            network_key: network_key.index(),
            application_key: app_key.index(),
            key: *key,
            aid,
        }
    }

    pub fn device(network_key: KeyIndex, node: Address, key: Key) -> Self {
        KeySet::Device {
            network_key,
            node,
            key,
        }
    }

    pub fn network_key(&self) -> KeyIndex {
        match self {
            KeySet::Application { network_key, .. } | KeySet::Device { network_key, .. } => *network_key,
        }
    }

    pub fn application_key(&self) -> Option<KeyIndex> {
        match self {
            KeySet::Application { application_key, .. } => Some(*application_key),
            KeySet::Device { .. } => None,
        }
    }

    pub fn aid(&self) -> Option<u8> {
        match self {
            KeySet::Application { aid, .. } => Some(*aid),
            KeySet::Device { .. } => None,
        }
    }

    fn access_key(&self) -> &Key {
        match self {
            KeySet::Application { key, .. } | KeySet::Device { key, .. } => key,
        }
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySet::Application {
                network_key,
                application_key,
                aid,
                ..
            } => write!(f, "AppKey({application_key}, aid {aid:#04x}, net {network_key})"),
            KeySet::Device { network_key, node, .. } => write!(f, "DevKey({node}, net {network_key})"),
        }
    }
}

/// TransMIC size for an access payload.
///
/// The 64-bit TransMIC is only used by segmented messages.
pub fn transport_mic_size(high_security: bool, access_pdu_len: usize, segmented: bool) -> MicSize {
    if high_security && (segmented || access_pdu_len > MAX_UNSEGMENTED_ACCESS_PAYLOAD) {
        MicSize::Long
    } else {
        MicSize::Short
    }
}

fn nonce(
    aid: Option<u8>,
    mic: MicSize,
    sequence: u32,
    source: Address,
    destination: Address,
    iv_index: u32,
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = if aid.is_some() {
        APPLICATION_NONCE
    } else {
        DEVICE_NONCE
    };
    nonce[1] = if mic == MicSize::Long { 0x80 } else { 0x00 };
    nonce[2..5].copy_from_slice(&sequence.to_be_bytes()[1..]);
    nonce[5..7].copy_from_slice(&source.to_be_bytes());
    nonce[7..9].copy_from_slice(&destination.to_be_bytes());
    nonce[9..13].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

/// A decrypted or freshly encrypted Upper Transport PDU.
#[derive(Clone, PartialEq, Eq)]
pub struct UpperTransportPdu {
    pub source: Address,
    pub destination: MeshAddress,
    pub aid: Option<u8>,
    pub sequence: u32,
    pub iv_index: u32,
    pub transport_mic: MicSize,
    /// Plaintext access payload.
    pub access_pdu: Vec<u8>,
    /// Encrypted payload followed by the TransMIC.
    pub transport_pdu: Vec<u8>,
}

impl UpperTransportPdu {
    /// Encrypt `access_pdu` for sending.
    #[allow(clippy::too_many_arguments)]
    pub fn encrypt(
        access_pdu: &[u8],
        source: Address,
        destination: &MeshAddress,
        key_set: &KeySet,
        sequence: u32,
        iv_index: u32,
        transport_mic: MicSize,
    ) -> Result<Self, CryptoError> {
        let aid = key_set.aid();
        let nonce = nonce(aid, transport_mic, sequence, source, destination.address, iv_index);
        let aad = destination.virtual_label.as_ref().map(|l| l.as_slice()).unwrap_or(&[]);
        let transport_pdu = crypto::ccm_encrypt(key_set.access_key(), &nonce, access_pdu, aad, transport_mic)?;
        Ok(Self {
            source,
            destination: *destination,
            aid,
            sequence,
            iv_index,
            transport_mic,
            access_pdu: access_pdu.to_vec(),
            transport_pdu,
        })
    }

    /// Decrypt `message` with `key`, authenticating `label` for virtual
    /// destinations. Returns `None` when the TransMIC does not verify.
    pub fn decrypt(message: &AccessMessage, key: &Key, label: Option<&[u8; 16]>) -> Option<Self> {
        let nonce = nonce(
            message.aid,
            message.transport_mic,
            message.sequence,
            message.source,
            message.destination,
            message.iv_index,
        );
        let aad = label.map(|l| l.as_slice()).unwrap_or(&[]);
        let access_pdu = crypto::ccm_decrypt(key, &nonce, &message.upper_transport_pdu, aad, message.transport_mic)?;
        let destination = match label {
            Some(label) => MeshAddress {
                address: message.destination,
                virtual_label: Some(*label),
            },
            None => MeshAddress::new(message.destination),
        };
        Some(Self {
            source: message.source,
            destination,
            aid: message.aid,
            sequence: message.sequence,
            iv_index: message.iv_index,
            transport_mic: message.transport_mic,
            access_pdu,
            transport_pdu: message.upper_transport_pdu.clone(),
        })
    }

    /// Find the key that decrypts `message`.
    ///
    /// Application messages try every Application Key bound to the Network
    /// Key the message arrived with whose AID (current or old) matches.
    /// Device Key messages try the source node's key, then the
    /// destination's.
    pub fn decode(message: &AccessMessage, network: &MeshNetwork) -> Option<(Self, KeySet)> {
        match message.aid {
            Some(aid) => {
                let labels: Vec<Option<[u8; 16]>> = if message.destination.is_virtual() {
                    network
                        .virtual_labels(message.destination)
                        .into_iter()
                        .map(Some)
                        .collect()
                } else {
                    vec![None]
                };
                for app_key in network.application_keys_bound_to(message.network_key) {
                    let candidates: Vec<(u8, &Key)> = std::iter::once((app_key.aid(), app_key.key()))
                        .chain(app_key.old_aid().zip(app_key.old_key()))
                        .filter(|(candidate, _)| *candidate == aid)
                        .collect();
                    for label in &labels {
                        for &(_, key) in &candidates {
                            if let Some(pdu) = Self::decrypt(message, key, label.as_ref()) {
                                let key_set = KeySet::Application {
                                    network_key: message.network_key,
                                    application_key: app_key.index(),
                                    key: *key,
                                    aid,
                                };
                                return Some((pdu, key_set));
                            }
                        }
                    }
                }
                None
            }
            None => [message.source, message.destination]
                .into_iter()
                .filter_map(|address| network.node_with_address(address))
                .find_map(|node| {
                    let key = node.device_key?;
                    let pdu = Self::decrypt(message, &key, None)?;
                    Some((pdu, KeySet::device(message.network_key, node.primary_address, key)))
                }),
        }
    }
}

impl fmt::Debug for UpperTransportPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpperTransportPdu")
            .field("src", &self.source)
            .field("dst", &self.destination.address)
            .field("seq", &self.sequence)
            .field("aid", &self.aid)
            .field("access_pdu", &hex::encode(&self.access_pdu))
            .finish()
    }
}
