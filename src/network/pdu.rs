//! Network PDU codec.
//!
//! ```text
//! [IVI|NID:1][obfuscated CTL|TTL:1 SEQ:3 SRC:2][encrypted DST:2 TransportPDU:1..16][NetMIC:4|8]
//! ```

use std::fmt;

use crate::crypto::{self, CryptoError, MicSize, NONCE_SIZE};
use crate::model::{
    Address, IvIndex, KeyIndex, KeyRefreshPhase, NetworkKey, NetworkKeyDerivatives,
};

/// Smallest valid Network PDU.
pub const MIN_NETWORK_PDU_SIZE: usize = 14;
/// Smallest valid Network PDU carrying a control message.
pub const MIN_CONTROL_PDU_SIZE: usize = 18;
/// Largest valid Network PDU.
pub const MAX_NETWORK_PDU_SIZE: usize = 29;
/// Largest sequence number.
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

/// Whether the transport PDU carries an access or a control message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportType {
    Access,
    Control,
}

impl TransportType {
    pub fn ctl(self) -> u8 {
        match self {
            TransportType::Access => 0,
            TransportType::Control => 1,
        }
    }

    pub fn net_mic(self) -> MicSize {
        match self {
            TransportType::Access => MicSize::Short,
            TransportType::Control => MicSize::Long,
        }
    }

    /// Largest transport PDU that fits in one Network PDU.
    pub fn max_transport_pdu(self) -> usize {
        MAX_NETWORK_PDU_SIZE - 9 - self.net_mic().len()
    }
}

/// Nonce used to secure the PDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonceType {
    /// Regular Network PDU (nonce type 0x00).
    Network,
    /// Proxy Configuration message (nonce type 0x03).
    Proxy,
}

impl NonceType {
    fn byte(self) -> u8 {
        match self {
            NonceType::Network => 0x00,
            NonceType::Proxy => 0x03,
        }
    }
}

/// Fields of a Network PDU prior to encryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub transport_type: TransportType,
    pub ttl: u8,
    pub sequence: u32,
    pub source: Address,
    pub destination: Address,
    pub transport_pdu: Vec<u8>,
}

/// A decoded (or freshly encoded) Network PDU.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkPdu {
    /// Raw bytes as sent over the bearer.
    pub pdu: Vec<u8>,
    /// Network Key used to secure the PDU.
    pub network_key: KeyIndex,
    /// Whether old key material of a refreshing key was used.
    pub old_key: bool,
    pub ivi: u8,
    pub nid: u8,
    /// Full IV Index used for the nonce.
    pub iv_index: u32,
    pub transport_type: TransportType,
    pub ttl: u8,
    pub sequence: u32,
    pub source: Address,
    pub destination: Address,
    pub transport_pdu: Vec<u8>,
}

impl NetworkPdu {
    /// Encrypt and obfuscate a frame with the key's current transmit
    /// credentials.
    pub fn encode(
        frame: &OutgoingFrame,
        network_key: &NetworkKey,
        iv_index: IvIndex,
        nonce_type: NonceType,
    ) -> Result<Self, CryptoError> {
        let keys = network_key.transmit_derivatives();
        let old_key = network_key.phase() == KeyRefreshPhase::KeyDistribution
            && network_key.old_derivatives().is_some();
        Self::encode_with(frame, keys, iv_index.transmit_index(), nonce_type)
            .map(|pdu| Self {
                network_key: network_key.index(),
                old_key,
                ..pdu
            })
    }

    fn encode_with(
        frame: &OutgoingFrame,
        keys: &NetworkKeyDerivatives,
        iv_index: u32,
        nonce_type: NonceType,
    ) -> Result<Self, CryptoError> {
        let len = frame.transport_pdu.len();
        if len == 0 || len > frame.transport_type.max_transport_pdu() {
            return Err(CryptoError::Encryption { len });
        }
        let ivi = (iv_index & 1) as u8;
        let ctl_ttl = (frame.transport_type.ctl() << 7) | (frame.ttl & 0x7F);
        let seq = frame.sequence & MAX_SEQUENCE;

        let mut plaintext = Vec::with_capacity(2 + frame.transport_pdu.len());
        plaintext.extend_from_slice(&frame.destination.to_be_bytes());
        plaintext.extend_from_slice(&frame.transport_pdu);

        let nonce = network_nonce(nonce_type, ctl_ttl, seq, frame.source, iv_index);
        let encrypted = crypto::ccm_encrypt(
            &keys.encryption_key,
            &nonce,
            &plaintext,
            &[],
            frame.transport_type.net_mic(),
        )?;

        let mut header = [0u8; 6];
        header[0] = ctl_ttl;
        header[1..4].copy_from_slice(&seq.to_be_bytes()[1..]);
        header[4..6].copy_from_slice(&frame.source.to_be_bytes());
        let obfuscated = crypto::obfuscate(&header, &keys.privacy_key, iv_index, &privacy_random(&encrypted));

        let mut pdu = Vec::with_capacity(7 + encrypted.len());
        pdu.push((ivi << 7) | keys.nid);
        pdu.extend_from_slice(&obfuscated);
        pdu.extend_from_slice(&encrypted);

        Ok(Self {
            pdu,
            network_key: 0,
            old_key: false,
            ivi,
            nid: keys.nid,
            iv_index,
            transport_type: frame.transport_type,
            ttl: frame.ttl & 0x7F,
            sequence: seq,
            source: frame.source,
            destination: frame.destination,
            transport_pdu: frame.transport_pdu.clone(),
        })
    }

    /// Decode and authenticate a received PDU.
    ///
    /// Every key whose NID matches is tried, current material before old.
    /// Returns `None` when no key authenticates the PDU.
    pub fn decode(
        data: &[u8],
        nonce_type: NonceType,
        network_keys: &[NetworkKey],
        iv_index: IvIndex,
    ) -> Option<Self> {
        if data.len() < MIN_NETWORK_PDU_SIZE || data.len() > MAX_NETWORK_PDU_SIZE {
            return None;
        }
        let ivi = data[0] >> 7;
        let nid = data[0] & 0x7F;
        let index = iv_index.index_for_ivi(ivi);

        for key in network_keys {
            let candidates = std::iter::once((key.derivatives(), false))
                .chain(key.old_derivatives().map(|d| (d, true)));
            for (keys, old_key) in candidates {
                if keys.nid != nid {
                    continue;
                }
                if let Some(mut pdu) = Self::decode_with(data, nonce_type, keys, index) {
                    pdu.network_key = key.index();
                    pdu.old_key = old_key;
                    return Some(pdu);
                }
            }
        }
        None
    }

    fn decode_with(
        data: &[u8],
        nonce_type: NonceType,
        keys: &NetworkKeyDerivatives,
        iv_index: u32,
    ) -> Option<Self> {
        let encrypted = &data[7..];
        let mut obfuscated = [0u8; 6];
        obfuscated.copy_from_slice(&data[1..7]);
        let header = crypto::obfuscate(&obfuscated, &keys.privacy_key, iv_index, &privacy_random(encrypted));

        let ctl_ttl = header[0];
        let transport_type = if ctl_ttl >> 7 == 1 {
            TransportType::Control
        } else {
            TransportType::Access
        };
        if transport_type == TransportType::Control && data.len() < MIN_CONTROL_PDU_SIZE {
            return None;
        }
        let sequence = u32::from_be_bytes([0, header[1], header[2], header[3]]);
        let source = Address::from_be_bytes([header[4], header[5]]);
        if !source.is_unicast() {
            return None;
        }

        let nonce = network_nonce(nonce_type, ctl_ttl, sequence, source, iv_index);
        let plaintext = crypto::ccm_decrypt(
            &keys.encryption_key,
            &nonce,
            encrypted,
            &[],
            transport_type.net_mic(),
        )?;
        let destination = Address::from_be_bytes([plaintext[0], plaintext[1]]);

        Some(Self {
            pdu: data.to_vec(),
            network_key: 0,
            old_key: false,
            ivi: (iv_index & 1) as u8,
            nid: keys.nid,
            iv_index,
            transport_type,
            ttl: ctl_ttl & 0x7F,
            sequence,
            source,
            destination,
            transport_pdu: plaintext[2..].to_vec(),
        })
    }

    /// SeqAuth of this PDU: IV Index and sequence number combined.
    pub fn seq_auth(&self) -> u64 {
        (u64::from(self.iv_index) << 24) | u64::from(self.sequence)
    }
}

impl fmt::Debug for NetworkPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkPdu")
            .field("type", &self.transport_type)
            .field("src", &self.source)
            .field("dst", &self.destination)
            .field("seq", &self.sequence)
            .field("ttl", &self.ttl)
            .field("iv", &self.iv_index)
            .field("key", &self.network_key)
            .finish()
    }
}

fn network_nonce(
    nonce_type: NonceType,
    ctl_ttl: u8,
    sequence: u32,
    source: Address,
    iv_index: u32,
) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = nonce_type.byte();
    nonce[1] = match nonce_type {
        NonceType::Network => ctl_ttl,
        NonceType::Proxy => 0,
    };
    nonce[2..5].copy_from_slice(&sequence.to_be_bytes()[1..]);
    nonce[5..7].copy_from_slice(&source.to_be_bytes());
    nonce[9..13].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

fn privacy_random(encrypted: &[u8]) -> [u8; 7] {
    let mut random = [0u8; 7];
    random.copy_from_slice(&encrypted[..7]);
    random
}
