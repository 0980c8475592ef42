//! Mesh beacons: Secure Network, Private and Unprovisioned Device.

use crate::crypto::{self, CryptoError, MicSize, NONCE_SIZE};
use crate::model::{IvIndex, KeyIndex, NetworkKey};

const UNPROVISIONED_DEVICE: u8 = 0x00;
const SECURE_NETWORK: u8 = 0x01;
const PRIVATE: u8 = 0x02;

const SECURE_NETWORK_SIZE: usize = 22;
const PRIVATE_SIZE: usize = 27;

const FLAG_KEY_REFRESH: u8 = 0x01;
const FLAG_IV_UPDATE: u8 = 0x02;

/// Kind of an authenticated network beacon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkBeaconKind {
    SecureNetwork,
    Private,
}

/// An authenticated Secure Network or Private beacon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkBeacon {
    pub kind: NetworkBeaconKind,
    /// Network Key that authenticated the beacon.
    pub network_key: KeyIndex,
    pub key_refresh_flag: bool,
    pub iv_index: IvIndex,
    /// Authenticated with new key material while an old key exists, so
    /// the Key Refresh flag may move the key's phase.
    pub valid_for_key_refresh: bool,
}

/// An Unprovisioned Device beacon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnprovisionedDeviceBeacon {
    pub device_uuid: [u8; 16],
    pub oob_information: u16,
    pub uri_hash: Option<[u8; 4]>,
}

/// A decoded mesh beacon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshBeacon {
    Network(NetworkBeacon),
    UnprovisionedDevice(UnprovisionedDeviceBeacon),
}

impl MeshBeacon {
    /// Decode a beacon, authenticating network beacons against the known
    /// Network Keys. Returns `None` for unknown or unauthenticated beacons.
    pub fn decode(data: &[u8], network_keys: &[NetworkKey]) -> Option<Self> {
        match *data.first()? {
            UNPROVISIONED_DEVICE => {
                UnprovisionedDeviceBeacon::decode(data).map(MeshBeacon::UnprovisionedDevice)
            }
            SECURE_NETWORK => NetworkBeacon::decode_secure(data, network_keys).map(MeshBeacon::Network),
            PRIVATE => NetworkBeacon::decode_private(data, network_keys).map(MeshBeacon::Network),
            _ => None,
        }
    }
}

impl UnprovisionedDeviceBeacon {
    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != 19 && data.len() != 23 {
            return None;
        }
        let mut device_uuid = [0u8; 16];
        device_uuid.copy_from_slice(&data[1..17]);
        let oob_information = u16::from_be_bytes([data[17], data[18]]);
        let uri_hash = (data.len() == 23).then(|| {
            let mut hash = [0u8; 4];
            hash.copy_from_slice(&data[19..23]);
            hash
        });
        Some(Self {
            device_uuid,
            oob_information,
            uri_hash,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(23);
        pdu.push(UNPROVISIONED_DEVICE);
        pdu.extend_from_slice(&self.device_uuid);
        pdu.extend_from_slice(&self.oob_information.to_be_bytes());
        if let Some(hash) = self.uri_hash {
            pdu.extend_from_slice(&hash);
        }
        pdu
    }
}

fn flags(key_refresh: bool, iv_index: IvIndex) -> u8 {
    let mut flags = 0;
    if key_refresh {
        flags |= FLAG_KEY_REFRESH;
    }
    if iv_index.update_active {
        flags |= FLAG_IV_UPDATE;
    }
    flags
}

impl NetworkBeacon {
    fn decode_secure(data: &[u8], network_keys: &[NetworkKey]) -> Option<Self> {
        if data.len() != SECURE_NETWORK_SIZE {
            return None;
        }
        let flags = data[1];
        let network_id = &data[2..10];
        let iv = u32::from_be_bytes([data[10], data[11], data[12], data[13]]);

        for key in network_keys {
            let (beacon_key, valid_for_key_refresh) = if key.derivatives().network_id == network_id {
                (&key.derivatives().beacon_key, key.old_key().is_some())
            } else if let Some(old) = key.old_derivatives().filter(|d| d.network_id == network_id) {
                (&old.beacon_key, false)
            } else {
                continue;
            };

            let auth = crypto::aes_cmac(beacon_key, &data[1..14]);
            if auth[..8] != data[14..22] {
                continue;
            }
            return Some(Self {
                kind: NetworkBeaconKind::SecureNetwork,
                network_key: key.index(),
                key_refresh_flag: flags & FLAG_KEY_REFRESH != 0,
                iv_index: IvIndex::new(iv, flags & FLAG_IV_UPDATE != 0),
                valid_for_key_refresh,
            });
        }
        None
    }

    fn decode_private(data: &[u8], network_keys: &[NetworkKey]) -> Option<Self> {
        if data.len() != PRIVATE_SIZE {
            return None;
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[1..14]);

        for key in network_keys {
            let candidates = std::iter::once((&key.derivatives().private_beacon_key, key.old_key().is_some()))
                .chain(key.old_derivatives().map(|d| (&d.private_beacon_key, false)));
            for (private_key, valid_for_key_refresh) in candidates {
                let Some(plain) = crypto::ccm_decrypt(private_key, &nonce, &data[14..], &[], MicSize::Long)
                else {
                    continue;
                };
                let flags = plain[0];
                let iv = u32::from_be_bytes([plain[1], plain[2], plain[3], plain[4]]);
                return Some(Self {
                    kind: NetworkBeaconKind::Private,
                    network_key: key.index(),
                    key_refresh_flag: flags & FLAG_KEY_REFRESH != 0,
                    iv_index: IvIndex::new(iv, flags & FLAG_IV_UPDATE != 0),
                    valid_for_key_refresh,
                });
            }
        }
        None
    }

    /// Build a Secure Network beacon for the key's current state.
    pub fn secure(network_key: &NetworkKey, iv_index: IvIndex) -> Vec<u8> {
        let keys = network_key.derivatives();
        let mut pdu = Vec::with_capacity(SECURE_NETWORK_SIZE);
        pdu.push(SECURE_NETWORK);
        pdu.push(flags(network_key.key_refresh_flag(), iv_index));
        pdu.extend_from_slice(&keys.network_id);
        pdu.extend_from_slice(&iv_index.index.to_be_bytes());
        let auth = crypto::aes_cmac(&keys.beacon_key, &pdu[1..14]);
        pdu.extend_from_slice(&auth[..8]);
        pdu
    }

    /// Build a Private beacon using `random` as the nonce.
    pub fn private(
        network_key: &NetworkKey,
        iv_index: IvIndex,
        random: [u8; NONCE_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut plain = [0u8; 5];
        plain[0] = flags(network_key.key_refresh_flag(), iv_index);
        plain[1..5].copy_from_slice(&iv_index.index.to_be_bytes());
        let sealed = crypto::ccm_encrypt(
            &network_key.derivatives().private_beacon_key,
            &random,
            &plain,
            &[],
            MicSize::Long,
        )?;
        let mut pdu = Vec::with_capacity(PRIVATE_SIZE);
        pdu.push(PRIVATE);
        pdu.extend_from_slice(&random);
        pdu.extend_from_slice(&sealed);
        Ok(pdu)
    }
}
