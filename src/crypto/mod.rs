//! Mesh Security Toolbox
//!
//! AES-128 primitives and the key derivation functions used by every
//! layer of the stack:
//!
//! | Function | Construction                              | Used for                      |
//! |----------|-------------------------------------------|-------------------------------|
//! | `s1`     | AES-CMAC with zero key                    | salts                         |
//! | `k1`     | CMAC(CMAC(salt, N), P)                    | beacon, identity keys         |
//! | `k2`     | CMAC chain T1..T3                         | NID, encryption, privacy keys |
//! | `k3`     | CMAC(T, "id64" 0x01), last 8 bytes         | Network ID                    |
//! | `k4`     | CMAC(T, "id6" 0x01), low 6 bits            | AID                           |
//!
//! Authenticated encryption uses AES-CCM with a 13-byte nonce and a 32 or
//! 64-bit MIC.

#[cfg(test)]
mod tests;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::AeadInPlace;
use ccm::consts::{U13, U4, U8};
use ccm::Ccm;
use cmac::{Cmac, Mac};
use thiserror::Error;

/// 128-bit key material.
pub type Key = [u8; 16];

/// Size of a CCM nonce in bytes.
pub const NONCE_SIZE: usize = 13;

type Ccm32 = Ccm<Aes128, U4, U13>;
type Ccm64 = Ccm<Aes128, U8, U13>;

/// Errors raised by the security toolbox.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AES-CCM encryption failed for {len} byte payload")]
    Encryption { len: usize },
}

/// Length of a Message Integrity Check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MicSize {
    /// 32-bit MIC.
    Short,
    /// 64-bit MIC.
    Long,
}

impl MicSize {
    /// MIC length in bytes.
    pub fn len(self) -> usize {
        match self {
            MicSize::Short => 4,
            MicSize::Long => 8,
        }
    }
}

// ============================================================================
// Primitives
// ============================================================================

/// Encrypts a single block with AES-128 in ECB mode.
pub fn aes_ecb(key: &Key, block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Computes AES-CMAC of `data` under `key`.
pub fn aes_cmac(key: &Key, data: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(key.into());
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Encrypts `plaintext` with AES-CCM, returning ciphertext followed by the MIC.
pub fn ccm_encrypt(
    key: &Key,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
    mic: MicSize,
) -> Result<Vec<u8>, CryptoError> {
    let nonce = GenericArray::from_slice(nonce);
    let mut buffer = plaintext.to_vec();
    let tag = match mic {
        MicSize::Short => Ccm32::new(key.into())
            .encrypt_in_place_detached(nonce, aad, &mut buffer)
            .map(|t| t.to_vec()),
        MicSize::Long => Ccm64::new(key.into())
            .encrypt_in_place_detached(nonce, aad, &mut buffer)
            .map(|t| t.to_vec()),
    }
    .map_err(|_| CryptoError::Encryption { len: plaintext.len() })?;
    buffer.extend_from_slice(&tag);
    Ok(buffer)
}

/// Decrypts and authenticates `data` (ciphertext followed by the MIC).
///
/// Returns `None` when the MIC does not verify.
pub fn ccm_decrypt(
    key: &Key,
    nonce: &[u8; NONCE_SIZE],
    data: &[u8],
    aad: &[u8],
    mic: MicSize,
) -> Option<Vec<u8>> {
    let mic_len = mic.len();
    if data.len() < mic_len {
        return None;
    }
    let (ciphertext, tag) = data.split_at(data.len() - mic_len);
    let nonce = GenericArray::from_slice(nonce);
    let mut buffer = ciphertext.to_vec();
    let result = match mic {
        MicSize::Short => Ccm32::new(key.into()).decrypt_in_place_detached(
            nonce,
            aad,
            &mut buffer,
            GenericArray::from_slice(tag),
        ),
        MicSize::Long => Ccm64::new(key.into()).decrypt_in_place_detached(
            nonce,
            aad,
            &mut buffer,
            GenericArray::from_slice(tag),
        ),
    };
    result.ok().map(|_| buffer)
}

// ============================================================================
// Key derivation
// ============================================================================

/// Salt generation function.
pub fn s1(m: &[u8]) -> Key {
    aes_cmac(&[0u8; 16], m)
}

/// Derivation function k1.
pub fn k1(n: &Key, salt: &Key, p: &[u8]) -> Key {
    let t = aes_cmac(salt, n);
    aes_cmac(&t, p)
}

/// Network credentials derived by `k2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct K2Output {
    pub nid: u8,
    pub encryption_key: Key,
    pub privacy_key: Key,
}

/// Derivation function k2.
pub fn k2(n: &Key, p: &[u8]) -> K2Output {
    let salt = s1(b"smk2");
    let t = aes_cmac(&salt, n);

    let mut input = Vec::with_capacity(16 + p.len() + 1);
    input.extend_from_slice(p);
    input.push(0x01);
    let t1 = aes_cmac(&t, &input);

    input.clear();
    input.extend_from_slice(&t1);
    input.extend_from_slice(p);
    input.push(0x02);
    let t2 = aes_cmac(&t, &input);

    input.clear();
    input.extend_from_slice(&t2);
    input.extend_from_slice(p);
    input.push(0x03);
    let t3 = aes_cmac(&t, &input);

    K2Output {
        nid: t1[15] & 0x7F,
        encryption_key: t2,
        privacy_key: t3,
    }
}

/// Derivation function k3, producing the 64-bit Network ID.
pub fn k3(n: &Key) -> [u8; 8] {
    let salt = s1(b"smk3");
    let t = aes_cmac(&salt, n);
    let out = aes_cmac(&t, b"id64\x01");
    let mut id = [0u8; 8];
    id.copy_from_slice(&out[8..]);
    id
}

/// Derivation function k4, producing the 6-bit AID.
pub fn k4(n: &Key) -> u8 {
    let salt = s1(b"smk4");
    let t = aes_cmac(&salt, n);
    aes_cmac(&t, b"id6\x01")[15] & 0x3F
}

/// BeaconKey used to authenticate Secure Network Beacons.
pub fn beacon_key(net_key: &Key) -> Key {
    k1(net_key, &s1(b"nkbk"), b"id128\x01")
}

/// IdentityKey used for Node Identity advertising.
pub fn identity_key(net_key: &Key) -> Key {
    k1(net_key, &s1(b"nkik"), b"id128\x01")
}

/// PrivateBeaconKey used for Private Beacons.
pub fn private_beacon_key(net_key: &Key) -> Key {
    k1(net_key, &s1(b"nkpk"), b"id128\x01")
}

/// Hashes a Label UUID into a virtual address.
pub fn virtual_address(label: &[u8; 16]) -> u16 {
    let salt = s1(b"vtad");
    let hash = aes_cmac(&salt, label);
    let value = u16::from_be_bytes([hash[14], hash[15]]);
    (value | 0x8000) & 0xBFFF
}

// ============================================================================
// Network obfuscation
// ============================================================================

/// Computes the 6-byte PECB mask used to (de)obfuscate a Network PDU header.
///
/// `privacy_random` is the first 7 bytes of the encrypted DST + transport
/// PDU + NetMIC.
pub fn pecb(privacy_key: &Key, iv_index: u32, privacy_random: &[u8; 7]) -> [u8; 6] {
    let mut plaintext = [0u8; 16];
    plaintext[5..9].copy_from_slice(&iv_index.to_be_bytes());
    plaintext[9..16].copy_from_slice(privacy_random);
    let out = aes_ecb(privacy_key, &plaintext);
    let mut mask = [0u8; 6];
    mask.copy_from_slice(&out[..6]);
    mask
}

/// XORs `header` with the PECB mask. Obfuscation is its own inverse.
pub fn obfuscate(header: &[u8; 6], privacy_key: &Key, iv_index: u32, privacy_random: &[u8; 7]) -> [u8; 6] {
    let mask = pecb(privacy_key, iv_index, privacy_random);
    let mut out = [0u8; 6];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = header[i] ^ mask[i];
    }
    out
}
