use super::*;

fn key(s: &str) -> Key {
    let mut out = [0u8; 16];
    hex::decode_to_slice(s, &mut out).unwrap();
    out
}

#[test]
fn test_s1_sample() {
    assert_eq!(hex::encode(s1(b"test")), "b73cefbd641ef2ea598c2b6efb62f79c");
}

#[test]
fn test_k1_sample() {
    let n = key("3216d1509884b533248541792b877f98");
    let salt = key("2ba14ffa0df84a2831938d57d276cab4");
    let p = hex::decode("5a09d60797eeb4478aada59db3352a0d").unwrap();
    assert_eq!(hex::encode(k1(&n, &salt, &p)), "f6ed15a8934afbe7d83e8dcb57fcf5d7");
}

#[test]
fn test_k2_master_credentials() {
    let n = key("f7a2a44f8e8a8029064f173ddc1e2b00");
    let out = k2(&n, &[0x00]);
    assert_eq!(out.nid, 0x7F);
    assert_eq!(hex::encode(out.encryption_key), "9f589181a0f50de73c8070c7a6d27f46");
    assert_eq!(hex::encode(out.privacy_key), "4c715bd4a64b938f99b453351653124f");
}

#[test]
fn test_k3_network_id() {
    let n = key("f7a2a44f8e8a8029064f173ddc1e2b00");
    assert_eq!(hex::encode(k3(&n)), "ff046958233db014");
}

#[test]
fn test_k2_sample_network_key() {
    let n = key("7dd7364cd842ad18c17c2b820c84c3d6");
    let out = k2(&n, &[0x00]);
    assert_eq!(out.nid, 0x68);
    assert_eq!(hex::encode(out.encryption_key), "0953fa93e7caac9638f58820220a398e");
    assert_eq!(hex::encode(out.privacy_key), "8b84eedec100067d670971dd2aa700cf");
}

#[test]
fn test_k3_sample_network_key() {
    let n = key("7dd7364cd842ad18c17c2b820c84c3d6");
    assert_eq!(hex::encode(k3(&n)), "3ecaff672f673370");
}

#[test]
fn test_k4_aid() {
    let n = key("3216d1509884b533248541792b877f98");
    assert_eq!(k4(&n), 0x38);
}

#[test]
fn test_virtual_address_sample() {
    let label = key("0073e7e4d8b9440faf8415df4c56c0e1");
    assert_eq!(virtual_address(&label), 0xB529);
}

#[test]
fn test_virtual_address_range() {
    for seed in 0u8..32 {
        let label = [seed; 16];
        let addr = virtual_address(&label);
        assert_eq!(addr & 0xC000, 0x8000, "0x{addr:04X} is not virtual");
    }
}

#[test]
fn test_ccm_roundtrip_short_and_long_mic() {
    let k = key("0953fa93e7caac9638f58820220a398e");
    let nonce = [0x11u8; NONCE_SIZE];
    let plaintext = b"hello mesh";

    for mic in [MicSize::Short, MicSize::Long] {
        let sealed = ccm_encrypt(&k, &nonce, plaintext, &[], mic).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + mic.len());
        let opened = ccm_decrypt(&k, &nonce, &sealed, &[], mic).unwrap();
        assert_eq!(opened, plaintext);
    }
}

#[test]
fn test_ccm_rejects_tampered_mic() {
    let k = key("0953fa93e7caac9638f58820220a398e");
    let nonce = [0x22u8; NONCE_SIZE];
    let mut sealed = ccm_encrypt(&k, &nonce, b"payload", b"aad", MicSize::Short).unwrap();
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;
    assert!(ccm_decrypt(&k, &nonce, &sealed, b"aad", MicSize::Short).is_none());
}

#[test]
fn test_ccm_rejects_wrong_aad() {
    let k = key("0953fa93e7caac9638f58820220a398e");
    let nonce = [0x33u8; NONCE_SIZE];
    let sealed = ccm_encrypt(&k, &nonce, b"payload", b"label-a", MicSize::Long).unwrap();
    assert!(ccm_decrypt(&k, &nonce, &sealed, b"label-b", MicSize::Long).is_none());
}

#[test]
fn test_ccm_decrypt_too_short() {
    let k = [0u8; 16];
    assert!(ccm_decrypt(&k, &[0u8; NONCE_SIZE], &[1, 2, 3], &[], MicSize::Short).is_none());
}

#[test]
fn test_obfuscation_is_involutive() {
    let privacy = key("8b84eedec100067d670971dd2aa700cf");
    let header = [0x68, 0x00, 0x00, 0x01, 0x12, 0x01];
    let random = [1, 2, 3, 4, 5, 6, 7];
    let obf = obfuscate(&header, &privacy, 0x12345678, &random);
    assert_ne!(obf, header);
    assert_eq!(obfuscate(&obf, &privacy, 0x12345678, &random), header);
}

#[test]
fn test_derived_network_keys_differ() {
    let n = key("7dd7364cd842ad18c17c2b820c84c3d6");
    let beacon = beacon_key(&n);
    let identity = identity_key(&n);
    let private = private_beacon_key(&n);
    assert_ne!(beacon, identity);
    assert_ne!(beacon, private);
    assert_ne!(identity, private);
}
