use super::*;
use crate::model::{Element, Model, ModelId, NetworkKey, Node};

const NET_KEY: [u8; 16] = [
    0x7d, 0xd7, 0x36, 0x4c, 0xd8, 0x42, 0xad, 0x18, 0xc1, 0x7c, 0x2b, 0x82, 0x0c, 0x84, 0xc3, 0xd6,
];
const OTHER_KEY: [u8; 16] = [0x11; 16];
const HOUR_MS: u64 = 3_600_000;

fn make_network() -> MeshNetwork {
    let mut network = MeshNetwork::new();
    network.add_network_key(NetworkKey::new(0, NET_KEY).unwrap()).unwrap();
    let node = Node::new(
        "local",
        Address::new(0x0001),
        vec![Element::new(vec![Model::new(ModelId::CONFIGURATION_SERVER)])],
    );
    network.add_node(node).unwrap();
    network.set_local_node(Address::new(0x0001)).unwrap();
    network.set_iv_index(IvIndex::new(0x12345678, false));
    network
}

fn access_frame() -> OutgoingFrame {
    OutgoingFrame {
        transport_type: TransportType::Access,
        ttl: 4,
        sequence: 0x3129ab,
        source: Address::new(0x0003),
        destination: Address::new(0x1201),
        transport_pdu: vec![0x66, 0xca, 0x6c, 0xd8, 0x89, 0x60, 0xe6, 0x98, 0x03],
    }
}

// ============================================================================
// Network PDU
// ============================================================================

#[test]
fn test_network_pdu_roundtrip_access() {
    let network = make_network();
    let frame = access_frame();
    let key = network.network_key(0).unwrap();
    let encoded = NetworkPdu::encode(&frame, key, network.iv_index(), NonceType::Network).unwrap();
    assert_eq!(encoded.pdu.len(), 9 + frame.transport_pdu.len() + 4);
    assert_eq!(encoded.pdu[0] & 0x7F, key.derivatives().nid);

    let decoded =
        NetworkPdu::decode(&encoded.pdu, NonceType::Network, network.network_keys(), network.iv_index())
            .unwrap();
    assert_eq!(decoded, encoded);
    assert_eq!(decoded.source, frame.source);
    assert_eq!(decoded.destination, frame.destination);
    assert_eq!(decoded.sequence, frame.sequence);
    assert_eq!(decoded.ttl, 4);
    assert_eq!(decoded.transport_pdu, frame.transport_pdu);
}

#[test]
fn test_network_pdu_roundtrip_control() {
    let network = make_network();
    let frame = OutgoingFrame {
        transport_type: TransportType::Control,
        ttl: 0,
        transport_pdu: vec![0x0A, 0x05, 0x00, 0x01],
        ..access_frame()
    };
    let key = network.network_key(0).unwrap();
    let encoded = NetworkPdu::encode(&frame, key, network.iv_index(), NonceType::Network).unwrap();
    assert_eq!(encoded.pdu.len(), 9 + 4 + 8);
    let decoded =
        NetworkPdu::decode(&encoded.pdu, NonceType::Network, network.network_keys(), network.iv_index())
            .unwrap();
    assert_eq!(decoded.transport_type, TransportType::Control);
    assert_eq!(decoded.transport_pdu, frame.transport_pdu);
}

// Mesh Profile sample data, Message #1: a control message from 0x1201.
#[test]
fn test_network_pdu_sample_control_message() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let frame = OutgoingFrame {
        transport_type: TransportType::Control,
        ttl: 0,
        sequence: 1,
        source: Address::new(0x1201),
        destination: Address::new(0xFFFD),
        transport_pdu: hex::decode("034b50057e400000010000").unwrap(),
    };
    let expected = "68eca487516765b5e5bfdacbaf6cb7fb6bff871f035444ce83a670df";

    let encoded = NetworkPdu::encode(&frame, key, network.iv_index(), NonceType::Network).unwrap();
    assert_eq!(encoded.nid, 0x68);
    assert_eq!(hex::encode(&encoded.pdu), expected);

    let decoded = NetworkPdu::decode(
        &hex::decode(expected).unwrap(),
        NonceType::Network,
        network.network_keys(),
        network.iv_index(),
    )
    .unwrap();
    assert_eq!(decoded.ivi, 0);
    assert_eq!(decoded.transport_type, TransportType::Control);
    assert_eq!(decoded.ttl, 0);
    assert_eq!(decoded.sequence, 1);
    assert_eq!(decoded.source, Address::new(0x1201));
    assert_eq!(decoded.destination, Address::new(0xFFFD));
    assert_eq!(decoded.transport_pdu, frame.transport_pdu);
}

// Message #6, first segment of a Config AppKey Add.
#[test]
fn test_network_pdu_sample_access_segment() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let frame = OutgoingFrame {
        transport_pdu: hex::decode("8026ac01eee888aa2169326d23f3afdf").unwrap(),
        ..access_frame()
    };
    let encoded = NetworkPdu::encode(&frame, key, network.iv_index(), NonceType::Network).unwrap();
    assert_eq!(
        hex::encode(&encoded.pdu),
        "68cab5c5348a230afba8c63d4e681631c09deaf4fd409611459a3d6c3e"
    );
}

// Message #22: IV Index 0x12345677 is sent with IVI 1.
#[test]
fn test_network_pdu_sample_previous_iv_index() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let frame = OutgoingFrame {
        transport_type: TransportType::Access,
        ttl: 3,
        sequence: 0x07080b,
        source: Address::new(0x1234),
        destination: Address::new(0xB529),
        transport_pdu: hex::decode("663871b904d431526316ca48a0").unwrap(),
    };
    let iv_index = IvIndex::new(0x12345677, false);
    let encoded = NetworkPdu::encode(&frame, key, iv_index, NonceType::Network).unwrap();
    assert_eq!(encoded.ivi, 1);
    assert_eq!(
        hex::encode(&encoded.pdu),
        "e8d85caecef1e3ed31f3fdcf88a411135fea55df730b6b28e255"
    );
}

#[test]
fn test_network_pdu_header_is_obfuscated() {
    let network = make_network();
    let frame = access_frame();
    let key = network.network_key(0).unwrap();
    let encoded = NetworkPdu::encode(&frame, key, network.iv_index(), NonceType::Network).unwrap();
    assert_ne!(&encoded.pdu[2..5], &[0x31, 0x29, 0xab]);
}

#[test]
fn test_network_pdu_unknown_key_rejected() {
    let network = make_network();
    let foreign = NetworkKey::new(0, OTHER_KEY).unwrap();
    let encoded =
        NetworkPdu::encode(&access_frame(), &foreign, network.iv_index(), NonceType::Network).unwrap();
    assert!(
        NetworkPdu::decode(&encoded.pdu, NonceType::Network, network.network_keys(), network.iv_index())
            .is_none()
    );
}

#[test]
fn test_network_pdu_tampered_rejected() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let mut pdu = NetworkPdu::encode(&access_frame(), key, network.iv_index(), NonceType::Network)
        .unwrap()
        .pdu;
    let last = pdu.len() - 1;
    pdu[last] ^= 0x01;
    assert!(
        NetworkPdu::decode(&pdu, NonceType::Network, network.network_keys(), network.iv_index()).is_none()
    );
}

#[test]
fn test_network_pdu_length_limits() {
    let network = make_network();
    let keys = network.network_keys();
    assert!(NetworkPdu::decode(&[0u8; 13], NonceType::Network, keys, network.iv_index()).is_none());
    assert!(NetworkPdu::decode(&[0u8; 30], NonceType::Network, keys, network.iv_index()).is_none());

    let key = network.network_key(0).unwrap();
    let too_long = OutgoingFrame {
        transport_pdu: vec![0; 17],
        ..access_frame()
    };
    assert!(NetworkPdu::encode(&too_long, key, network.iv_index(), NonceType::Network).is_err());
    let empty = OutgoingFrame {
        transport_pdu: Vec::new(),
        ..access_frame()
    };
    assert!(NetworkPdu::encode(&empty, key, network.iv_index(), NonceType::Network).is_err());
}

#[test]
fn test_network_pdu_nonce_type_mismatch() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let frame = OutgoingFrame {
        transport_type: TransportType::Control,
        ttl: 0,
        destination: Address::UNASSIGNED,
        transport_pdu: vec![0x00, 0x00],
        ..access_frame()
    };
    let encoded = NetworkPdu::encode(&frame, key, network.iv_index(), NonceType::Proxy).unwrap();
    let keys = network.network_keys();
    assert!(NetworkPdu::decode(&encoded.pdu, NonceType::Network, keys, network.iv_index()).is_none());
    assert!(NetworkPdu::decode(&encoded.pdu, NonceType::Proxy, keys, network.iv_index()).is_some());
}

#[test]
fn test_network_pdu_uses_ivi_during_update() {
    let mut network = make_network();
    network.set_iv_index(IvIndex::new(0x12345679, true));
    let key = network.network_key(0).unwrap();
    let encoded = NetworkPdu::encode(&access_frame(), key, network.iv_index(), NonceType::Network).unwrap();
    // Transmitted with the previous index while the update is active.
    assert_eq!(encoded.iv_index, 0x12345678);
    assert_eq!(encoded.ivi, 0);

    let decoded =
        NetworkPdu::decode(&encoded.pdu, NonceType::Network, network.network_keys(), network.iv_index())
            .unwrap();
    assert_eq!(decoded.iv_index, 0x12345678);
}

#[test]
fn test_network_pdu_old_key_during_refresh() {
    let mut network = make_network();
    network.network_key_mut(0).unwrap().update_key(OTHER_KEY).unwrap();
    let key = network.network_key(0).unwrap();
    assert_eq!(key.phase(), KeyRefreshPhase::KeyDistribution);

    let encoded = NetworkPdu::encode(&access_frame(), key, network.iv_index(), NonceType::Network).unwrap();
    assert!(encoded.old_key);
    let decoded =
        NetworkPdu::decode(&encoded.pdu, NonceType::Network, network.network_keys(), network.iv_index())
            .unwrap();
    assert!(decoded.old_key);
    assert_eq!(decoded.network_key, 0);

    // A peer already on the new key is accepted too.
    let new_only = NetworkKey::new(0, OTHER_KEY).unwrap();
    let encoded = NetworkPdu::encode(&access_frame(), &new_only, network.iv_index(), NonceType::Network).unwrap();
    let decoded =
        NetworkPdu::decode(&encoded.pdu, NonceType::Network, network.network_keys(), network.iv_index())
            .unwrap();
    assert!(!decoded.old_key);
}

#[test]
fn test_seq_auth() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let pdu = NetworkPdu::encode(&access_frame(), key, network.iv_index(), NonceType::Network).unwrap();
    assert_eq!(pdu.seq_auth(), (0x12345678u64 << 24) | 0x3129ab);
}

// ============================================================================
// Beacons
// ============================================================================

#[test]
fn test_secure_beacon_roundtrip() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let pdu = NetworkBeacon::secure(key, IvIndex::new(0x12345679, true));
    assert_eq!(pdu.len(), 22);
    assert_eq!(pdu[1], 0x02);

    match MeshBeacon::decode(&pdu, network.network_keys()).unwrap() {
        MeshBeacon::Network(beacon) => {
            assert_eq!(beacon.kind, NetworkBeaconKind::SecureNetwork);
            assert_eq!(beacon.iv_index, IvIndex::new(0x12345679, true));
            assert!(!beacon.key_refresh_flag);
            assert!(!beacon.valid_for_key_refresh);
        }
        other => panic!("unexpected beacon {other:?}"),
    }
}

#[test]
fn test_secure_beacon_bad_auth() {
    let network = make_network();
    let mut pdu = NetworkBeacon::secure(network.network_key(0).unwrap(), network.iv_index());
    pdu[21] ^= 0xFF;
    assert!(MeshBeacon::decode(&pdu, network.network_keys()).is_none());
}

#[test]
fn test_secure_beacon_refresh_validity() {
    let mut network = make_network();
    let old_key = NetworkKey::new(0, NET_KEY).unwrap();
    network.network_key_mut(0).unwrap().update_key(OTHER_KEY).unwrap();

    // Sent by a node still on the old key.
    let pdu = NetworkBeacon::secure(&old_key, network.iv_index());
    let Some(MeshBeacon::Network(beacon)) = MeshBeacon::decode(&pdu, network.network_keys()) else {
        panic!("beacon not decoded");
    };
    assert!(!beacon.valid_for_key_refresh);

    // Sent with the new key.
    let mut new_key = NetworkKey::new(0, OTHER_KEY).unwrap();
    new_key.set_old_key(Some(NET_KEY));
    new_key.use_new_keys();
    let pdu = NetworkBeacon::secure(&new_key, network.iv_index());
    let Some(MeshBeacon::Network(beacon)) = MeshBeacon::decode(&pdu, network.network_keys()) else {
        panic!("beacon not decoded");
    };
    assert!(beacon.valid_for_key_refresh);
    assert!(beacon.key_refresh_flag);
}

#[test]
fn test_private_beacon_roundtrip() {
    let network = make_network();
    let key = network.network_key(0).unwrap();
    let pdu = NetworkBeacon::private(key, IvIndex::new(7, false), [0x42; 13]).unwrap();
    assert_eq!(pdu.len(), 27);
    let Some(MeshBeacon::Network(beacon)) = MeshBeacon::decode(&pdu, network.network_keys()) else {
        panic!("beacon not decoded");
    };
    assert_eq!(beacon.kind, NetworkBeaconKind::Private);
    assert_eq!(beacon.iv_index, IvIndex::new(7, false));

    let mut tampered = pdu.clone();
    tampered[15] ^= 0x01;
    assert!(MeshBeacon::decode(&tampered, network.network_keys()).is_none());
}

#[test]
fn test_unprovisioned_device_beacon() {
    let beacon = UnprovisionedDeviceBeacon {
        device_uuid: [0xAB; 16],
        oob_information: 0x0102,
        uri_hash: Some([1, 2, 3, 4]),
    };
    let pdu = beacon.encode();
    assert_eq!(pdu.len(), 23);
    assert_eq!(
        MeshBeacon::decode(&pdu, &[]),
        Some(MeshBeacon::UnprovisionedDevice(beacon.clone()))
    );

    let short = UnprovisionedDeviceBeacon {
        uri_hash: None,
        ..beacon
    };
    assert_eq!(short.encode().len(), 19);
    assert!(MeshBeacon::decode(&short.encode(), &[]).is_some());
    assert!(MeshBeacon::decode(&short.encode()[..18], &[]).is_none());
}

#[test]
fn test_unknown_beacon_type() {
    assert!(MeshBeacon::decode(&[0x05; 22], &[]).is_none());
    assert!(MeshBeacon::decode(&[], &[]).is_none());
}

// ============================================================================
// Network Layer
// ============================================================================

#[test]
fn test_receive_deduplicates() {
    let network = make_network();
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let key = network.network_key(0).unwrap();
    let pdu = NetworkPdu::encode(&access_frame(), key, network.iv_index(), NonceType::Network).unwrap();

    assert!(matches!(
        layer.receive(&pdu.pdu, PduType::NetworkPdu, &network, 1_000),
        Some(Incoming::Network(_))
    ));
    assert!(layer.receive(&pdu.pdu, PduType::NetworkPdu, &network, 1_500).is_none());
    assert!(layer.is_cached(&pdu.pdu, 1_500));
}

#[test]
fn test_receive_ignores_provisioning_and_garbage() {
    let network = make_network();
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    assert!(layer.receive(&[0x03, 0x00], PduType::ProvisioningPdu, &network, 0).is_none());
    assert!(layer.receive(&[0u8; 20], PduType::NetworkPdu, &network, 0).is_none());
    assert_eq!(layer.cache_len(), 1);
}

#[test]
fn test_receive_beacons_not_cached() {
    let network = make_network();
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let pdu = NetworkBeacon::secure(network.network_key(0).unwrap(), network.iv_index());
    assert!(layer.receive(&pdu, PduType::MeshBeacon, &network, 0).is_some());
    assert!(layer.receive(&pdu, PduType::MeshBeacon, &network, 1).is_some());
}

fn beacon(index: u32, update_active: bool) -> NetworkBeacon {
    NetworkBeacon {
        kind: NetworkBeaconKind::SecureNetwork,
        network_key: 0,
        key_refresh_flag: false,
        iv_index: IvIndex::new(index, update_active),
        valid_for_key_refresh: false,
    }
}

#[test]
fn test_beacon_advances_iv_index() {
    let mut network = make_network();
    network.set_iv_index(IvIndex::new(5, false));
    let mut state = IvIndexState {
        iv_index: IvIndex::new(5, false),
        transition_ms: Some(0),
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let now = 100 * HOUR_MS;

    let outcome = layer.handle_network_beacon(&beacon(6, true), &mut network, &mut state, &NetworkConfig::default(), now);
    assert_eq!(
        outcome.iv_index_changed,
        Some((IvIndex::new(5, false), IvIndex::new(6, true)))
    );
    // Transmit index stays 5 while the update is in progress.
    assert!(!outcome.reset_sequences);
    assert!(outcome.proxy_connected);
    assert_eq!(network.iv_index(), IvIndex::new(6, true));
    assert_eq!(state.transition_ms, Some(now));
    assert!(!state.recovery_active);

    let later = now + 100 * HOUR_MS;
    let outcome = layer.handle_network_beacon(&beacon(6, false), &mut network, &mut state, &NetworkConfig::default(), later);
    assert!(outcome.reset_sequences);
    assert!(!outcome.proxy_connected);
}

#[test]
fn test_beacon_rejected_too_early() {
    let mut network = make_network();
    network.set_iv_index(IvIndex::new(5, false));
    let mut state = IvIndexState {
        iv_index: IvIndex::new(5, false),
        transition_ms: Some(0),
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());

    let outcome =
        layer.handle_network_beacon(&beacon(7, true), &mut network, &mut state, &NetworkConfig::default(), 10 * HOUR_MS);
    assert_eq!(outcome, BeaconOutcome::default());
    assert_eq!(network.iv_index(), IvIndex::new(5, false));
    assert_eq!(layer.proxy_network_key(), None);
}

#[test]
fn test_beacon_recovery_flag() {
    let mut network = make_network();
    network.set_iv_index(IvIndex::new(5, false));
    let mut state = IvIndexState {
        iv_index: IvIndex::new(5, false),
        transition_ms: None,
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let outcome =
        layer.handle_network_beacon(&beacon(10, false), &mut network, &mut state, &NetworkConfig::default(), 0);
    assert!(outcome.reset_sequences);
    assert!(state.recovery_active);
}

#[test]
fn test_beacon_key_refresh_phases() {
    let mut network = make_network();
    network.network_key_mut(0).unwrap().update_key(OTHER_KEY).unwrap();
    let iv = network.iv_index();
    let mut state = IvIndexState {
        iv_index: iv,
        transition_ms: None,
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let config = NetworkConfig::default();

    let mut refresh = beacon(iv.index, false);
    refresh.key_refresh_flag = true;
    refresh.valid_for_key_refresh = true;
    let outcome = layer.handle_network_beacon(&refresh, &mut network, &mut state, &config, 0);
    assert_eq!(outcome.key_refresh, Some((0, KeyRefreshPhase::UsingNewKeys)));
    assert_eq!(network.network_key(0).unwrap().phase(), KeyRefreshPhase::UsingNewKeys);

    refresh.key_refresh_flag = false;
    let outcome = layer.handle_network_beacon(&refresh, &mut network, &mut state, &config, 0);
    assert_eq!(outcome.key_refresh, Some((0, KeyRefreshPhase::NormalOperation)));
    let key = network.network_key(0).unwrap();
    assert_eq!(key.phase(), KeyRefreshPhase::NormalOperation);
    assert!(key.old_key().is_none());
}

#[test]
fn test_beacon_invalid_for_refresh_ignored() {
    let mut network = make_network();
    network.network_key_mut(0).unwrap().update_key(OTHER_KEY).unwrap();
    let iv = network.iv_index();
    let mut state = IvIndexState {
        iv_index: iv,
        transition_ms: None,
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let mut b = beacon(iv.index, false);
    b.key_refresh_flag = true;
    let outcome = layer.handle_network_beacon(&b, &mut network, &mut state, &NetworkConfig::default(), 0);
    assert_eq!(outcome.key_refresh, None);
    assert_eq!(network.network_key(0).unwrap().phase(), KeyRefreshPhase::KeyDistribution);
}

#[test]
fn test_secondary_key_beacon_only_sets_proxy_key() {
    let mut network = make_network();
    network.add_network_key(NetworkKey::new(1, OTHER_KEY).unwrap()).unwrap();
    let mut state = IvIndexState {
        iv_index: network.iv_index(),
        transition_ms: None,
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let mut b = beacon(network.iv_index().index + 1, true);
    b.network_key = 1;

    let outcome = layer.handle_network_beacon(&b, &mut network, &mut state, &NetworkConfig::default(), 0);
    assert!(outcome.proxy_connected);
    assert_eq!(outcome.iv_index_changed, None);
    assert_eq!(layer.proxy_network_key(), Some(1));

    // A second secondary beacon does not replace the proxy key.
    let outcome = layer.handle_network_beacon(&b, &mut network, &mut state, &NetworkConfig::default(), 0);
    assert!(!outcome.proxy_connected);
}

#[test]
fn test_previous_iv_state_keeps_proxy() {
    let mut network = make_network();
    network.set_iv_index(IvIndex::new(6, false));
    let mut state = IvIndexState {
        iv_index: IvIndex::new(6, false),
        transition_ms: Some(0),
        recovery_active: false,
    };
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    let outcome =
        layer.handle_network_beacon(&beacon(6, true), &mut network, &mut state, &NetworkConfig::default(), HOUR_MS);
    assert!(outcome.proxy_connected);
    assert_eq!(outcome.iv_index_changed, None);
}

#[test]
fn test_proxy_configuration_key() {
    let mut network = make_network();
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    assert_eq!(layer.proxy_configuration_key(&network).unwrap(), 0);

    network.add_network_key(NetworkKey::new(2, OTHER_KEY).unwrap()).unwrap();
    layer.set_proxy_network_key(2);
    assert_eq!(layer.proxy_configuration_key(&network).unwrap(), 2);

    layer.clear_proxy_network_key();
    assert_eq!(layer.proxy_network_key(), None);
    assert!(matches!(
        layer.proxy_configuration_key(&MeshNetwork::new()),
        Err(NetworkError::NoNetworkKey)
    ));
}

#[test]
fn test_loopback_rules() {
    let network = make_network();
    assert!(NetworkLayer::should_loop_back(&network, Address::new(0xC001)));
    assert!(NetworkLayer::should_loop_back(&network, Address::new(0x8123)));
    assert!(NetworkLayer::should_loop_back(&network, Address::new(0x0001)));
    assert!(!NetworkLayer::should_loop_back(&network, Address::new(0x0002)));

    assert!(NetworkLayer::should_transmit(&network, Address::new(0x0002), 5));
    assert!(!NetworkLayer::should_transmit(&network, Address::new(0x0002), 1));
    assert!(!NetworkLayer::should_transmit(&network, Address::new(0x0001), 5));
    assert!(NetworkLayer::should_transmit(&network, Address::new(0xC001), 5));
}

#[test]
fn test_network_transmit_repeats() {
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    layer.schedule_repeats(vec![1], 1, 20, 0);
    assert_eq!(layer.pending_repeats(), 0);

    layer.schedule_repeats(vec![1, 2], 3, 20, 0);
    assert_eq!(layer.next_deadline(), Some(20));
    assert!(layer.poll_repeats(19).is_empty());
    assert_eq!(layer.poll_repeats(20), vec![vec![1, 2]]);
    assert_eq!(layer.next_deadline(), Some(40));
    assert_eq!(layer.poll_repeats(40).len(), 1);
    assert_eq!(layer.pending_repeats(), 0);
    assert!(layer.poll_repeats(100).is_empty());
}

#[test]
fn test_cancel_repeats() {
    let mut layer = NetworkLayer::new(&NetworkConfig::default());
    layer.schedule_repeats(vec![1], 4, 20, 0);
    layer.cancel_repeats();
    assert!(layer.poll_repeats(1_000).is_empty());
}
