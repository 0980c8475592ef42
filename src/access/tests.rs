use super::messages::*;
use super::*;
use crate::model::{
    ApplicationKey, Element, IvIndex, Model, NetworkKey, Node, Publish, PublishPeriod, Retransmit,
};

const LOCAL: Address = Address::new(0x0001);
const LOCAL_SECONDARY: Address = Address::new(0x0002);
const REMOTE: Address = Address::new(0x0042);
const GROUP: Address = Address::new(0xC001);
const LOCAL_DEVICE_KEY: [u8; 16] = [0x11; 16];
const IV: u32 = 0x0000_1234;

fn make_network() -> MeshNetwork {
    let mut network = MeshNetwork::new();
    network.add_network_key(NetworkKey::new(0, [0x5A; 16]).unwrap()).unwrap();
    network
        .add_application_key(ApplicationKey::new(0, [0x63; 16], 0).unwrap())
        .unwrap();
    network
        .add_application_key(ApplicationKey::new(1, [0x64; 16], 0).unwrap())
        .unwrap();
    let mut local = Node::new(
        "local",
        LOCAL,
        vec![
            Element::new(vec![
                Model::new(ModelId::GENERIC_ON_OFF_SERVER).bind(0),
                Model::new(ModelId::GENERIC_ON_OFF_CLIENT)
                    .bind(0)
                    .subscribe(MeshAddress::new(GROUP)),
            ]),
            Element::new(vec![Model::new(ModelId::GENERIC_ON_OFF_SERVER).bind(0)]),
        ],
    );
    local.device_key = Some(LOCAL_DEVICE_KEY);
    local.network_keys = vec![0];
    network.add_node(local).unwrap();
    network.set_local_node(LOCAL).unwrap();
    let mut remote = Node::new("remote", REMOTE, vec![Element::new(Vec::new())]);
    remote.device_key = Some([0x9D; 16]);
    remote.network_keys = vec![0];
    network.add_node(remote).unwrap();
    network
        .add_node(Node::new("keyless", Address::new(0x0050), Vec::new()))
        .unwrap();
    network.set_iv_index(IvIndex::new(IV, false));
    network
}

fn make_layer() -> AccessLayer {
    AccessLayer::new(NetworkConfig::default())
}

fn app_key_set(network: &MeshNetwork) -> KeySet {
    KeySet::application(
        network.application_key(0).unwrap(),
        network.network_key(0).unwrap(),
    )
}

fn request(message: impl MeshMessage, destination: Address) -> AccessRequest {
    AccessRequest {
        message: Box::new(message),
        element_index: 0,
        model: None,
        destination: MeshAddress::new(destination),
        application_key: 0,
        ttl: None,
    }
}

/// Upper Transport PDU carrying `message` as a receiver sees it.
fn incoming(
    message: &dyn MeshMessage,
    source: Address,
    destination: MeshAddress,
    key_set: &KeySet,
) -> UpperTransportPdu {
    UpperTransportPdu::encrypt(
        &AccessPdu::encode(message.opcode(), &message.parameters()).unwrap(),
        source,
        &destination,
        key_set,
        1,
        IV,
        MicSize::Short,
    )
    .unwrap()
}

fn received(result: Option<AccessIncoming>) -> AccessReceived {
    match result {
        Some(AccessIncoming::Message(received)) => received,
        other => panic!("expected a message, got {other:?}"),
    }
}

fn sent(actions: &[AccessAction]) -> Vec<&OutgoingAccess> {
    actions
        .iter()
        .filter_map(|a| match a {
            AccessAction::Send(o) => Some(o),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Opcodes and PDUs
// ============================================================================

#[test]
fn test_opcode_sizes() {
    assert_eq!(encode_opcode(0x06), Some(vec![0x06]));
    assert_eq!(encode_opcode(0x8201), Some(vec![0x82, 0x01]));
    assert_eq!(encode_opcode(0xC1_0059), Some(vec![0xC1, 0x00, 0x59]));

    assert_eq!(decode_opcode(&[0x06, 0xAA]), Some((0x06, 1)));
    assert_eq!(decode_opcode(&[0x82, 0x01]), Some((0x8201, 2)));
    assert_eq!(decode_opcode(&[0xC1, 0x00, 0x59, 0x01]), Some((0xC1_0059, 3)));
    assert!(is_vendor_opcode(0xC1_0059));
    assert!(!is_vendor_opcode(0x8201));
}

#[test]
fn test_opcode_rejects_reserved_and_truncated() {
    assert_eq!(decode_opcode(&[0x7F]), None);
    assert_eq!(decode_opcode(&[0x82]), None);
    assert_eq!(decode_opcode(&[0xC1, 0x00]), None);
    assert_eq!(decode_opcode(&[]), None);
}

#[test]
fn test_encode_opcode_requires_size_prefix() {
    assert_eq!(encode_opcode(0x7F), None);
    assert_eq!(encode_opcode(0x80), None);
    assert_eq!(encode_opcode(0x1234), None);
    assert_eq!(encode_opcode(0x4001), None);
    assert_eq!(encode_opcode(0xC000), None);
    assert_eq!(encode_opcode(0x3F_0001), None);
    assert_eq!(encode_opcode(0x0100_0000), None);
    assert_eq!(encode_opcode(0xBFFF), Some(vec![0xBF, 0xFF]));
    assert_eq!(AccessPdu::encode(0x1234, &[0x01]), None);
}

#[test]
fn test_segment_count() {
    assert_eq!(segment_count(11, 4, false), 1);
    assert_eq!(segment_count(12, 4, true), 2);
    assert_eq!(segment_count(20, 8, true), 3);
}

// ============================================================================
// Built-in messages
// ============================================================================

#[test]
fn test_onoff_set_lengths() {
    let plain = GenericOnOffSet::decode(&[0x01, 0x07]).unwrap();
    assert!(plain.0.on);
    assert_eq!(plain.0.tid, Some(7));
    assert_eq!(plain.0.transition, Transition::Default);

    let timed = GenericOnOffSet::decode(&[0x00, 0x08, 0x45, 0x0A]).unwrap();
    assert_eq!(
        timed.0.transition,
        Transition::Timed {
            time: TransitionTime::new(5, 1),
            delay: 0x0A,
        }
    );
    assert_eq!(timed.parameters(), vec![0x00, 0x08, 0x45, 0x0A]);

    assert!(GenericOnOffSet::decode(&[0x01]).is_none());
    assert!(GenericOnOffSet::decode(&[0x01, 0x07, 0x45]).is_none());
    assert!(GenericOnOffSet::decode(&[0x01, 0x07, 0x45, 0x00, 0x00]).is_none());
    assert!(GenericOnOffSet::decode(&[0x02, 0x07]).is_none());
}

#[test]
fn test_onoff_status_lengths() {
    assert_eq!(GenericOnOffStatus::decode(&[0x01]), Some(GenericOnOffStatus::new(true)));
    let status = GenericOnOffStatus::decode(&[0x00, 0x01, 0x0A]).unwrap();
    assert_eq!(
        status.transition,
        OnOffTransition::InProgress {
            target: true,
            remaining: TransitionTime::from_raw(0x0A),
        }
    );
    assert!(GenericOnOffStatus::decode(&[]).is_none());
    assert!(GenericOnOffStatus::decode(&[0x00, 0x01]).is_none());
    assert!(GenericOnOffGet::decode(&[0x00]).is_none());
}

#[test]
fn test_transition_time() {
    assert_eq!(TransitionTime::new(5, 1).as_ms(), Some(5_000));
    assert_eq!(TransitionTime::from_raw(0x3F).as_ms(), None);
    assert_eq!(TransitionTime::from_ms(300), TransitionTime::new(3, 0));
    assert_eq!(TransitionTime::from_ms(10_000), TransitionTime::new(10, 1));
    assert_eq!(TransitionTime::from_ms(0).as_ms(), Some(0));
}

#[test]
fn test_heartbeat_publication_layout() {
    let set = ConfigHeartbeatPublicationSet(HeartbeatPublicationState {
        destination: Address::new(0xC001),
        count_log: 0x05,
        period_log: 0x03,
        ttl: 0x07,
        features: crate::model::Features::from_bits(0x0003),
        network_key: 0x0123,
    });
    let params = set.parameters();
    assert_eq!(params, vec![0x01, 0xC0, 0x05, 0x03, 0x07, 0x03, 0x00, 0x23, 0x01]);
    assert_eq!(ConfigHeartbeatPublicationSet::decode(&params), Some(set));
    assert!(ConfigHeartbeatPublicationSet::decode(&params[..8]).is_none());
    assert!(set.requires_device_key());

    let status = ConfigHeartbeatPublicationStatus {
        status: ConfigStatus::InvalidNetKeyIndex,
        state: set.0,
    };
    let encoded = status.parameters();
    assert_eq!(encoded.len(), 10);
    assert_eq!(encoded[0], 0x04);
    assert_eq!(ConfigHeartbeatPublicationStatus::decode(&encoded), Some(status));
}

#[test]
fn test_heartbeat_subscription_layout() {
    let set = ConfigHeartbeatSubscriptionSet {
        source: Address::new(0x0042),
        destination: Address::new(0x0001),
        period_log: 0x04,
    };
    assert_eq!(set.parameters(), vec![0x42, 0x00, 0x01, 0x00, 0x04]);
    assert_eq!(ConfigHeartbeatSubscriptionSet::decode(&set.parameters()), Some(set));
    assert!(ConfigHeartbeatSubscriptionSet::decode(&[0x42, 0x00, 0x01, 0x00]).is_none());

    let status = ConfigHeartbeatSubscriptionStatus {
        status: ConfigStatus::Success,
        source: set.source,
        destination: set.destination,
        period_log: 0x03,
        count_log: 0x02,
        min_hops: 1,
        max_hops: 3,
    };
    assert_eq!(status.parameters().len(), 9);
    assert_eq!(ConfigHeartbeatSubscriptionStatus::decode(&status.parameters()), Some(status));
    assert!(ConfigHeartbeatSubscriptionStatus::decode(&[0x00; 10]).is_none());
}

#[test]
fn test_config_request_decode() {
    assert!(matches!(
        ConfigRequest::decode(0x8038, &[]),
        Some(ConfigRequest::HeartbeatPublicationGet(_))
    ));
    assert!(ConfigRequest::decode(0x8038, &[0x00]).is_none());
    assert!(ConfigRequest::decode(0x8204, &[0x00]).is_none());
}

// ============================================================================
// Sending
// ============================================================================

#[test]
fn test_send_validation() {
    let network = make_network();
    let mut layer = make_layer();

    let mut bad_ttl = request(GenericOnOffSetUnacknowledged::new(true), REMOTE);
    bad_ttl.ttl = Some(1);
    assert_eq!(layer.send(bad_ttl, &network, 0), Err(AccessError::InvalidTtl));

    let unassigned = request(GenericOnOffGet, Address::UNASSIGNED);
    assert_eq!(layer.send(unassigned, &network, 0), Err(AccessError::InvalidDestination));

    let mut bad_element = request(GenericOnOffGet, REMOTE);
    bad_element.element_index = 5;
    assert_eq!(layer.send(bad_element, &network, 0), Err(AccessError::InvalidElement));

    let mut bad_key = request(GenericOnOffGet, REMOTE);
    bad_key.application_key = 9;
    assert_eq!(layer.send(bad_key, &network, 0), Err(AccessError::NoApplicationKey));

    let mut unbound = request(GenericOnOffGet, REMOTE);
    unbound.model = Some(ModelId::GENERIC_ON_OFF_CLIENT);
    unbound.application_key = 1;
    assert_eq!(layer.send(unbound, &network, 0), Err(AccessError::ModelNotBoundToAppKey));

    let unprefixed = request(
        UnknownMessage {
            opcode: 0x1234,
            parameters: vec![0x01],
        },
        REMOTE,
    );
    assert_eq!(layer.send(unprefixed, &network, 0), Err(AccessError::InvalidOpcode));

    assert_eq!(layer.pending_count(), 0);
}

#[test]
fn test_send_config_validation() {
    let network = make_network();
    let mut layer = make_layer();

    let to_group = layer.send_config(Box::new(ConfigHeartbeatPublicationGet), GROUP, None, &network, 0);
    assert_eq!(to_group, Err(AccessError::InvalidDestination));

    let keyless = layer.send_config(
        Box::new(ConfigHeartbeatPublicationGet),
        Address::new(0x0050),
        None,
        &network,
        0,
    );
    assert_eq!(keyless, Err(AccessError::NoDeviceKey));

    let outgoing = layer
        .send_config(Box::new(ConfigHeartbeatPublicationGet), REMOTE, None, &network, 0)
        .unwrap();
    assert_eq!(outgoing.source, LOCAL);
    assert_eq!(outgoing.access_pdu, vec![0x80, 0x38]);
    assert!(matches!(outgoing.key_set, KeySet::Device { node, .. } if node == REMOTE));
    assert!(layer.is_pending(outgoing.id));
}

#[test]
fn test_tid_continuation_window() {
    let network = make_network();
    let mut layer = make_layer();
    let tid_of = |o: &OutgoingAccess| o.access_pdu[3];

    let first = layer
        .send(request(GenericOnOffSetUnacknowledged::new(true), REMOTE), &network, 0)
        .unwrap();
    let continued = layer
        .send(
            request(GenericOnOffSetUnacknowledged::new(false).continuing(), REMOTE),
            &network,
            5_000,
        )
        .unwrap();
    assert_eq!(tid_of(&continued), tid_of(&first));

    let after_gap = layer
        .send(
            request(GenericOnOffSetUnacknowledged::new(true).continuing(), REMOTE),
            &network,
            12_000,
        )
        .unwrap();
    assert_eq!(tid_of(&after_gap), tid_of(&first).wrapping_add(1));

    let fresh = layer
        .send(request(GenericOnOffSetUnacknowledged::new(true), REMOTE), &network, 12_100)
        .unwrap();
    assert_eq!(tid_of(&fresh), tid_of(&after_gap).wrapping_add(1));
}

#[test]
fn test_explicit_tid_is_kept() {
    let network = make_network();
    let mut layer = make_layer();
    let mut message = GenericOnOffSetUnacknowledged::new(true);
    message.0.tid = Some(0x42);
    let outgoing = layer.send(request(message, REMOTE), &network, 0).unwrap();
    assert_eq!(outgoing.access_pdu, vec![0x82, 0x03, 0x01, 0x42]);
}

#[test]
fn test_acknowledged_retry_and_timeout() {
    let network = make_network();
    let mut layer = make_layer();
    let outgoing = layer.send(request(GenericOnOffGet, REMOTE), &network, 0).unwrap();
    // 2 000 ms base + 50 per hop (default TTL 5) + 50 per segment
    assert_eq!(layer.next_deadline(), Some(2_300));

    assert!(layer.poll(&network, 2_299, |_| false).is_empty());
    let retry = layer.poll(&network, 2_300, |_| false);
    assert_eq!(sent(&retry), vec![&outgoing]);

    assert!(layer.poll(&network, 6_899, |_| false).is_empty());
    assert_eq!(sent(&layer.poll(&network, 6_900, |_| false)).len(), 1);
    assert_eq!(sent(&layer.poll(&network, 16_100, |_| false)).len(), 1);

    assert!(layer.poll(&network, 29_999, |_| false).is_empty());
    let timeout = layer.poll(&network, 30_000, |_| false);
    assert_eq!(
        timeout,
        vec![AccessAction::Timeout {
            id: outgoing.id,
            opcode: 0x8201,
            destination: REMOTE,
        }]
    );
    assert_eq!(layer.pending_count(), 0);
    assert_eq!(layer.next_deadline(), None);
}

#[test]
fn test_retry_postponed_while_destination_busy() {
    let network = make_network();
    let mut layer = make_layer();
    layer.send(request(GenericOnOffGet, REMOTE), &network, 0).unwrap();

    assert!(layer.poll(&network, 2_300, |a| a == REMOTE).is_empty());
    assert_eq!(layer.next_deadline(), Some(4_600));
    assert_eq!(sent(&layer.poll(&network, 4_600, |_| false)).len(), 1);
}

#[test]
fn test_outstanding_request_is_busy() {
    let network = make_network();
    let mut layer = make_layer();
    layer.send(request(GenericOnOffGet, REMOTE), &network, 0).unwrap();
    assert_eq!(
        layer.send(request(GenericOnOffGet, REMOTE), &network, 10),
        Err(AccessError::Busy)
    );
    // A different request/response pair is independent.
    assert!(layer.send(request(GenericOnOffSet::new(true), LOCAL_SECONDARY), &network, 10).is_ok());
}

#[test]
fn test_group_request_has_no_context() {
    let network = make_network();
    let mut layer = make_layer();
    layer.send(request(GenericOnOffGet, GROUP), &network, 0).unwrap();
    assert_eq!(layer.pending_count(), 0);
    assert!(layer.send(request(GenericOnOffGet, GROUP), &network, 0).is_ok());
}

#[test]
fn test_cancel_is_idempotent() {
    let network = make_network();
    let mut layer = make_layer();
    let outgoing = layer.send(request(GenericOnOffGet, REMOTE), &network, 0).unwrap();
    assert!(layer.cancel(outgoing.id));
    assert!(!layer.cancel(outgoing.id));
    assert!(layer.poll(&network, 40_000, |_| false).is_empty());
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_set_reaches_server_and_schedules_reply() {
    let network = make_network();
    let mut layer = make_layer();
    let server = GenericOnOffServer::new(false);
    let state = server.state();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(server));

    let key_set = app_key_set(&network);
    let mut set = GenericOnOffSet::new(true);
    set.0.tid = Some(3);
    let pdu = incoming(&set, REMOTE, MeshAddress::new(LOCAL), &key_set);

    let message = received(layer.handle(&pdu, &key_set, &network, 1_000));
    assert_eq!(message.message.downcast_ref::<GenericOnOffSet>(), Some(&set));
    assert_eq!(message.source, REMOTE);
    assert!(state.lock().present);

    assert!(sent(&layer.poll(&network, 1_019, |_| false)).is_empty());
    let replies = layer.poll(&network, 1_050, |_| false);
    let replies = sent(&replies);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].opcode, 0x8204);
    assert_eq!(replies[0].source, LOCAL);
    assert_eq!(replies[0].destination.address, REMOTE);
    assert_eq!(replies[0].access_pdu, vec![0x82, 0x04, 0x01]);
}

#[test]
fn test_repeated_tid_is_not_applied_twice() {
    let network = make_network();
    let mut layer = make_layer();
    let server = GenericOnOffServer::new(false);
    let state = server.state();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(server));
    let key_set = app_key_set(&network);

    let mut on = GenericOnOffSetUnacknowledged::new(true);
    on.0.tid = Some(9);
    let mut off = GenericOnOffSetUnacknowledged::new(false);
    off.0.tid = Some(9);

    layer.handle(&incoming(&on, REMOTE, MeshAddress::new(LOCAL), &key_set), &key_set, &network, 0);
    layer.handle(&incoming(&off, REMOTE, MeshAddress::new(LOCAL), &key_set), &key_set, &network, 2_000);
    assert!(state.lock().present);

    layer.handle(&incoming(&off, REMOTE, MeshAddress::new(LOCAL), &key_set), &key_set, &network, 9_000);
    assert!(!state.lock().present);
}

#[test]
fn test_timed_transition_settles() {
    let network = make_network();
    let mut layer = make_layer();
    let server = GenericOnOffServer::new(false);
    let state = server.state();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(server));
    let key_set = app_key_set(&network);

    let mut set = GenericOnOffSet::new(true).with_transition(Transition::Timed {
        time: TransitionTime::new(2, 1),
        delay: 0,
    });
    set.0.tid = Some(1);
    layer.handle(&incoming(&set, REMOTE, MeshAddress::new(LOCAL), &key_set), &key_set, &network, 0);
    assert!(!state.lock().present);
    assert_eq!(state.lock().target, Some((true, 2_000)));

    let replies = layer.poll(&network, 50, |_| false);
    let status = GenericOnOffStatus::decode(&sent(&replies)[0].access_pdu[2..]).unwrap();
    assert!(matches!(status.transition, OnOffTransition::InProgress { target: true, .. }));
}

#[test]
fn test_group_delivery_requires_subscription() {
    let network = make_network();
    let mut layer = make_layer();
    let client = GenericOnOffClient::new();
    let last = client.last_status();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_CLIENT, Box::new(client));
    let key_set = app_key_set(&network);
    let status = GenericOnOffStatus::new(true);

    let subscribed = received(layer.handle(
        &incoming(&status, REMOTE, MeshAddress::new(GROUP), &key_set),
        &key_set,
        &network,
        0,
    ));
    assert!(subscribed.message.is::<GenericOnOffStatus>());
    assert_eq!(*last.lock(), Some((REMOTE, status)));

    *last.lock() = None;
    let other_group = received(layer.handle(
        &incoming(&status, REMOTE, MeshAddress::new(Address::new(0xC002)), &key_set),
        &key_set,
        &network,
        0,
    ));
    assert!(other_group.message.is::<UnknownMessage>());
    assert!(last.lock().is_none());
}

#[test]
fn test_all_nodes_reaches_primary_element_only() {
    let network = make_network();
    let mut layer = make_layer();
    let primary = GenericOnOffServer::new(false);
    let secondary = GenericOnOffServer::new(false);
    let (primary_state, secondary_state) = (primary.state(), secondary.state());
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(primary));
    layer
        .registry_mut()
        .register(1, ModelId::GENERIC_ON_OFF_SERVER, Box::new(secondary));
    let key_set = app_key_set(&network);

    let mut set = GenericOnOffSetUnacknowledged::new(true);
    set.0.tid = Some(4);
    layer.handle(
        &incoming(&set, REMOTE, MeshAddress::new(Address::ALL_NODES), &key_set),
        &key_set,
        &network,
        0,
    );
    assert!(primary_state.lock().present);
    assert!(!secondary_state.lock().present);
}

#[test]
fn test_unbound_application_key_is_not_dispatched() {
    let network = make_network();
    let mut layer = make_layer();
    let server = GenericOnOffServer::new(false);
    let state = server.state();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(server));
    let other_key = KeySet::application(
        network.application_key(1).unwrap(),
        network.network_key(0).unwrap(),
    );
    let mut set = GenericOnOffSetUnacknowledged::new(true);
    set.0.tid = Some(1);
    let message = received(layer.handle(
        &incoming(&set, REMOTE, MeshAddress::new(LOCAL), &other_key),
        &other_key,
        &network,
        0,
    ));
    assert!(message.message.is::<UnknownMessage>());
    assert!(!state.lock().present);
}

#[test]
fn test_response_resolves_pending_request() {
    let network = make_network();
    let mut layer = make_layer();
    let client = GenericOnOffClient::new();
    let last = client.last_status();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_CLIENT, Box::new(client));
    let outgoing = layer.send(request(GenericOnOffGet, REMOTE), &network, 0).unwrap();

    let key_set = app_key_set(&network);
    let status = GenericOnOffStatus::new(false);
    let response = received(layer.handle(
        &incoming(&status, REMOTE, MeshAddress::new(LOCAL), &key_set),
        &key_set,
        &network,
        500,
    ));
    assert_eq!(response.response_to, Some(outgoing.id));
    assert_eq!(layer.pending_count(), 0);
    assert_eq!(*last.lock(), Some((REMOTE, status)));
}

#[test]
fn test_unknown_opcode_is_surfaced() {
    let network = make_network();
    let mut layer = make_layer();
    let key_set = app_key_set(&network);
    let unknown = UnknownMessage {
        opcode: 0xC1_0059,
        parameters: vec![0x01, 0x02],
    };
    let message = received(layer.handle(
        &incoming(&unknown, REMOTE, MeshAddress::new(LOCAL), &key_set),
        &key_set,
        &network,
        0,
    ));
    assert_eq!(message.message.downcast_ref::<UnknownMessage>(), Some(&unknown));
}

#[test]
fn test_config_request_goes_to_config_server() {
    let network = make_network();
    let mut layer = make_layer();
    let key_set = KeySet::device(0, LOCAL, LOCAL_DEVICE_KEY);
    let pdu = incoming(&ConfigHeartbeatSubscriptionGet, REMOTE, MeshAddress::new(LOCAL), &key_set);
    match layer.handle(&pdu, &key_set, &network, 0) {
        Some(AccessIncoming::Config(config)) => {
            assert_eq!(config.source, REMOTE);
            assert_eq!(config.destination, LOCAL);
            assert!(matches!(config.request, ConfigRequest::HeartbeatSubscriptionGet(_)));
        }
        other => panic!("expected config request, got {other:?}"),
    }
}

#[test]
fn test_config_status_resolves_config_request() {
    let network = make_network();
    let mut layer = make_layer();
    let outgoing = layer
        .send_config(Box::new(ConfigHeartbeatSubscriptionGet), REMOTE, None, &network, 0)
        .unwrap();
    let status = ConfigHeartbeatSubscriptionStatus::disabled(ConfigStatus::Success);
    let response = received(layer.handle(
        &incoming(&status, REMOTE, MeshAddress::new(LOCAL), &outgoing.key_set),
        &outgoing.key_set,
        &network,
        100,
    ));
    assert_eq!(response.response_to, Some(outgoing.id));
    assert_eq!(
        response.message.downcast_ref::<ConfigHeartbeatSubscriptionStatus>(),
        Some(&status)
    );
}

// ============================================================================
// Publication
// ============================================================================

#[test]
fn test_periodic_publication() {
    let mut network = make_network();
    network.local_node_mut().unwrap().elements[0].models[0].publish = Some(Publish {
        address: MeshAddress::new(GROUP),
        application_key: 0,
        ttl: crate::model::DEFAULT_TTL_SENTINEL,
        period: PublishPeriod {
            steps: 10,
            resolution: 0,
        },
        retransmit: Retransmit {
            count: 1,
            interval_ms: 50,
        },
    });
    let mut layer = make_layer();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(GenericOnOffServer::new(true)));
    layer.refresh_all_publications(&network, 0);
    assert_eq!(layer.next_deadline(), Some(1_000));

    let first = layer.poll(&network, 1_000, |_| false);
    let first = sent(&first);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].destination.address, GROUP);
    assert_eq!(first[0].ttl, None);
    assert_eq!(first[0].access_pdu, vec![0x82, 0x04, 0x01]);

    assert_eq!(sent(&layer.poll(&network, 1_050, |_| false)).len(), 1);
    assert_eq!(layer.next_deadline(), Some(2_000));

    network.local_node_mut().unwrap().elements[0].models[0].publish = None;
    layer.refresh_publication(0, ModelId::GENERIC_ON_OFF_SERVER, &network, 1_100);
    assert_eq!(layer.next_deadline(), None);
}

#[test]
fn test_publish_without_settings() {
    let network = make_network();
    let mut layer = make_layer();
    layer
        .registry_mut()
        .register(0, ModelId::GENERIC_ON_OFF_SERVER, Box::new(GenericOnOffServer::new(true)));
    assert_eq!(
        layer.publish(0, ModelId::GENERIC_ON_OFF_SERVER, &network, 0),
        Err(AccessError::InvalidDestination)
    );
    assert_eq!(
        layer.publish(4, ModelId::GENERIC_ON_OFF_SERVER, &network, 0),
        Err(AccessError::InvalidElement)
    );
}
