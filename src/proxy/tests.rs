use std::collections::BTreeSet;

use super::*;
use crate::model::{Address, Element, MeshAddress, Model, ModelId, Node};

fn addresses(values: &[u16]) -> BTreeSet<Address> {
    values.iter().map(|v| Address::new(*v)).collect()
}

fn sends(actions: &[ProxyFilterAction]) -> Vec<&ProxyConfigurationMessage> {
    actions
        .iter()
        .filter_map(|a| match a {
            ProxyFilterAction::Send(m) => Some(m),
            _ => None,
        })
        .collect()
}

fn local_node() -> Node {
    Node::new(
        "local",
        Address::new(0x0001),
        vec![
            Element::new(vec![
                Model::new(ModelId::GENERIC_ON_OFF_CLIENT).subscribe(MeshAddress::new(Address::new(0xC000))),
            ]),
            Element::new(Vec::new()),
        ],
    )
}

/// Deliver every send and answer it with a matching status.
fn settle(filter: &mut ProxyFilter, mut actions: Vec<ProxyFilterAction>) -> Vec<ProxyFilterAction> {
    let mut events = Vec::new();
    while let Some(action) = actions.pop() {
        match action {
            ProxyFilterAction::Send(message) => {
                filter.delivered(&message);
                let size = filter.addresses().len() as u16;
                actions.extend(filter.handle_status(filter.filter_type(), size, Address::new(0x0100), None));
            }
            other => events.push(other),
        }
    }
    events
}

// ============================================================================
// Messages
// ============================================================================

#[test]
fn test_message_encoding() {
    assert_eq!(
        ProxyConfigurationMessage::SetFilterType(FilterType::RejectList).encode(),
        vec![0x00, 0x01]
    );
    assert_eq!(
        ProxyConfigurationMessage::AddAddresses(addresses(&[0x0001, 0xC000])).encode(),
        vec![0x01, 0x00, 0x01, 0xC0, 0x00]
    );
    let status = ProxyConfigurationMessage::FilterStatus {
        filter_type: FilterType::AcceptList,
        list_size: 3,
    };
    assert_eq!(status.encode(), vec![0x03, 0x00, 0x00, 0x03]);
    assert_eq!(ProxyConfigurationMessage::decode(&status.encode()), Some(status));
}

#[test]
fn test_message_decode_rejects_bad_lengths() {
    assert_eq!(ProxyConfigurationMessage::decode(&[]), None);
    assert_eq!(ProxyConfigurationMessage::decode(&[0x00, 0x02]), None);
    assert_eq!(ProxyConfigurationMessage::decode(&[0x01, 0x00]), None);
    assert_eq!(ProxyConfigurationMessage::decode(&[0x01]), None);
    assert_eq!(ProxyConfigurationMessage::decode(&[0x03, 0x00, 0x01]), None);
    assert_eq!(ProxyConfigurationMessage::decode(&[0x04, 0x00]), None);
}

#[test]
fn test_chunking() {
    let set = addresses(&[1, 2, 3, 4, 5, 6, 7]);
    let chunks = chunk_addresses(&set);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), MAX_ADDRESSES_PER_MESSAGE);
    assert_eq!(chunks[1], addresses(&[6, 7]));
    assert!(chunk_addresses(&BTreeSet::new()).is_empty());
}

// ============================================================================
// Filter
// ============================================================================

#[test]
fn test_requests_are_serialized() {
    let mut filter = ProxyFilter::new(ProxyFilterSetup::Automatic);
    let first = filter.add(&addresses(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]));
    assert_eq!(sends(&first).len(), 1);
    assert!(filter.is_busy());
    assert_eq!(filter.queued(), 2);

    filter.delivered(sends(&first)[0]);
    let next = filter.handle_status(FilterType::AcceptList, 5, Address::new(0x0100), None);
    assert_eq!(sends(&next).len(), 1);
    assert_eq!(filter.queued(), 1);
    assert_eq!(filter.proxy(), Some(Address::new(0x0100)));
}

#[test]
fn test_automatic_setup_on_connect() {
    let node = local_node();
    let mut filter = ProxyFilter::new(ProxyFilterSetup::Automatic);
    let actions = filter.proxy_connected(Some(&node));
    assert_eq!(
        sends(&actions),
        vec![&ProxyConfigurationMessage::AddAddresses(addresses(&[0x0001, 0x0002, 0xC000, 0xFFFF]))]
    );

    let events = settle(&mut filter, actions);
    assert!(events.contains(&ProxyFilterAction::Acknowledged {
        filter_type: FilterType::AcceptList,
        list_size: 4,
    }));
    assert_eq!(filter.addresses().len(), 4);
    assert!(!filter.is_busy());
}

#[test]
fn test_reject_list_setup() {
    let mut filter = ProxyFilter::new(ProxyFilterSetup::RejectList(addresses(&[0x0005])));
    let actions = filter.proxy_connected(None);
    assert_eq!(
        sends(&actions),
        vec![&ProxyConfigurationMessage::SetFilterType(FilterType::RejectList)]
    );
    assert_eq!(filter.queued(), 1);
    settle(&mut filter, actions);
    assert_eq!(filter.filter_type(), FilterType::RejectList);
    assert_eq!(filter.addresses(), &addresses(&[0x0005]));
}

#[test]
fn test_delivered_updates_local_view() {
    let mut filter = ProxyFilter::default();
    let updated = filter.delivered(&ProxyConfigurationMessage::AddAddresses(addresses(&[1, 2])));
    assert_eq!(
        updated,
        vec![ProxyFilterAction::Updated {
            filter_type: FilterType::AcceptList,
            addresses: addresses(&[1, 2]),
        }]
    );
    filter.delivered(&ProxyConfigurationMessage::RemoveAddresses(addresses(&[1])));
    assert_eq!(filter.addresses(), &addresses(&[2]));
    filter.delivered(&ProxyConfigurationMessage::SetFilterType(FilterType::RejectList));
    assert!(filter.addresses().is_empty());
}

#[test]
fn test_mismatch_refreshes_once() {
    let mut filter = ProxyFilter::default();
    let add = filter.add(&addresses(&[1, 2, 3]));
    filter.delivered(sends(&add)[0]);

    let refresh = filter.handle_status(FilterType::AcceptList, 2, Address::new(0x0100), None);
    assert_eq!(
        sends(&refresh),
        vec![&ProxyConfigurationMessage::SetFilterType(FilterType::AcceptList)]
    );
    assert_eq!(filter.queued(), 1);

    filter.delivered(sends(&refresh)[0]);
    let add_again = filter.handle_status(FilterType::AcceptList, 0, Address::new(0x0100), None);
    assert_eq!(
        sends(&add_again),
        vec![&ProxyConfigurationMessage::AddAddresses(addresses(&[1, 2, 3]))]
    );
    filter.delivered(sends(&add_again)[0]);

    // Still wrong: give up instead of looping.
    let gave_up = filter.handle_status(FilterType::AcceptList, 2, Address::new(0x0100), None);
    assert!(gave_up.is_empty());
    assert!(!filter.is_busy());
}

#[test]
fn test_limited_filter_falls_back_to_primary() {
    let mut filter = ProxyFilter::default();
    let add = filter.add(&addresses(&[0x0001, 0x0002, 0xFFFF]));
    filter.delivered(sends(&add)[0]);

    let actions = filter.handle_status(FilterType::AcceptList, 1, Address::new(0x0100), Some(Address::new(0x0001)));
    assert!(actions.contains(&ProxyFilterAction::Limited { max_size: 1 }));
    assert_eq!(
        sends(&actions),
        vec![&ProxyConfigurationMessage::SetFilterType(FilterType::AcceptList)]
    );

    settle(&mut filter, actions);
    assert_eq!(filter.addresses(), &addresses(&[0x0001]));
}

#[test]
fn test_failure_resets_state() {
    let mut filter = ProxyFilter::default();
    let add = filter.add(&addresses(&[1]));
    filter.delivered(sends(&add)[0]);
    filter.handle_status(FilterType::AcceptList, 1, Address::new(0x0100), None);
    filter.add(&addresses(&[2]));

    let actions = filter.failed(true);
    assert_eq!(
        actions,
        vec![ProxyFilterAction::Updated {
            filter_type: FilterType::AcceptList,
            addresses: BTreeSet::new(),
        }]
    );
    assert!(!filter.is_busy());
    assert_eq!(filter.proxy(), None);
}
