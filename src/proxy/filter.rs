//! Proxy filter state machine.
//!
//! Requests are serialized: one message is outstanding at a time and the
//! rest wait in a FIFO until the proxy answers with a Filter Status.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::message::{chunk_addresses, FilterType, ProxyConfigurationMessage};
use crate::model::{Address, Node};

/// Filter configuration applied when a proxy connects
/// (`manager.proxy_filter`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "addresses", rename_all = "snake_case")]
pub enum ProxyFilterSetup {
    /// Accept list of the local node's unicast addresses, its
    /// subscriptions and All Nodes.
    #[default]
    Automatic,
    AcceptList(BTreeSet<Address>),
    RejectList(BTreeSet<Address>),
}

/// Work produced by the proxy filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyFilterAction {
    /// Send a message to the connected proxy.
    Send(ProxyConfigurationMessage),
    /// The local view of the filter changed.
    Updated {
        filter_type: FilterType,
        addresses: BTreeSet<Address>,
    },
    /// The proxy confirmed the expected filter.
    Acknowledged { filter_type: FilterType, list_size: u16 },
    /// The proxy only accepts this many addresses.
    Limited { max_size: u16 },
}

/// Proxy filter of the connected proxy, as known locally.
#[derive(Debug, Default)]
pub struct ProxyFilter {
    setup: ProxyFilterSetup,
    filter_type: FilterType,
    addresses: BTreeSet<Address>,
    proxy: Option<Address>,
    busy: bool,
    buffer: VecDeque<ProxyConfigurationMessage>,
    refreshing: bool,
}

impl ProxyFilter {
    pub fn new(setup: ProxyFilterSetup) -> Self {
        Self {
            setup,
            ..Self::default()
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn addresses(&self) -> &BTreeSet<Address> {
        &self.addresses
    }

    /// Address of the proxy that last answered.
    pub fn proxy(&self) -> Option<Address> {
        self.proxy
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn queued(&self) -> usize {
        self.buffer.len()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    pub fn set_type(&mut self, filter_type: FilterType) -> Vec<ProxyFilterAction> {
        self.send(ProxyConfigurationMessage::SetFilterType(filter_type))
            .into_iter()
            .collect()
    }

    /// Switch to an empty accept list.
    pub fn reset(&mut self) -> Vec<ProxyFilterAction> {
        self.set_type(FilterType::AcceptList)
    }

    /// Empty the list, keeping the filter type.
    pub fn clear(&mut self) -> Vec<ProxyFilterAction> {
        self.set_type(self.filter_type)
    }

    pub fn add(&mut self, addresses: &BTreeSet<Address>) -> Vec<ProxyFilterAction> {
        chunk_addresses(addresses)
            .into_iter()
            .filter_map(|set| self.send(ProxyConfigurationMessage::AddAddresses(set)))
            .collect()
    }

    pub fn remove(&mut self, addresses: &BTreeSet<Address>) -> Vec<ProxyFilterAction> {
        chunk_addresses(addresses)
            .into_iter()
            .filter_map(|set| self.send(ProxyConfigurationMessage::RemoveAddresses(set)))
            .collect()
    }

    /// Accept traffic for `node`: its element addresses, every address its
    /// models subscribe to, and All Nodes.
    pub fn setup_for(&mut self, node: &Node) -> Vec<ProxyFilterAction> {
        let mut actions = Vec::new();
        if self.filter_type == FilterType::RejectList {
            actions.extend(self.set_type(FilterType::AcceptList));
        }
        let mut addresses: BTreeSet<Address> = (0..node.elements.len())
            .map(|i| node.element_address(i))
            .collect();
        addresses.insert(node.primary_address);
        addresses.extend(
            node.elements
                .iter()
                .flat_map(|e| e.models.iter())
                .flat_map(|m| m.subscriptions.iter())
                .map(|s| s.address),
        );
        addresses.insert(Address::ALL_NODES);
        actions.extend(self.add(&addresses));
        actions
    }

    fn send(&mut self, message: ProxyConfigurationMessage) -> Option<ProxyFilterAction> {
        if self.busy {
            self.buffer.push_back(message);
            return None;
        }
        self.busy = true;
        Some(ProxyFilterAction::Send(message))
    }

    // ------------------------------------------------------------------------
    // Bearer events
    // ------------------------------------------------------------------------

    fn forget(&mut self) {
        self.filter_type = FilterType::AcceptList;
        self.addresses.clear();
        self.buffer.clear();
        self.busy = false;
        self.refreshing = false;
    }

    /// A new proxy connected: start from a clean filter and apply the
    /// configured setup.
    pub fn proxy_connected(&mut self, local_node: Option<&Node>) -> Vec<ProxyFilterAction> {
        self.forget();
        self.proxy = None;
        info!("New proxy connected");
        match self.setup.clone() {
            ProxyFilterSetup::Automatic => local_node.map(|n| self.setup_for(n)).unwrap_or_default(),
            ProxyFilterSetup::AcceptList(addresses) => self.add(&addresses),
            ProxyFilterSetup::RejectList(addresses) => {
                let mut actions = self.set_type(FilterType::RejectList);
                actions.extend(self.add(&addresses));
                actions
            }
        }
    }

    pub fn proxy_disconnected(&mut self) {
        self.busy = false;
        self.proxy = None;
    }

    /// `message` was handed to the bearer.
    pub fn delivered(&mut self, message: &ProxyConfigurationMessage) -> Vec<ProxyFilterAction> {
        match message {
            ProxyConfigurationMessage::AddAddresses(set) => self.addresses.extend(set.iter().copied()),
            ProxyConfigurationMessage::RemoveAddresses(set) => {
                self.addresses.retain(|a| !set.contains(a));
            }
            ProxyConfigurationMessage::SetFilterType(filter_type) => {
                self.filter_type = *filter_type;
                self.addresses.clear();
            }
            ProxyConfigurationMessage::FilterStatus { .. } => return Vec::new(),
        }
        vec![self.updated()]
    }

    /// Sending failed; the local view is reset.
    pub fn failed(&mut self, bearer_closed: bool) -> Vec<ProxyFilterAction> {
        self.forget();
        if bearer_closed {
            self.proxy = None;
        }
        vec![self.updated()]
    }

    /// Handle a Filter Status from the proxy at `source`. `primary` is the
    /// local node's primary address, kept when the proxy filter is limited.
    pub fn handle_status(
        &mut self,
        filter_type: FilterType,
        list_size: u16,
        source: Address,
        primary: Option<Address>,
    ) -> Vec<ProxyFilterAction> {
        self.proxy = Some(source);
        if let Some(next) = self.buffer.pop_front() {
            return vec![ProxyFilterAction::Send(next)];
        }
        self.busy = false;

        let expected = self.addresses.len() as u16;
        if filter_type == self.filter_type && list_size == expected {
            self.refreshing = false;
            return vec![ProxyFilterAction::Acknowledged {
                filter_type,
                list_size,
            }];
        }
        if self.refreshing {
            warn!(expected, list_size, "Proxy filter lost track of addresses");
            self.refreshing = false;
            return Vec::new();
        }
        self.refreshing = true;

        let mut actions = Vec::new();
        if list_size == 1 && expected > 1 {
            warn!(expected, "Limited proxy filter detected");
            actions.extend(self.reset());
            if let Some(primary) = primary {
                actions.extend(self.add(&BTreeSet::from([primary])));
            }
            actions.push(ProxyFilterAction::Limited { max_size: 1 });
        } else {
            debug!(expected, list_size, "Refreshing proxy filter");
            let addresses = self.addresses.clone();
            actions.extend(self.reset());
            actions.extend(self.add(&addresses));
        }
        actions
    }

    fn updated(&self) -> ProxyFilterAction {
        ProxyFilterAction::Updated {
            filter_type: self.filter_type,
            addresses: self.addresses.clone(),
        }
    }
}
