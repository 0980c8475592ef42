//! Events reported to the application.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::access::{AccessError, MeshMessage, MessageId};
use crate::model::{Address, IvIndex, MeshAddress};
use crate::network::UnprovisionedDeviceBeacon;
use crate::proxy::FilterType;
use crate::upper::HeartbeatMessage;

/// Something the application may want to react to.
#[derive(Clone, Debug)]
pub enum MeshEvent {
    /// A message addressed to a local Element was received.
    MessageReceived {
        message: Arc<dyn MeshMessage>,
        source: Address,
        destination: MeshAddress,
        /// The local request this message responds to.
        response_to: Option<MessageId>,
    },
    /// A message was handed to the bearer (or looped back).
    MessageDelivered {
        id: MessageId,
        opcode: u32,
        destination: Address,
    },
    DeliveryFailed {
        id: MessageId,
        opcode: u32,
        destination: Address,
        error: AccessError,
    },
    /// The network state (keys, heartbeat configuration) changed and
    /// should be saved.
    NetworkChanged,
    IvIndexUpdated(IvIndex),
    UnprovisionedDevice(UnprovisionedDeviceBeacon),
    ProxyFilterUpdated {
        filter_type: FilterType,
        addresses: BTreeSet<Address>,
    },
    /// The proxy confirmed the filter.
    ProxyFilterAcknowledged {
        filter_type: FilterType,
        list_size: u16,
    },
    /// The proxy holds fewer addresses than requested.
    LimitedProxyFilter { max_size: u16 },
    HeartbeatReceived(HeartbeatMessage),
}
