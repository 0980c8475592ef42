//! Receive pipeline: bearer → network → lower → upper → access.

use tracing::{debug, info, trace, warn};

use super::{MeshEvent, MeshManager};
use crate::access::{AccessError, AccessIncoming};
use crate::bearer::PduType;
use crate::lower::{LowerAction, LowerTransportError, TransferId};
use crate::network::{Incoming, MeshBeacon, NetworkBeacon, NetworkPdu};
use crate::proxy::ProxyConfigurationMessage;
use crate::upper::UpperIncoming;

impl MeshManager {
    /// Process a PDU received from the bearer or looped back.
    pub(super) fn handle_pdu(&mut self, pdu_type: PduType, data: &[u8], now_ms: u64) {
        let Some(incoming) = self
            .network_layer
            .receive(data, pdu_type, &self.network, now_ms)
        else {
            return;
        };
        match incoming {
            Incoming::Network(pdu) => {
                let default_ttl = self.default_ttl();
                let actions = self.lower.receive(&pdu, &self.network, default_ttl, now_ms);
                self.process_lower_actions(actions, now_ms);
            }
            Incoming::Beacon(beacon) => self.handle_beacon(beacon, now_ms),
            Incoming::ProxyConfiguration(pdu) => self.handle_proxy_configuration(pdu, now_ms),
        }
    }

    pub(super) fn process_lower_actions(&mut self, actions: Vec<LowerAction>, now_ms: u64) {
        for action in actions {
            match action {
                LowerAction::Deliver(pdu) => match self.upper.receive(pdu, &self.network, now_ms) {
                    Some(UpperIncoming::Access { pdu, key_set }) => {
                        if let Some(incoming) = self.access.handle(&pdu, &key_set, &self.network, now_ms) {
                            self.handle_access(incoming, now_ms);
                        }
                    }
                    Some(UpperIncoming::Heartbeat(heartbeat)) => {
                        self.emit(MeshEvent::HeartbeatReceived(heartbeat));
                    }
                    None => {}
                },
                LowerAction::SendAck(ack) => self.send_segment_ack(ack, now_ms),
                LowerAction::Transmit(segment) => self.transmit_segment(segment, now_ms),
                LowerAction::Completed(transfer) => {
                    if let Some(id) = self.transfers.remove(&transfer) {
                        self.delivered(id);
                    }
                }
                LowerAction::Failed(transfer, error) => self.transfer_failed(transfer, error),
                LowerAction::PersistReplay(source, record) => {
                    if let Err(e) = self.storage.set_replay_record(source, record) {
                        warn!(src = %source, error = %e, "Failed to persist replay record");
                    }
                }
            }
        }
    }

    /// A segmented transfer failed. Acknowledged messages stay with the
    /// access retransmission timer.
    fn transfer_failed(&mut self, transfer: TransferId, error: LowerTransportError) {
        let Some(id) = self.transfers.remove(&transfer) else {
            return;
        };
        debug!(id, transfer, error = %error, "Segmented transfer failed");
        if self.access.is_pending(id) && error != LowerTransportError::Cancelled {
            return;
        }
        let error = match error {
            LowerTransportError::Timeout => AccessError::Timeout,
            LowerTransportError::Busy => AccessError::Busy,
            LowerTransportError::Cancelled => AccessError::Cancelled,
        };
        self.fail(id, error);
    }

    fn handle_access(&mut self, incoming: AccessIncoming, now_ms: u64) {
        match incoming {
            AccessIncoming::Config(request) => self.handle_config_request(request, now_ms),
            AccessIncoming::Message(received) => {
                if let Some(id) = received.response_to {
                    trace!(id, src = %received.source, "Response received");
                    self.resolve(id, received.message.clone(), now_ms);
                }
                self.emit(MeshEvent::MessageReceived {
                    message: received.message,
                    source: received.source,
                    destination: received.destination,
                    response_to: received.response_to,
                });
            }
        }
    }

    fn handle_beacon(&mut self, beacon: MeshBeacon, now_ms: u64) {
        match beacon {
            MeshBeacon::UnprovisionedDevice(beacon) => {
                trace!(uuid = %hex::encode(beacon.device_uuid), "Unprovisioned device beacon");
                self.emit(MeshEvent::UnprovisionedDevice(beacon));
            }
            MeshBeacon::Network(beacon) => self.handle_network_beacon(&beacon, now_ms),
        }
    }

    fn handle_network_beacon(&mut self, beacon: &NetworkBeacon, now_ms: u64) {
        let outcome = self.network_layer.handle_network_beacon(
            beacon,
            &mut self.network,
            &mut self.iv_state,
            &self.config.network,
            now_ms,
        );

        if let Some((from, to)) = outcome.iv_index_changed {
            if let Err(e) = self.storage.set_iv_index_state(self.iv_state) {
                warn!(error = %e, "Failed to persist IV Index");
            }
            if outcome.reset_sequences {
                for source in self.sequences.reset_all() {
                    if let Err(e) = self.storage.set_sequence_number(source, 0) {
                        warn!(src = %source, error = %e, "Failed to persist sequence reset");
                    }
                }
                info!(from = %from, to = %to, "Sequence numbers reset");
            }
            self.emit(MeshEvent::IvIndexUpdated(to));
        }
        if let Some((network_key, phase)) = outcome.key_refresh {
            debug!(net_key = network_key, phase = %phase, "Key Refresh phase changed");
            self.emit(MeshEvent::NetworkChanged);
        }
        if outcome.proxy_connected {
            info!(net_key = beacon.network_key, "Proxy connected");
            let actions = self.proxy_filter.proxy_connected(self.network.local_node());
            self.apply_proxy_filter_actions(actions, now_ms);
        }
    }

    fn handle_proxy_configuration(&mut self, pdu: NetworkPdu, now_ms: u64) {
        let Some(message) = ProxyConfigurationMessage::decode(&pdu.transport_pdu) else {
            debug!(src = %pdu.source, "Malformed proxy configuration message");
            return;
        };
        if self.network_layer.proxy_network_key().is_none() {
            self.network_layer.set_proxy_network_key(pdu.network_key);
        }
        match message {
            ProxyConfigurationMessage::FilterStatus {
                filter_type,
                list_size,
            } => {
                trace!(src = %pdu.source, filter_type = ?filter_type, list_size, "Proxy filter status");
                let primary = self.network.local_node().map(|n| n.primary_address);
                let actions = self
                    .proxy_filter
                    .handle_status(filter_type, list_size, pdu.source, primary);
                self.apply_proxy_filter_actions(actions, now_ms);
            }
            other => debug!(opcode = other.opcode(), "Unexpected proxy configuration message"),
        }
    }
}
