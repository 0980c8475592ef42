//! Send pipeline: access → upper → lower → network → bearer.

use tracing::{debug, trace, warn};

use super::{ManagerError, MeshEvent, MeshManager, ProxyFilterCommand};
use crate::access::{AccessError, MessageId, OutgoingAccess};
use crate::bearer::{BearerError, PduType};
use crate::crypto::MicSize;
use crate::lower::pdu::{segment, unsegmented_access, unsegmented_control};
use crate::lower::{OutgoingAck, SegmentHeader, SegmentTransmission, SegmentedMessage};
use crate::model::{Address, KeyIndex};
use crate::network::{NetworkError, NetworkLayer, NonceType, OutgoingFrame, TransportType};
use crate::proxy::{ProxyConfigurationMessage, ProxyFilterAction};
use crate::upper::{HeartbeatDue, HeartbeatMessage, HEARTBEAT_OPCODE};

impl MeshManager {
    /// Encrypt and send an access message.
    ///
    /// Bearer failures of acknowledged messages are left to the access
    /// retransmission timer. Anything else fails the message.
    pub(super) fn dispatch_access(&mut self, outgoing: OutgoingAccess, now_ms: u64) {
        let id = outgoing.id;
        if let Err(e) = self.try_dispatch_access(outgoing, now_ms) {
            let acknowledged = self.access.is_pending(id);
            warn!(id, error = %e, acknowledged, "Failed to send access message");
            if acknowledged && matches!(e, ManagerError::Bearer(_)) {
                return;
            }
            self.access.cancel(id);
            self.fail(id, AccessError::SendFailed);
        }
    }

    fn try_dispatch_access(&mut self, outgoing: OutgoingAccess, now_ms: u64) -> Result<(), ManagerError> {
        let id = outgoing.id;
        let ttl = outgoing.ttl.unwrap_or_else(|| self.default_ttl());
        let network_key = outgoing.key_set.network_key();
        let sequence = self.next_sequence(outgoing.source)?;
        let upper = outgoing.encrypt(sequence, self.network.iv_index().transmit_index())?;
        let destination = outgoing.destination.address;

        if outgoing.segmented {
            let header = SegmentHeader::Access {
                aid: upper.aid,
                szmic: outgoing.transport_mic() == MicSize::Long,
            };
            let segments = segment(header, (sequence & 0x1FFF) as u16, &upper.transport_pdu)
                .ok_or(ManagerError::MessageTooLong(outgoing.access_pdu.len()))?;
            let transfer = self.next_transfer_id;
            self.next_transfer_id += 1;
            self.transfers.insert(transfer, id);
            debug!(
                id,
                transfer,
                dst = %destination,
                segments = segments.len(),
                "Sending segmented access message"
            );
            self.lower.send_segmented(
                SegmentedMessage {
                    id: transfer,
                    source: outgoing.source,
                    destination,
                    network_key,
                    ttl,
                    segments,
                },
                now_ms,
            );
            let actions = self.lower.poll(now_ms);
            self.process_lower_actions(actions, now_ms);
            return Ok(());
        }

        let frame = OutgoingFrame {
            transport_type: TransportType::Access,
            ttl,
            sequence,
            source: outgoing.source,
            destination,
            transport_pdu: unsegmented_access(upper.aid, &upper.transport_pdu),
        };
        trace!(id, dst = %destination, seq = sequence, "Sending access message");
        if self.send_frame(&frame, network_key, Some(id), now_ms)? {
            self.delivered(id);
        }
        Ok(())
    }

    /// Encode a frame with the Network nonce, loop it back when a local
    /// Element may be interested, and hand it to the bearer.
    ///
    /// Returns true once the frame left the node or was looped back;
    /// false when the bearer queued it for a retry.
    pub(super) fn send_frame(
        &mut self,
        frame: &OutgoingFrame,
        network_key: KeyIndex,
        message: Option<MessageId>,
        now_ms: u64,
    ) -> Result<bool, ManagerError> {
        let pdu = self
            .network_layer
            .encode(frame, network_key, &self.network, NonceType::Network)?;

        let looped_back = NetworkLayer::should_loop_back(&self.network, frame.destination);
        if looped_back {
            trace!(dst = %frame.destination, seq = frame.sequence, "Looping back PDU");
            self.handle_pdu(PduType::NetworkPdu, &pdu.pdu, now_ms);
        }
        if !NetworkLayer::should_transmit(&self.network, frame.destination, frame.ttl) {
            return Ok(looped_back);
        }

        match self.transmit(pdu.pdu, PduType::NetworkPdu, message, now_ms) {
            Ok(sent) => Ok(sent || looped_back),
            Err(e) if looped_back => {
                trace!(error = %e, "PDU only delivered locally");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Send an unsegmented control message.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn send_control(
        &mut self,
        opcode: u8,
        parameters: &[u8],
        source: Address,
        destination: Address,
        ttl: u8,
        network_key: KeyIndex,
        now_ms: u64,
    ) -> Result<bool, ManagerError> {
        let sequence = self.next_sequence(source)?;
        let frame = OutgoingFrame {
            transport_type: TransportType::Control,
            ttl,
            sequence,
            source,
            destination,
            transport_pdu: unsegmented_control(opcode, parameters),
        };
        self.send_frame(&frame, network_key, None, now_ms)
    }

    pub(super) fn send_segment_ack(&mut self, ack: OutgoingAck, now_ms: u64) {
        let result = self.next_sequence(ack.source).and_then(|sequence| {
            let frame = OutgoingFrame {
                transport_type: TransportType::Control,
                ttl: ack.ttl,
                sequence,
                source: ack.source,
                destination: ack.destination,
                transport_pdu: ack.ack.encode(),
            };
            self.send_frame(&frame, ack.network_key, None, now_ms)
        });
        if let Err(e) = result {
            debug!(dst = %ack.destination, error = %e, "Segment acknowledgment not sent");
        }
    }

    /// Send one segment of an outgoing transfer.
    pub(super) fn transmit_segment(&mut self, segment: SegmentTransmission, now_ms: u64) {
        let result = self.next_sequence(segment.source).and_then(|sequence| {
            let frame = OutgoingFrame {
                transport_type: segment.transport_type,
                ttl: segment.ttl,
                sequence,
                source: segment.source,
                destination: segment.destination,
                transport_pdu: segment.transport_pdu,
            };
            self.send_frame(&frame, segment.network_key, None, now_ms)
        });
        if let Err(e) = result {
            debug!(transfer = segment.id, error = %e, "Segment not sent");
        }
    }

    /// Send a Heartbeat from the primary Element.
    pub(super) fn send_heartbeat(&mut self, due: HeartbeatDue, now_ms: u64) {
        let Some(node) = self.network.local_node() else {
            return;
        };
        let source = node.primary_address;
        let parameters = HeartbeatMessage::parameters(due.ttl, node.features);
        trace!(dst = %due.destination, ttl = due.ttl, "Sending heartbeat");
        if let Err(e) = self.send_control(
            HEARTBEAT_OPCODE,
            &parameters,
            source,
            due.destination,
            due.ttl,
            due.network_key,
            now_ms,
        ) {
            warn!(dst = %due.destination, error = %e, "Heartbeat not sent");
        }
    }

    /// Allocate the next sequence number of `source` and persist the one
    /// after it.
    pub(super) fn next_sequence(&mut self, source: Address) -> Result<u32, ManagerError> {
        let sequence = self
            .sequences
            .allocate(source)
            .ok_or(NetworkError::SequenceExhausted(source))?;
        self.storage.set_sequence_number(source, sequence + 1)?;
        Ok(sequence)
    }

    // === Proxy configuration ===

    /// Send a Proxy Configuration message to the connected proxy.
    pub(super) fn send_proxy_configuration(&mut self, message: ProxyConfigurationMessage, now_ms: u64) {
        let actions = match self.try_send_proxy_configuration(&message) {
            Ok(()) => {
                trace!(opcode = message.opcode(), "Proxy configuration sent");
                self.proxy_filter.delivered(&message)
            }
            Err(e) => {
                let closed = matches!(e, ManagerError::Bearer(BearerError::Closed));
                warn!(opcode = message.opcode(), error = %e, "Proxy configuration not sent");
                self.proxy_filter.failed(closed)
            }
        };
        self.apply_proxy_filter_actions(actions, now_ms);
    }

    fn try_send_proxy_configuration(&mut self, message: &ProxyConfigurationMessage) -> Result<(), ManagerError> {
        let source = self
            .network
            .local_node()
            .map(|n| n.primary_address)
            .ok_or(ManagerError::NoLocalNode)?;
        let network_key = self.network_layer.proxy_configuration_key(&self.network)?;
        let sequence = self.next_sequence(source)?;
        let frame = OutgoingFrame {
            transport_type: TransportType::Control,
            ttl: 0,
            sequence,
            source,
            destination: Address::UNASSIGNED,
            transport_pdu: message.encode(),
        };
        let pdu = self
            .network_layer
            .encode(&frame, network_key, &self.network, NonceType::Proxy)?;
        let bearer = self.bearer.as_ref().ok_or(BearerError::Closed)?;
        bearer.send(&pdu.pdu, PduType::ProxyConfiguration)?;
        Ok(())
    }

    /// Apply a filter change requested through a handle. Requests made
    /// while the proxy has not answered the previous one are queued.
    pub(super) fn configure_proxy_filter(&mut self, command: ProxyFilterCommand, now_ms: u64) {
        debug!(?command, "Proxy filter command");
        let actions = match command {
            ProxyFilterCommand::SetType(filter_type) => self.proxy_filter.set_type(filter_type),
            ProxyFilterCommand::Add(addresses) => self.proxy_filter.add(&addresses),
            ProxyFilterCommand::Remove(addresses) => self.proxy_filter.remove(&addresses),
            ProxyFilterCommand::Reset => self.proxy_filter.reset(),
            ProxyFilterCommand::Clear => self.proxy_filter.clear(),
        };
        self.apply_proxy_filter_actions(actions, now_ms);
    }

    pub(super) fn apply_proxy_filter_actions(&mut self, actions: Vec<ProxyFilterAction>, now_ms: u64) {
        for action in actions {
            match action {
                ProxyFilterAction::Send(message) => self.send_proxy_configuration(message, now_ms),
                ProxyFilterAction::Updated {
                    filter_type,
                    addresses,
                } => self.emit(MeshEvent::ProxyFilterUpdated {
                    filter_type,
                    addresses,
                }),
                ProxyFilterAction::Acknowledged {
                    filter_type,
                    list_size,
                } => self.emit(MeshEvent::ProxyFilterAcknowledged {
                    filter_type,
                    list_size,
                }),
                ProxyFilterAction::Limited { max_size } => {
                    self.emit(MeshEvent::LimitedProxyFilter { max_size })
                }
            }
        }
    }
}
