//! Lower Transport Layer
//!
//! Replay protection, segmentation and reassembly. Timers are deadlines
//! checked by [`LowerTransportLayer::poll`]; every operation returns the
//! [`LowerAction`]s the caller has to carry out.

pub mod pdu;
mod reassembly;
mod replay;
mod sar;

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::SarConfig;
use crate::model::{Address, MeshNetwork};
use crate::network::NetworkPdu;
use crate::storage::ReplayRecord;

pub use pdu::{
    message_sequence, AccessMessage, ControlMessage, LowerPdu, LowerTransportPdu, Segment,
    SegmentAcknowledgment, SegmentHeader, MAX_UNSEGMENTED_ACCESS_PDU,
    MAX_UNSEGMENTED_CONTROL_PARAMETERS,
};
pub use reassembly::{OutgoingAck, Reassembler, SegmentContext, SegmentOutcome};
pub use replay::{ReplayCache, ReplayVerdict};
pub use sar::{SarEvent, SarTransmitter, SegmentTransmission, SegmentedMessage, TransferId};

/// Reasons a segmented transfer ends without being delivered.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LowerTransportError {
    #[error("segmented message was not acknowledged in time")]
    Timeout,

    #[error("destination is busy")]
    Busy,

    #[error("segmented transfer cancelled")]
    Cancelled,
}

/// Work produced by the Lower Transport Layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LowerAction {
    /// Hand a complete message to the Upper Transport Layer.
    Deliver(LowerTransportPdu),
    /// Send a Segment Acknowledgment.
    SendAck(OutgoingAck),
    /// Send one segment of an outgoing transfer.
    Transmit(SegmentTransmission),
    Completed(TransferId),
    Failed(TransferId, LowerTransportError),
    /// Persist the replay protection record of a source.
    PersistReplay(Address, ReplayRecord),
}

impl From<SarEvent> for LowerAction {
    fn from(event: SarEvent) -> Self {
        match event {
            SarEvent::Transmit(t) => LowerAction::Transmit(t),
            SarEvent::Completed(id) => LowerAction::Completed(id),
            SarEvent::Failed(id, e) => LowerAction::Failed(id, e),
        }
    }
}

/// Lower Transport Layer state.
#[derive(Debug)]
pub struct LowerTransportLayer {
    replay: ReplayCache,
    reassembler: Reassembler,
    transmitter: SarTransmitter,
}

impl LowerTransportLayer {
    pub fn new(config: &SarConfig) -> Self {
        Self {
            replay: ReplayCache::new(),
            reassembler: Reassembler::new(config),
            transmitter: SarTransmitter::new(config),
        }
    }

    /// Seed the replay protection list from storage.
    pub fn restore_replay(&mut self, records: impl IntoIterator<Item = (Address, ReplayRecord)>) {
        self.replay.restore(records);
    }

    pub fn replay(&self) -> &ReplayCache {
        &self.replay
    }

    /// Process a Network PDU addressed to this node.
    pub fn receive(
        &mut self,
        pdu: &NetworkPdu,
        network: &MeshNetwork,
        default_ttl: u8,
        now_ms: u64,
    ) -> Vec<LowerAction> {
        let mut actions = Vec::new();
        let local_unicast = network.is_local_unicast(pdu.destination);
        if pdu.destination.is_unicast() && !local_unicast {
            trace!(dst = %pdu.destination, "PDU for another node ignored");
            return actions;
        }
        let Some(lower) = LowerPdu::decode(pdu) else {
            debug!(src = %pdu.source, seq = pdu.sequence, "Malformed lower transport PDU");
            return actions;
        };

        let (seq_auth, in_progress) = match &lower {
            LowerPdu::Segment(segment) => (
                (u64::from(pdu.iv_index) << 24)
                    | u64::from(message_sequence(pdu.sequence, Some(segment.seq_zero))),
                self.reassembler.is_in_progress(pdu.source, segment.seq_zero),
            ),
            _ => (pdu.seq_auth(), false),
        };
        match self.replay.check(pdu.source, seq_auth, in_progress) {
            ReplayVerdict::Reject => return actions,
            ReplayVerdict::Accept(Some(record)) => {
                actions.push(LowerAction::PersistReplay(pdu.source, record));
            }
            ReplayVerdict::Accept(None) => {}
        }

        match lower {
            LowerPdu::Unsegmented(message) => actions.push(LowerAction::Deliver(message)),
            LowerPdu::Acknowledgment(ack) => {
                if !local_unicast {
                    return actions;
                }
                if let Some(event) = self.transmitter.acknowledge(pdu.source, &ack, now_ms) {
                    actions.push(event.into());
                }
            }
            LowerPdu::Segment(segment) => {
                let context = SegmentContext {
                    acknowledge: local_unicast,
                    ack_ttl: if pdu.ttl == 0 { 0 } else { default_ttl },
                };
                match self.reassembler.receive(pdu, segment, context, now_ms) {
                    SegmentOutcome::Complete { pdu, ack } => {
                        actions.extend(ack.map(LowerAction::SendAck));
                        actions.push(LowerAction::Deliver(pdu));
                    }
                    SegmentOutcome::Duplicate { ack } => {
                        actions.extend(ack.map(LowerAction::SendAck));
                    }
                    SegmentOutcome::Incomplete | SegmentOutcome::Rejected => {}
                }
            }
        }
        actions
    }

    /// Start or queue an outgoing segmented transfer.
    pub fn send_segmented(&mut self, message: SegmentedMessage, now_ms: u64) {
        self.transmitter.send(message, now_ms);
    }

    pub fn is_busy(&self, destination: Address) -> bool {
        self.transmitter.is_busy(destination)
    }

    /// Fire expired reassembly and transmission timers.
    pub fn poll(&mut self, now_ms: u64) -> Vec<LowerAction> {
        let mut actions: Vec<LowerAction> = self
            .reassembler
            .poll(now_ms)
            .into_iter()
            .map(LowerAction::SendAck)
            .collect();
        actions.extend(self.transmitter.poll(now_ms).into_iter().map(LowerAction::from));
        actions
    }

    /// Cancel transfer `id`. Returns the failure to report, if it existed.
    pub fn cancel(&mut self, id: TransferId, now_ms: u64) -> Option<LowerAction> {
        self.transmitter
            .cancel(id, now_ms)
            .then_some(LowerAction::Failed(id, LowerTransportError::Cancelled))
    }

    /// Abandon all transfers and reassembly sessions.
    pub fn clear(&mut self) -> Vec<LowerAction> {
        self.reassembler.clear();
        self.transmitter
            .clear()
            .into_iter()
            .map(|id| LowerAction::Failed(id, LowerTransportError::Cancelled))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        [self.reassembler.next_deadline(), self.transmitter.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }
}
