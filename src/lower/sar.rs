//! Outgoing segmented messages.
//!
//! One transfer per destination is active at a time; later messages to the
//! same destination wait in FIFO order. Segments are spaced by the segment
//! interval. Unicast transfers retransmit unacknowledged segments until
//! every segment is acknowledged or the retransmission counters run out.
//! Multicast transfers repeat all segments a fixed number of times.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use crate::config::SarConfig;
use crate::model::{Address, KeyIndex};
use crate::network::TransportType;

use super::pdu::{Segment, SegmentAcknowledgment, SegmentHeader};
use super::LowerTransportError;

/// Identifies an outgoing transfer in completion events.
pub type TransferId = u64;

/// A message split into segments, ready for transmission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentedMessage {
    pub id: TransferId,
    pub source: Address,
    pub destination: Address,
    pub network_key: KeyIndex,
    pub ttl: u8,
    pub segments: Vec<Segment>,
}

impl SegmentedMessage {
    fn transport_type(&self) -> TransportType {
        match self.segments.first().map(|s| s.header) {
            Some(SegmentHeader::Control { .. }) => TransportType::Control,
            _ => TransportType::Access,
        }
    }

    fn seq_zero(&self) -> u16 {
        self.segments.first().map(|s| s.seq_zero).unwrap_or(0)
    }
}

/// A segment handed to the Network Layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentTransmission {
    pub id: TransferId,
    pub source: Address,
    pub destination: Address,
    pub network_key: KeyIndex,
    pub ttl: u8,
    pub transport_type: TransportType,
    pub transport_pdu: Vec<u8>,
}

/// Output of the transmitter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SarEvent {
    Transmit(SegmentTransmission),
    Completed(TransferId),
    Failed(TransferId, LowerTransportError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransferState {
    Sending { next_segment: usize, next_at_ms: u64 },
    Waiting { until_ms: u64 },
}

#[derive(Debug)]
struct Transfer {
    message: SegmentedMessage,
    acked: u32,
    remaining: u8,
    remaining_without_progress: u8,
    state: TransferState,
}

impl Transfer {
    fn new(message: SegmentedMessage, config: &SarConfig, now_ms: u64) -> Self {
        let unicast = message.destination.is_unicast();
        Self {
            remaining: if unicast {
                config.unicast_retrans_count
            } else {
                config.multicast_retrans_count
            },
            remaining_without_progress: config.unicast_retrans_without_progress_count,
            message,
            acked: 0,
            state: TransferState::Sending {
                next_segment: 0,
                next_at_ms: now_ms,
            },
        }
    }

    fn is_unicast(&self) -> bool {
        self.message.destination.is_unicast()
    }

    fn all_acked(&self) -> bool {
        let count = self.message.segments.len();
        let mask = if count >= 32 { u32::MAX } else { (1u32 << count) - 1 };
        self.acked & mask == mask
    }

    fn next_unacked(&self, from: usize) -> Option<usize> {
        (from..self.message.segments.len()).find(|i| self.acked & (1 << i) == 0)
    }

    fn transmission(&self, index: usize) -> SegmentTransmission {
        let message = &self.message;
        SegmentTransmission {
            id: message.id,
            source: message.source,
            destination: message.destination,
            network_key: message.network_key,
            ttl: message.ttl,
            transport_type: message.transport_type(),
            transport_pdu: message.segments[index].encode(),
        }
    }

    /// Advance the transfer to `now_ms`. Returns the final event once the
    /// transfer is done.
    fn step(&mut self, config: &SarConfig, now_ms: u64, events: &mut Vec<SarEvent>) -> Option<SarEvent> {
        loop {
            match self.state {
                TransferState::Sending { next_segment, next_at_ms } => {
                    if now_ms < next_at_ms {
                        return None;
                    }
                    match self.next_unacked(next_segment) {
                        Some(index) => {
                            events.push(SarEvent::Transmit(self.transmission(index)));
                            self.state = TransferState::Sending {
                                next_segment: index + 1,
                                next_at_ms: now_ms + config.segment_interval_ms,
                            };
                        }
                        None => {
                            let interval = if self.is_unicast() {
                                config.unicast_retransmission_interval_ms(self.message.ttl)
                            } else {
                                config.multicast_retrans_interval_ms
                            };
                            self.state = TransferState::Waiting {
                                until_ms: now_ms + interval,
                            };
                        }
                    }
                }
                TransferState::Waiting { until_ms } => {
                    if now_ms < until_ms {
                        return None;
                    }
                    if self.is_unicast() {
                        if self.remaining == 0 || self.remaining_without_progress == 0 {
                            debug!(dst = %self.message.destination, seq_zero = self.message.seq_zero(), "Segmented transfer timed out");
                            return Some(SarEvent::Failed(self.message.id, LowerTransportError::Timeout));
                        }
                        self.remaining_without_progress -= 1;
                    } else if self.remaining == 0 {
                        return Some(SarEvent::Completed(self.message.id));
                    }
                    self.remaining -= 1;
                    trace!(dst = %self.message.destination, remaining = self.remaining, "Retransmitting segments");
                    self.state = TransferState::Sending {
                        next_segment: 0,
                        next_at_ms: now_ms,
                    };
                }
            }
        }
    }

    fn deadline(&self) -> u64 {
        match self.state {
            TransferState::Sending { next_at_ms, .. } => next_at_ms,
            TransferState::Waiting { until_ms } => until_ms,
        }
    }
}

/// Outgoing SAR state.
#[derive(Debug)]
pub struct SarTransmitter {
    config: SarConfig,
    active: BTreeMap<Address, Transfer>,
    queued: BTreeMap<Address, VecDeque<SegmentedMessage>>,
}

impl SarTransmitter {
    pub fn new(config: &SarConfig) -> Self {
        Self {
            config: config.clone(),
            active: BTreeMap::new(),
            queued: BTreeMap::new(),
        }
    }

    /// Queue `message`. Its first segments go out on the next [`poll`](Self::poll).
    pub fn send(&mut self, message: SegmentedMessage, now_ms: u64) {
        let destination = message.destination;
        if self.active.contains_key(&destination) {
            trace!(dst = %destination, id = message.id, "Segmented transfer queued behind active one");
            self.queued.entry(destination).or_default().push_back(message);
            return;
        }
        self.active
            .insert(destination, Transfer::new(message, &self.config, now_ms));
    }

    pub fn is_busy(&self, destination: Address) -> bool {
        self.active.contains_key(&destination)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.values().map(VecDeque::len).sum()
    }

    /// Fire expired timers.
    pub fn poll(&mut self, now_ms: u64) -> Vec<SarEvent> {
        let mut events = Vec::new();
        let mut pending: Vec<Address> = self.active.keys().copied().collect();
        while let Some(destination) = pending.pop() {
            let Some(transfer) = self.active.get_mut(&destination) else {
                continue;
            };
            if let Some(done) = transfer.step(&self.config, now_ms, &mut events) {
                events.push(done);
                if self.finish(destination, now_ms) {
                    pending.push(destination);
                }
            }
        }
        events
    }

    /// Apply a Segment Acknowledgment received from `source`.
    pub fn acknowledge(
        &mut self,
        source: Address,
        ack: &SegmentAcknowledgment,
        now_ms: u64,
    ) -> Option<SarEvent> {
        let destination = self
            .active
            .iter()
            .find(|(dst, t)| {
                t.is_unicast()
                    && t.message.seq_zero() == ack.seq_zero
                    && (**dst == source || ack.on_behalf_of_low_power)
            })
            .map(|(dst, _)| *dst);
        let Some(destination) = destination else {
            trace!(src = %source, seq_zero = ack.seq_zero, "Acknowledgment for unknown transfer");
            return None;
        };
        let transfer = self.active.get_mut(&destination)?;
        let id = transfer.message.id;

        if ack.is_busy() {
            debug!(dst = %destination, seq_zero = ack.seq_zero, "Destination busy");
            self.finish(destination, now_ms);
            return Some(SarEvent::Failed(id, LowerTransportError::Busy));
        }

        let progress = ack.block_ack & !transfer.acked != 0;
        transfer.acked |= ack.block_ack;
        if transfer.all_acked() {
            debug!(dst = %destination, seq_zero = ack.seq_zero, "Segmented transfer acknowledged");
            self.finish(destination, now_ms);
            return Some(SarEvent::Completed(id));
        }

        if progress {
            transfer.remaining_without_progress = self.config.unicast_retrans_without_progress_count;
        }
        if matches!(transfer.state, TransferState::Waiting { .. })
            && transfer.remaining > 0
            && transfer.remaining_without_progress > 0
        {
            transfer.remaining -= 1;
            if !progress {
                transfer.remaining_without_progress -= 1;
            }
            transfer.state = TransferState::Sending {
                next_segment: 0,
                next_at_ms: now_ms,
            };
        }
        None
    }

    /// Abandon transfer `id`, active or queued. Returns false when unknown.
    pub fn cancel(&mut self, id: TransferId, now_ms: u64) -> bool {
        let active = self
            .active
            .iter()
            .find(|(_, t)| t.message.id == id)
            .map(|(dst, _)| *dst);
        if let Some(destination) = active {
            self.finish(destination, now_ms);
            return true;
        }
        for queue in self.queued.values_mut() {
            if let Some(pos) = queue.iter().position(|m| m.id == id) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drop every transfer, returning their ids.
    pub fn clear(&mut self) -> Vec<TransferId> {
        let mut ids: Vec<TransferId> = self.active.values().map(|t| t.message.id).collect();
        ids.extend(self.queued.values().flatten().map(|m| m.id));
        self.active.clear();
        self.queued.clear();
        ids
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.active.values().map(Transfer::deadline).min()
    }

    /// Remove the active transfer to `destination` and start the next
    /// queued one. Returns true when a transfer was started.
    fn finish(&mut self, destination: Address, now_ms: u64) -> bool {
        self.active.remove(&destination);
        let next = self.queued.get_mut(&destination).and_then(VecDeque::pop_front);
        if self.queued.get(&destination).is_some_and(VecDeque::is_empty) {
            self.queued.remove(&destination);
        }
        match next {
            Some(message) => {
                self.active
                    .insert(destination, Transfer::new(message, &self.config, now_ms));
                true
            }
            None => false,
        }
    }
}
