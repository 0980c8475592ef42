//! Reassembly of incoming segmented messages.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::config::SarConfig;
use crate::crypto::MicSize;
use crate::model::{Address, KeyIndex};
use crate::network::NetworkPdu;

use super::pdu::{
    message_sequence, AccessMessage, ControlMessage, LowerTransportPdu, Segment, SegmentAcknowledgment,
    SegmentHeader,
};

/// A Segment Acknowledgment to be sent by a local element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutgoingAck {
    /// Local element the segments were addressed to.
    pub source: Address,
    /// Originator of the segmented message.
    pub destination: Address,
    pub network_key: KeyIndex,
    pub ttl: u8,
    pub ack: SegmentAcknowledgment,
}

/// What happened to a received segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// The message is complete.
    Complete {
        pdu: LowerTransportPdu,
        ack: Option<OutgoingAck>,
    },
    /// Stored; more segments are expected.
    Incomplete,
    /// Segment of a message that was already reassembled.
    Duplicate { ack: Option<OutgoingAck> },
    /// Inconsistent with the session it belongs to.
    Rejected,
}

/// Addressing details of a session, shared by all its segments.
#[derive(Clone, Copy, Debug)]
pub struct SegmentContext {
    /// Send Segment Acknowledgments; true when the destination is a local
    /// unicast address.
    pub acknowledge: bool,
    /// TTL of acknowledgments.
    pub ack_ttl: u8,
}

#[derive(Debug)]
struct Session {
    header: SegmentHeader,
    destination: Address,
    network_key: KeyIndex,
    iv_index: u32,
    sequence: u32,
    ttl: u8,
    segments: Vec<Option<Vec<u8>>>,
    received: u32,
    context: SegmentContext,
    last_activity_ms: u64,
    discard_at_ms: u64,
    ack_at_ms: Option<u64>,
}

impl Session {
    fn is_complete(&self) -> bool {
        self.segments.iter().all(Option::is_some)
    }

    fn ack(&self, source: Address, seq_zero: u16) -> OutgoingAck {
        OutgoingAck {
            source: self.destination,
            destination: source,
            network_key: self.network_key,
            ttl: self.context.ack_ttl,
            ack: SegmentAcknowledgment::new(seq_zero, self.received),
        }
    }

    fn assemble(self, source: Address) -> LowerTransportPdu {
        let payload: Vec<u8> = self.segments.into_iter().flatten().flatten().collect();
        match self.header {
            SegmentHeader::Access { aid, szmic } => LowerTransportPdu::Access(AccessMessage {
                source,
                destination: self.destination,
                network_key: self.network_key,
                iv_index: self.iv_index,
                sequence: self.sequence,
                ttl: self.ttl,
                aid,
                transport_mic: if szmic { MicSize::Long } else { MicSize::Short },
                upper_transport_pdu: payload,
                segmented: true,
            }),
            SegmentHeader::Control { opcode } => LowerTransportPdu::Control(ControlMessage {
                source,
                destination: self.destination,
                network_key: self.network_key,
                iv_index: self.iv_index,
                sequence: self.sequence,
                ttl: self.ttl,
                opcode,
                parameters: payload,
            }),
        }
    }
}

/// Last message reassembled from a source.
#[derive(Debug)]
struct Completed {
    seq_zero: u16,
    ack: Option<OutgoingAck>,
    completed_at_ms: u64,
    muted_until_ms: Option<u64>,
}

/// Incoming SAR state.
#[derive(Debug)]
pub struct Reassembler {
    config: SarConfig,
    sessions: HashMap<(Address, u16), Session>,
    completed: HashMap<Address, Completed>,
}

impl Reassembler {
    pub fn new(config: &SarConfig) -> Self {
        Self {
            config: config.clone(),
            sessions: HashMap::new(),
            completed: HashMap::new(),
        }
    }

    /// True while a message from `source` with `seq_zero` is being
    /// reassembled or was the last one completed.
    pub fn is_in_progress(&self, source: Address, seq_zero: u16) -> bool {
        self.sessions.contains_key(&(source, seq_zero))
            || self
                .completed
                .get(&source)
                .is_some_and(|c| c.seq_zero == seq_zero)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Store `segment`, carried by `pdu`.
    pub fn receive(
        &mut self,
        pdu: &NetworkPdu,
        segment: Segment,
        context: SegmentContext,
        now_ms: u64,
    ) -> SegmentOutcome {
        let source = pdu.source;
        let key = (source, segment.seq_zero);

        if !self.sessions.contains_key(&key) {
            if let Some(completed) = self.completed.get_mut(&source)
                && completed.seq_zero == segment.seq_zero
            {
                let Some(ack) = completed.ack else {
                    return SegmentOutcome::Duplicate { ack: None };
                };
                if completed.muted_until_ms.is_some_and(|until| now_ms < until) {
                    return SegmentOutcome::Duplicate { ack: None };
                }
                completed.muted_until_ms = Some(now_ms + self.config.complete_acknowledgment_interval_ms);
                trace!(src = %source, seq_zero = segment.seq_zero, "Re-acknowledging completed message");
                return SegmentOutcome::Duplicate { ack: Some(ack) };
            }
            self.completed.remove(&source);
            self.open_session(pdu, &segment, context, now_ms);
        }

        let count = segment.count();
        let Some(session) = self.sessions.get_mut(&key) else {
            return SegmentOutcome::Rejected;
        };
        if session.segments.len() != count || session.header != segment.header {
            debug!(src = %source, seq_zero = segment.seq_zero, "Segment does not match session");
            return SegmentOutcome::Rejected;
        }

        let offset = usize::from(segment.segment_offset);
        if session.segments[offset].is_none() {
            session.segments[offset] = Some(segment.data);
            session.received |= 1 << offset;
        }
        session.last_activity_ms = now_ms;

        if !session.is_complete() {
            session.discard_at_ms = now_ms + self.config.discard_timeout_ms;
            if session.context.acknowledge {
                session.ack_at_ms = Some(now_ms + self.config.acknowledgment_delay_ms(segment.last_segment));
            }
            return SegmentOutcome::Incomplete;
        }

        let Some(session) = self.sessions.remove(&key) else {
            return SegmentOutcome::Rejected;
        };
        let ack = session
            .context
            .acknowledge
            .then(|| session.ack(source, segment.seq_zero));
        self.completed.insert(
            source,
            Completed {
                seq_zero: segment.seq_zero,
                ack,
                completed_at_ms: now_ms,
                muted_until_ms: None,
            },
        );
        debug!(src = %source, seq_zero = segment.seq_zero, segments = count, "Message reassembled");
        SegmentOutcome::Complete {
            pdu: session.assemble(source),
            ack,
        }
    }

    fn open_session(&mut self, pdu: &NetworkPdu, segment: &Segment, context: SegmentContext, now_ms: u64) {
        if self.sessions.len() >= self.config.max_reassembly_sessions {
            let oldest = self
                .sessions
                .iter()
                .min_by_key(|(_, s)| s.last_activity_ms)
                .map(|(k, _)| *k);
            if let Some((src, seq_zero)) = oldest {
                warn!(src = %src, seq_zero, "Reassembly sessions exhausted, dropping oldest");
                self.sessions.remove(&(src, seq_zero));
            }
        }
        self.sessions.insert(
            (pdu.source, segment.seq_zero),
            Session {
                header: segment.header,
                destination: pdu.destination,
                network_key: pdu.network_key,
                iv_index: pdu.iv_index,
                sequence: message_sequence(pdu.sequence, Some(segment.seq_zero)),
                ttl: pdu.ttl,
                segments: vec![None; segment.count()],
                received: 0,
                context,
                last_activity_ms: now_ms,
                discard_at_ms: now_ms + self.config.discard_timeout_ms,
                ack_at_ms: None,
            },
        );
    }

    /// Fire expired timers, returning the acknowledgments to send.
    pub fn poll(&mut self, now_ms: u64) -> Vec<OutgoingAck> {
        let mut acks = Vec::new();
        self.sessions.retain(|(source, seq_zero), session| {
            if now_ms >= session.discard_at_ms {
                debug!(src = %source, seq_zero = *seq_zero, received = session.received, "Incomplete message discarded");
                return false;
            }
            if session.ack_at_ms.is_some_and(|at| now_ms >= at) {
                session.ack_at_ms = None;
                acks.push(session.ack(*source, *seq_zero));
            }
            true
        });
        let keep_for = self.config.discard_timeout_ms;
        self.completed
            .retain(|_, c| now_ms < c.completed_at_ms + keep_for);
        acks
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<u64> {
        let sessions = self
            .sessions
            .values()
            .flat_map(|s| std::iter::once(s.discard_at_ms).chain(s.ack_at_ms));
        let completed = self
            .completed
            .values()
            .map(|c| c.completed_at_ms + self.config.discard_timeout_ms);
        sessions.chain(completed).min()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.completed.clear();
    }
}
