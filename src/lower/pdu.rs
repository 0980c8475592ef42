//! Lower Transport PDU formats.
//!
//! ```text
//! unsegmented access:  [SEG=0|AKF|AID:6][UpperTransportPDU:5..15]
//! segmented access:    [SEG=1|AKF|AID:6][SZMIC|SeqZero:13|SegO:5|SegN:5][segment:1..12]
//! unsegmented control: [SEG=0|Opcode:7][parameters:0..11]
//! segmented control:   [SEG=1|Opcode:7][RFU|SeqZero:13|SegO:5|SegN:5][segment:1..8]
//! segment ack:         [0|0x00][OBO|SeqZero:13|RFU:2][BlockAck:32]
//! ```

use std::fmt;

use crate::crypto::MicSize;
use crate::model::{Address, KeyIndex};
use crate::network::{NetworkPdu, TransportType};

/// Largest Upper Transport PDU of an unsegmented access message.
pub const MAX_UNSEGMENTED_ACCESS_PDU: usize = 15;
/// Largest parameters of an unsegmented control message.
pub const MAX_UNSEGMENTED_CONTROL_PARAMETERS: usize = 11;
/// Segment payload size of access messages.
pub const ACCESS_SEGMENT_SIZE: usize = 12;
/// Segment payload size of control messages.
pub const CONTROL_SEGMENT_SIZE: usize = 8;
/// At most 32 segments per message.
pub const MAX_SEGMENTS: usize = 32;

/// Opcode of the Segment Acknowledgment control message.
pub const SEGMENT_ACK_OPCODE: u8 = 0x00;

/// Reassembled or unsegmented access message.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessMessage {
    pub source: Address,
    pub destination: Address,
    pub network_key: KeyIndex,
    pub iv_index: u32,
    /// Sequence number of the message (SeqAuth low bits).
    pub sequence: u32,
    pub ttl: u8,
    /// Application Key identifier, `None` for Device Key messages.
    pub aid: Option<u8>,
    pub transport_mic: MicSize,
    pub upper_transport_pdu: Vec<u8>,
    pub segmented: bool,
}

impl fmt::Debug for AccessMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessMessage")
            .field("src", &self.source)
            .field("dst", &self.destination)
            .field("seq", &self.sequence)
            .field("aid", &self.aid)
            .field("szmic", &(self.transport_mic == MicSize::Long))
            .field("len", &self.upper_transport_pdu.len())
            .finish()
    }
}

/// Reassembled or unsegmented control message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlMessage {
    pub source: Address,
    pub destination: Address,
    pub network_key: KeyIndex,
    pub iv_index: u32,
    pub sequence: u32,
    pub ttl: u8,
    pub opcode: u8,
    pub parameters: Vec<u8>,
}

/// A Lower Transport PDU handed to the Upper Transport Layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LowerTransportPdu {
    Access(AccessMessage),
    Control(ControlMessage),
}

impl LowerTransportPdu {
    pub fn source(&self) -> Address {
        match self {
            LowerTransportPdu::Access(m) => m.source,
            LowerTransportPdu::Control(m) => m.source,
        }
    }

    pub fn destination(&self) -> Address {
        match self {
            LowerTransportPdu::Access(m) => m.destination,
            LowerTransportPdu::Control(m) => m.destination,
        }
    }
}

/// Header of a segment, by transport type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentHeader {
    Access { aid: Option<u8>, szmic: bool },
    Control { opcode: u8 },
}

/// One segment of a segmented message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub seq_zero: u16,
    pub segment_offset: u8,
    pub last_segment: u8,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn count(&self) -> usize {
        usize::from(self.last_segment) + 1
    }

    fn decode(transport_type: TransportType, data: &[u8]) -> Option<Self> {
        if data.len() < 5 || data[0] & 0x80 == 0 {
            return None;
        }
        let header = match transport_type {
            TransportType::Access => SegmentHeader::Access {
                aid: (data[0] & 0x40 != 0).then_some(data[0] & 0x3F),
                szmic: data[1] & 0x80 != 0,
            },
            TransportType::Control => SegmentHeader::Control {
                opcode: data[0] & 0x7F,
            },
        };
        let seq_zero = (u16::from(data[1] & 0x7F) << 6) | u16::from(data[2] >> 2);
        let segment_offset = ((data[2] & 0x03) << 3) | (data[3] >> 5);
        let last_segment = data[3] & 0x1F;
        if segment_offset > last_segment {
            return None;
        }
        let max = match transport_type {
            TransportType::Access => ACCESS_SEGMENT_SIZE,
            TransportType::Control => CONTROL_SEGMENT_SIZE,
        };
        if data.len() - 4 > max {
            return None;
        }
        Some(Self {
            header,
            seq_zero,
            segment_offset,
            last_segment,
            data: data[4..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let (octet0, szmic) = match self.header {
            SegmentHeader::Access { aid, szmic } => {
                let akf = aid.map(|aid| 0x40 | (aid & 0x3F)).unwrap_or(0);
                (0x80 | akf, szmic)
            }
            SegmentHeader::Control { opcode } => (0x80 | (opcode & 0x7F), false),
        };
        let seq_zero = self.seq_zero & 0x1FFF;
        let mut pdu = Vec::with_capacity(4 + self.data.len());
        pdu.push(octet0);
        pdu.push((u8::from(szmic) << 7) | (seq_zero >> 6) as u8);
        pdu.push((((seq_zero & 0x3F) as u8) << 2) | (self.segment_offset >> 3));
        pdu.push(((self.segment_offset & 0x07) << 5) | (self.last_segment & 0x1F));
        pdu.extend_from_slice(&self.data);
        pdu
    }
}

/// Segment Acknowledgment control message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentAcknowledgment {
    /// Sent by a Friend on behalf of a Low Power node.
    pub on_behalf_of_low_power: bool,
    pub seq_zero: u16,
    /// Bit n set when segment n was received. 0 means busy.
    pub block_ack: u32,
}

impl SegmentAcknowledgment {
    /// Acknowledgment of the segments set in `block_ack`.
    pub fn new(seq_zero: u16, block_ack: u32) -> Self {
        Self {
            on_behalf_of_low_power: false,
            seq_zero: seq_zero & 0x1FFF,
            block_ack,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.block_ack == 0
    }

    pub fn is_received(&self, segment: usize) -> bool {
        segment < MAX_SEGMENTS && self.block_ack & (1 << segment) != 0
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != 7 || data[0] != SEGMENT_ACK_OPCODE {
            return None;
        }
        Some(Self {
            on_behalf_of_low_power: data[1] & 0x80 != 0,
            seq_zero: (u16::from(data[1] & 0x7F) << 6) | u16::from(data[2] >> 2),
            block_ack: u32::from_be_bytes([data[3], data[4], data[5], data[6]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(7);
        pdu.push(SEGMENT_ACK_OPCODE);
        pdu.push((u8::from(self.on_behalf_of_low_power) << 7) | (self.seq_zero >> 6) as u8);
        pdu.push(((self.seq_zero & 0x3F) as u8) << 2);
        pdu.extend_from_slice(&self.block_ack.to_be_bytes());
        pdu
    }
}

/// Lower Transport content of a Network PDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LowerPdu {
    Unsegmented(LowerTransportPdu),
    Segment(Segment),
    Acknowledgment(SegmentAcknowledgment),
}

impl LowerPdu {
    /// Parse the transport PDU of a Network PDU.
    pub fn decode(pdu: &NetworkPdu) -> Option<Self> {
        let data = &pdu.transport_pdu;
        let first = *data.first()?;
        if first & 0x80 != 0 {
            return Segment::decode(pdu.transport_type, data).map(LowerPdu::Segment);
        }
        match pdu.transport_type {
            TransportType::Access => {
                // Upper Transport PDU carries at least 1 byte and the 4-byte TransMIC.
                if data.len() < 6 {
                    return None;
                }
                Some(LowerPdu::Unsegmented(LowerTransportPdu::Access(AccessMessage {
                    source: pdu.source,
                    destination: pdu.destination,
                    network_key: pdu.network_key,
                    iv_index: pdu.iv_index,
                    sequence: pdu.sequence,
                    ttl: pdu.ttl,
                    aid: (first & 0x40 != 0).then_some(first & 0x3F),
                    transport_mic: MicSize::Short,
                    upper_transport_pdu: data[1..].to_vec(),
                    segmented: false,
                })))
            }
            TransportType::Control if first == SEGMENT_ACK_OPCODE => {
                SegmentAcknowledgment::decode(data).map(LowerPdu::Acknowledgment)
            }
            TransportType::Control => Some(LowerPdu::Unsegmented(LowerTransportPdu::Control(
                ControlMessage {
                    source: pdu.source,
                    destination: pdu.destination,
                    network_key: pdu.network_key,
                    iv_index: pdu.iv_index,
                    sequence: pdu.sequence,
                    ttl: pdu.ttl,
                    opcode: first & 0x7F,
                    parameters: data[1..].to_vec(),
                },
            ))),
        }
    }
}

/// Sequence number of the message a PDU belongs to.
///
/// For segments this is the sequence number whose low 13 bits equal
/// SeqZero, at or below the segment's own sequence number.
pub fn message_sequence(sequence: u32, seq_zero: Option<u16>) -> u32 {
    match seq_zero {
        Some(seq_zero) => {
            let seq_zero = u32::from(seq_zero & 0x1FFF);
            let base = sequence & 0x00FF_E000;
            if sequence & 0x1FFF < seq_zero {
                (base + seq_zero).wrapping_sub(0x2000) & 0x00FF_FFFF
            } else {
                base + seq_zero
            }
        }
        None => sequence,
    }
}

/// Transport PDU of an unsegmented access message.
pub fn unsegmented_access(aid: Option<u8>, upper_transport_pdu: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(1 + upper_transport_pdu.len());
    pdu.push(aid.map(|aid| 0x40 | (aid & 0x3F)).unwrap_or(0));
    pdu.extend_from_slice(upper_transport_pdu);
    pdu
}

/// Transport PDU of an unsegmented control message.
pub fn unsegmented_control(opcode: u8, parameters: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(1 + parameters.len());
    pdu.push(opcode & 0x7F);
    pdu.extend_from_slice(parameters);
    pdu
}

/// Split a payload into segments.
///
/// Returns `None` when the payload needs more than 32 segments.
pub fn segment(header: SegmentHeader, seq_zero: u16, payload: &[u8]) -> Option<Vec<Segment>> {
    let size = match header {
        SegmentHeader::Access { .. } => ACCESS_SEGMENT_SIZE,
        SegmentHeader::Control { .. } => CONTROL_SEGMENT_SIZE,
    };
    let count = payload.len().div_ceil(size).max(1);
    if count > MAX_SEGMENTS {
        return None;
    }
    Some(
        payload
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| Segment {
                header,
                seq_zero: seq_zero & 0x1FFF,
                segment_offset: i as u8,
                last_segment: (count - 1) as u8,
                data: chunk.to_vec(),
            })
            .collect(),
    )
}
