//! Access PDU: opcode followed by parameters.
//!
//! | First octet | Opcode size | Range                                  |
//! |-------------|-------------|----------------------------------------|
//! | `0xxxxxxx`  | 1           | 0x00..=0x7E (0x7F reserved)            |
//! | `10xxxxxx`  | 2           | 0x8000..=0xBFFF                        |
//! | `11xxxxxx`  | 3           | vendor: 6-bit opcode + 16-bit company  |

use std::fmt;

use crate::model::{Address, MeshAddress};
use crate::upper::UpperTransportPdu;

const RESERVED_OPCODE: u8 = 0x7F;

/// Size of the Access Layer segment payload: 12 bytes per segment.
const SEGMENT_PAYLOAD: usize = 12;

/// Encode an opcode into its 1, 2 or 3 byte wire form. Returns `None`
/// for the reserved opcode and values outside the three ranges.
pub fn encode_opcode(opcode: u32) -> Option<Vec<u8>> {
    match opcode {
        0x00..0x7F => Some(vec![opcode as u8]),
        0x8000..=0xBFFF => Some(vec![(opcode >> 8) as u8, opcode as u8]),
        0x00C0_0000..=0x00FF_FFFF => Some(vec![(opcode >> 16) as u8, (opcode >> 8) as u8, opcode as u8]),
        _ => None,
    }
}

/// Decode the opcode at the start of `data`, returning it and its size.
pub fn decode_opcode(data: &[u8]) -> Option<(u32, usize)> {
    let octet0 = *data.first()?;
    if octet0 == RESERVED_OPCODE {
        return None;
    }
    if octet0 & 0x80 == 0 {
        return Some((u32::from(octet0), 1));
    }
    if octet0 & 0x40 == 0 {
        let octet1 = *data.get(1)?;
        return Some(((u32::from(octet0) << 8) | u32::from(octet1), 2));
    }
    if data.len() < 3 {
        return None;
    }
    Some((
        (u32::from(octet0) << 16) | (u32::from(data[1]) << 8) | u32::from(data[2]),
        3,
    ))
}

/// True for 3-byte vendor opcodes.
pub fn is_vendor_opcode(opcode: u32) -> bool {
    opcode & 0x00C0_0000 == 0x00C0_0000
}

/// Number of Lower Transport segments an access payload needs.
pub fn segment_count(access_pdu_len: usize, mic_len: usize, segmented: bool) -> usize {
    if !segmented {
        return 1;
    }
    (access_pdu_len + mic_len).div_ceil(SEGMENT_PAYLOAD)
}

/// A received Access PDU.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessPdu {
    pub source: Address,
    pub destination: MeshAddress,
    pub opcode: u32,
    pub parameters: Vec<u8>,
}

impl AccessPdu {
    pub fn decode(pdu: &UpperTransportPdu) -> Option<Self> {
        let (opcode, size) = decode_opcode(&pdu.access_pdu)?;
        Some(Self {
            source: pdu.source,
            destination: pdu.destination,
            opcode,
            parameters: pdu.access_pdu[size..].to_vec(),
        })
    }

    /// Wire form of an opcode with its parameters.
    pub fn encode(opcode: u32, parameters: &[u8]) -> Option<Vec<u8>> {
        let mut pdu = encode_opcode(opcode)?;
        pdu.extend_from_slice(parameters);
        Some(pdu)
    }
}

impl fmt::Debug for AccessPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccessPdu(opcode {:#06x}, {} -> {}, params {})",
            self.opcode,
            self.source,
            self.destination.address,
            hex::encode(&self.parameters)
        )
    }
}
