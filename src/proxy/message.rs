//! Proxy Configuration messages.
//!
//! Carried as control Network PDUs secured with the proxy nonce, TTL 0,
//! destination unassigned.
//!
//! ## Wire Format
//!
//! | Opcode | Message              | Parameters                          |
//! |--------|----------------------|-------------------------------------|
//! | 0x00   | Set Filter Type      | type (1)                            |
//! | 0x01   | Add Addresses        | n × address (2, BE)                 |
//! | 0x02   | Remove Addresses     | n × address (2, BE)                 |
//! | 0x03   | Filter Status        | type (1), list size (2, BE)         |

use std::collections::BTreeSet;
use std::fmt;

use crate::model::Address;

pub const SET_FILTER_TYPE: u8 = 0x00;
pub const ADD_ADDRESSES: u8 = 0x01;
pub const REMOVE_ADDRESSES: u8 = 0x02;
pub const FILTER_STATUS: u8 = 0x03;

/// Most addresses one message can carry and still fit a Network PDU.
pub const MAX_ADDRESSES_PER_MESSAGE: usize = 5;

/// Kind of proxy filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterType {
    /// Only listed destinations are forwarded.
    #[default]
    AcceptList,
    /// Listed destinations are blocked.
    RejectList,
}

impl FilterType {
    pub fn to_byte(self) -> u8 {
        match self {
            FilterType::AcceptList => 0x00,
            FilterType::RejectList => 0x01,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(FilterType::AcceptList),
            0x01 => Some(FilterType::RejectList),
            _ => None,
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterType::AcceptList => write!(f, "accept list"),
            FilterType::RejectList => write!(f, "reject list"),
        }
    }
}

/// A Proxy Configuration message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyConfigurationMessage {
    SetFilterType(FilterType),
    AddAddresses(BTreeSet<Address>),
    RemoveAddresses(BTreeSet<Address>),
    FilterStatus { filter_type: FilterType, list_size: u16 },
}

impl ProxyConfigurationMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::SetFilterType(_) => SET_FILTER_TYPE,
            Self::AddAddresses(_) => ADD_ADDRESSES,
            Self::RemoveAddresses(_) => REMOVE_ADDRESSES,
            Self::FilterStatus { .. } => FILTER_STATUS,
        }
    }

    /// Transport PDU: opcode followed by parameters.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.opcode()];
        match self {
            Self::SetFilterType(filter_type) => out.push(filter_type.to_byte()),
            Self::AddAddresses(addresses) | Self::RemoveAddresses(addresses) => {
                for address in addresses {
                    out.extend_from_slice(&address.to_be_bytes());
                }
            }
            Self::FilterStatus {
                filter_type,
                list_size,
            } => {
                out.push(filter_type.to_byte());
                out.extend_from_slice(&list_size.to_be_bytes());
            }
        }
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&opcode, params) = data.split_first()?;
        match opcode {
            SET_FILTER_TYPE => match params {
                [t] => FilterType::from_byte(*t).map(Self::SetFilterType),
                _ => None,
            },
            ADD_ADDRESSES => decode_addresses(params).map(Self::AddAddresses),
            REMOVE_ADDRESSES => decode_addresses(params).map(Self::RemoveAddresses),
            FILTER_STATUS => match params {
                [t, hi, lo] => Some(Self::FilterStatus {
                    filter_type: FilterType::from_byte(*t)?,
                    list_size: u16::from_be_bytes([*hi, *lo]),
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

fn decode_addresses(params: &[u8]) -> Option<BTreeSet<Address>> {
    if params.is_empty() || params.len() % 2 != 0 {
        return None;
    }
    Some(
        params
            .chunks_exact(2)
            .map(|c| Address::from_be_bytes([c[0], c[1]]))
            .collect(),
    )
}

/// Split `addresses` into sets that each fit one message.
pub fn chunk_addresses(addresses: &BTreeSet<Address>) -> Vec<BTreeSet<Address>> {
    let list: Vec<Address> = addresses.iter().copied().collect();
    list.chunks(MAX_ADDRESSES_PER_MESSAGE)
        .map(|c| c.iter().copied().collect())
        .collect()
}
