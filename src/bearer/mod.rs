//! Bearer Abstractions
//!
//! The bearer carries opaque PDUs between this node and the mesh. A bearer
//! implementation (advertising, GATT proxy, or the UDP bearer in this
//! module) pushes received PDUs into a [`BearerEvent`] channel and accepts
//! outgoing PDUs through [`Bearer::send`].

pub mod udp;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Type of a PDU carried by a bearer.
///
/// Values match the Proxy protocol message type field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PduType {
    NetworkPdu,
    MeshBeacon,
    ProxyConfiguration,
    ProvisioningPdu,
}

impl PduType {
    pub fn to_byte(self) -> u8 {
        match self {
            PduType::NetworkPdu => 0x00,
            PduType::MeshBeacon => 0x01,
            PduType::ProxyConfiguration => 0x02,
            PduType::ProvisioningPdu => 0x03,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(PduType::NetworkPdu),
            0x01 => Some(PduType::MeshBeacon),
            0x02 => Some(PduType::ProxyConfiguration),
            0x03 => Some(PduType::ProvisioningPdu),
            _ => None,
        }
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PduType::NetworkPdu => "network PDU",
            PduType::MeshBeacon => "mesh beacon",
            PduType::ProxyConfiguration => "proxy configuration",
            PduType::ProvisioningPdu => "provisioning PDU",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors related to bearer operations.
#[derive(Debug, Error)]
pub enum BearerError {
    #[error("bearer closed")]
    Closed,

    #[error("bearer does not support {0}")]
    PduTypeNotSupported(PduType),

    /// The bearer is momentarily busy; the send may be retried.
    #[error("bearer busy, wait and retry")]
    WaitAndRetry,

    /// The peer is not ready for a write without response.
    #[error("peer not ready for write without response")]
    NotReady,

    #[error("bearer failed to start: {0}")]
    StartFailed(String),

    #[error("invalid bearer address: {0}")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BearerError {
    /// Whether the failed send may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, BearerError::WaitAndRetry | BearerError::NotReady)
    }
}

// ============================================================================
// Events and channels
// ============================================================================

/// An event produced by a bearer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BearerEvent {
    /// The bearer is ready to carry PDUs.
    Opened,
    /// A PDU was received.
    Pdu {
        pdu_type: PduType,
        data: Vec<u8>,
        timestamp_ms: u64,
    },
    /// The bearer closed.
    Closed,
}

impl BearerEvent {
    /// Create a PDU event stamped with the current time.
    pub fn pdu(pdu_type: PduType, data: Vec<u8>) -> Self {
        BearerEvent::Pdu {
            pdu_type,
            data,
            timestamp_ms: now_ms(),
        }
    }
}

/// Channel sender for bearer events.
pub type BearerTx = tokio::sync::mpsc::Sender<BearerEvent>;

/// Channel receiver for bearer events.
pub type BearerRx = tokio::sync::mpsc::Receiver<BearerEvent>;

/// Create a bearer event channel with the given buffer size.
pub fn bearer_channel(buffer: usize) -> (BearerTx, BearerRx) {
    tokio::sync::mpsc::channel(buffer)
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Bearer trait
// ============================================================================

/// Outgoing side of a bearer.
pub trait Bearer: Send {
    /// Send a PDU of the given type.
    fn send(&self, data: &[u8], pdu_type: PduType) -> Result<(), BearerError>;

    /// Whether the bearer can carry PDUs of this type.
    fn supports(&self, pdu_type: PduType) -> bool;

    /// Whether the bearer is currently open.
    fn is_open(&self) -> bool;

    /// GATT bearers deliver every PDU once, so Network Transmit repeats are
    /// not applied to them.
    fn is_gatt(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_type_byte_mapping() {
        for t in [
            PduType::NetworkPdu,
            PduType::MeshBeacon,
            PduType::ProxyConfiguration,
            PduType::ProvisioningPdu,
        ] {
            assert_eq!(PduType::from_byte(t.to_byte()), Some(t));
        }
        assert_eq!(PduType::from_byte(0x04), None);
    }

    #[test]
    fn test_transient_errors() {
        assert!(BearerError::WaitAndRetry.is_transient());
        assert!(BearerError::NotReady.is_transient());
        assert!(!BearerError::Closed.is_transient());
    }

    #[test]
    fn test_pdu_event_timestamp() {
        match BearerEvent::pdu(PduType::NetworkPdu, vec![1, 2, 3]) {
            BearerEvent::Pdu { timestamp_ms, data, .. } => {
                assert!(timestamp_ms > 0);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bearer_channel() {
        let (tx, mut rx) = bearer_channel(10);
        tx.send(BearerEvent::Opened).await.unwrap();
        assert_eq!(rx.recv().await, Some(BearerEvent::Opened));
    }
}
