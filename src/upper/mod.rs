//! Upper Transport Layer
//!
//! Decrypts access messages with Application or Device Keys, consumes
//! Heartbeat control messages and keeps the local Heartbeat publication
//! and subscription state.

pub mod heartbeat;
pub mod pdu;

use tracing::{debug, info, trace};

use crate::lower::LowerTransportPdu;
use crate::model::MeshNetwork;

pub use heartbeat::{
    HeartbeatDue, HeartbeatMessage, HeartbeatPublication, HeartbeatSubscription, HEARTBEAT_OPCODE,
};
pub use pdu::{transport_mic_size, KeySet, UpperTransportPdu, MAX_UNSEGMENTED_ACCESS_PAYLOAD};

/// A message accepted by the Upper Transport Layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpperIncoming {
    /// Decrypted access payload for the Access Layer.
    Access { pdu: UpperTransportPdu, key_set: KeySet },
    Heartbeat(HeartbeatMessage),
}

/// Upper Transport Layer state.
#[derive(Debug, Default)]
pub struct UpperTransportLayer {
    publication: Option<HeartbeatPublication>,
    subscription: Option<HeartbeatSubscription>,
}

impl UpperTransportLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a message delivered by the Lower Transport Layer.
    pub fn receive(
        &mut self,
        pdu: LowerTransportPdu,
        network: &MeshNetwork,
        now_ms: u64,
    ) -> Option<UpperIncoming> {
        match pdu {
            LowerTransportPdu::Access(message) => match UpperTransportPdu::decode(&message, network) {
                Some((pdu, key_set)) => {
                    trace!(src = %pdu.source, seq = pdu.sequence, key = ?key_set, "Upper transport PDU decrypted");
                    Some(UpperIncoming::Access { pdu, key_set })
                }
                None => {
                    debug!(src = %message.source, dst = %message.destination, seq = message.sequence, "No key decrypts access message");
                    None
                }
            },
            LowerTransportPdu::Control(message) => {
                let Some(heartbeat) = HeartbeatMessage::decode(&message) else {
                    debug!(src = %message.source, opcode = message.opcode, "Unsupported control message");
                    return None;
                };
                if let Some(subscription) = self.subscription.as_mut()
                    && subscription.update(&heartbeat, now_ms)
                {
                    trace!(src = %heartbeat.source, count = subscription.count(), "Heartbeat counted");
                }
                Some(UpperIncoming::Heartbeat(heartbeat))
            }
        }
    }

    pub fn heartbeat_publication(&self) -> Option<&HeartbeatPublication> {
        self.publication.as_ref()
    }

    /// Replace the Heartbeat publication; `None` stops publishing.
    pub fn set_heartbeat_publication(&mut self, publication: Option<HeartbeatPublication>) {
        match &publication {
            Some(p) if p.next_deadline().is_some() => {
                info!(dst = %p.destination, period_log = p.period_log, count_log = p.count_log(), "Heartbeat publication started");
            }
            _ => debug!("Heartbeat publication stopped"),
        }
        self.publication = publication;
    }

    pub fn heartbeat_subscription(&self) -> Option<&HeartbeatSubscription> {
        self.subscription.as_ref()
    }

    pub fn set_heartbeat_subscription(&mut self, subscription: Option<HeartbeatSubscription>) {
        self.subscription = subscription;
    }

    /// Heartbeat to send, if the publication period elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Option<HeartbeatDue> {
        self.publication.as_mut()?.poll(now_ms)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.publication.as_ref()?.next_deadline()
    }
}
