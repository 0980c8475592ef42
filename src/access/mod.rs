//! Access Layer
//!
//! Turns typed messages into Access PDUs and back. Outgoing messages are
//! validated against the local node and key configuration, get their TID
//! and, when acknowledged, an acknowledgment context with retry and
//! timeout deadlines. Incoming PDUs are decoded by the registered Model
//! delegates and dispatched to every Model the message is meant for.

mod delegate;
pub mod message;
pub mod messages;
pub mod pdu;
#[cfg(test)]
mod tests;
mod transaction;

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::NetworkConfig;
use crate::crypto::MicSize;
use crate::model::{Address, KeyIndex, MeshAddress, MeshNetwork, ModelId, DEFAULT_TTL_SENTINEL};
use crate::upper::{transport_mic_size, KeySet, UpperTransportPdu, MAX_UNSEGMENTED_ACCESS_PAYLOAD};

pub use delegate::{
    GenericOnOffClient, GenericOnOffServer, MessageContext, ModelDelegate, ModelRegistry,
    OnOffState,
};
pub use message::{MeshMessage, MessageKind, Security, StaticMessage, UnknownMessage};
pub use messages::ConfigRequest;
pub use pdu::{decode_opcode, encode_opcode, is_vendor_opcode, segment_count, AccessPdu};
pub use transaction::{LastTransaction, TransactionTable, TRANSACTION_TIMEOUT_MS};

/// Identifier of an outgoing message, used to cancel it and to match its
/// outcome.
pub type MessageId = u64;

/// Upper bound on outstanding acknowledged requests.
const MAX_ACK_CONTEXTS: usize = 256;

/// Reply delay range for requests sent to a unicast address.
const UNICAST_REPLY_DELAY_MS: (u64, u64) = (20, 50);
/// Reply delay range for requests sent to a group or virtual address.
const GROUP_REPLY_DELAY_MS: (u64, u64) = (20, 500);

/// Errors surfaced to the sender of a message.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("local node has no such source address")]
    InvalidSource,

    #[error("element index out of range")]
    InvalidElement,

    #[error("TTL must be 0 or in 2..=127")]
    InvalidTtl,

    #[error("invalid destination address")]
    InvalidDestination,

    #[error("model is not bound to the application key")]
    ModelNotBoundToAppKey,

    #[error("no device key for the destination")]
    NoDeviceKey,

    #[error("network key not found")]
    NoNetworkKey,

    #[error("application key not found")]
    NoApplicationKey,

    #[error("key is in use and cannot be deleted")]
    CannotDelete,

    #[error("a request with the same opcode is already outstanding")]
    Busy,

    #[error("no response received in time")]
    Timeout,

    #[error("message cancelled")]
    Cancelled,

    #[error("opcode cannot be encoded")]
    InvalidOpcode,

    #[error("bearer refused the message")]
    SendFailed,
}

// ============================================================================
// Outgoing messages
// ============================================================================

/// An application message to send with an Application Key.
#[derive(Debug)]
pub struct AccessRequest {
    pub message: Box<dyn MeshMessage>,
    pub element_index: usize,
    /// Sending Model; checked for a binding to `application_key`.
    pub model: Option<ModelId>,
    pub destination: MeshAddress,
    pub application_key: KeyIndex,
    /// `None` uses the default TTL.
    pub ttl: Option<u8>,
}

/// An encoded Access PDU ready for the Upper Transport Layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingAccess {
    pub id: MessageId,
    pub source: Address,
    pub destination: MeshAddress,
    pub key_set: KeySet,
    pub ttl: Option<u8>,
    pub opcode: u32,
    pub access_pdu: Vec<u8>,
    pub security: Security,
    /// Sent as a segmented message.
    pub segmented: bool,
}

impl OutgoingAccess {
    pub fn transport_mic(&self) -> MicSize {
        transport_mic_size(
            self.security == Security::High,
            self.access_pdu.len(),
            self.segmented,
        )
    }

    /// Number of Lower Transport segments the message occupies.
    pub fn segment_count(&self) -> usize {
        segment_count(self.access_pdu.len(), self.transport_mic().len(), self.segmented)
    }

    /// Encrypt with the given sequence number and IV Index.
    pub fn encrypt(
        &self,
        sequence: u32,
        iv_index: u32,
    ) -> Result<UpperTransportPdu, crate::crypto::CryptoError> {
        UpperTransportPdu::encrypt(
            &self.access_pdu,
            self.source,
            &self.destination,
            &self.key_set,
            sequence,
            iv_index,
            self.transport_mic(),
        )
    }
}

/// Timer driven work produced by [`AccessLayer::poll`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessAction {
    Send(OutgoingAccess),
    /// No response arrived before the acknowledged request timed out.
    Timeout {
        id: MessageId,
        opcode: u32,
        destination: Address,
    },
}

// ============================================================================
// Incoming messages
// ============================================================================

/// A message decoded by the Access Layer.
#[derive(Clone, Debug)]
pub struct AccessReceived {
    pub message: Arc<dyn MeshMessage>,
    pub source: Address,
    pub destination: MeshAddress,
    pub key_set: KeySet,
    /// Outgoing request this message answers.
    pub response_to: Option<MessageId>,
}

/// A Configuration Server request addressed to the local node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigIncoming {
    pub request: ConfigRequest,
    pub source: Address,
    /// Local element the request was sent to.
    pub destination: Address,
    pub key_set: KeySet,
}

#[derive(Clone, Debug)]
pub enum AccessIncoming {
    Message(AccessReceived),
    Config(ConfigIncoming),
}

// ============================================================================
// Layer state
// ============================================================================

#[derive(Debug)]
struct AcknowledgmentContext {
    id: MessageId,
    request: Arc<dyn MeshMessage>,
    response_opcode: u32,
    outgoing: OutgoingAccess,
    retry_at_ms: u64,
    retry_delay_ms: u64,
    timeout_at_ms: u64,
}

impl AcknowledgmentContext {
    fn matches(&self, opcode: u32, source: Address, destination: Address) -> bool {
        self.response_opcode == opcode
            && self.outgoing.destination.address == source
            && self.outgoing.source == destination
    }
}

#[derive(Clone, Copy, Debug)]
struct PublicationTimer {
    next_at_ms: u64,
    period_ms: u64,
}

#[derive(Debug)]
struct ScheduledSend {
    at_ms: u64,
    outgoing: OutgoingAccess,
}

/// Access Layer state.
#[derive(Debug)]
pub struct AccessLayer {
    config: NetworkConfig,
    registry: ModelRegistry,
    transactions: TransactionTable,
    contexts: Vec<AcknowledgmentContext>,
    publications: BTreeMap<(usize, ModelId), PublicationTimer>,
    scheduled: Vec<ScheduledSend>,
    next_id: MessageId,
}

impl AccessLayer {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            registry: ModelRegistry::new(),
            transactions: TransactionTable::new(),
            contexts: Vec::new(),
            publications: BTreeMap::new(),
            scheduled: Vec::new(),
            next_id: 1,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    /// Number of acknowledged requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_pending(&self, id: MessageId) -> bool {
        self.contexts.iter().any(|c| c.id == id)
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encode(
        &mut self,
        message: &dyn MeshMessage,
        source: Address,
        destination: MeshAddress,
        key_set: KeySet,
        ttl: Option<u8>,
    ) -> Result<OutgoingAccess, AccessError> {
        let access_pdu = AccessPdu::encode(message.opcode(), &message.parameters())
            .ok_or(AccessError::InvalidOpcode)?;
        let segmented = message.is_segmented() || access_pdu.len() > MAX_UNSEGMENTED_ACCESS_PAYLOAD;
        Ok(OutgoingAccess {
            id: self.allocate_id(),
            source,
            destination,
            key_set,
            ttl,
            opcode: message.opcode(),
            access_pdu,
            security: message.security(),
            segmented,
        })
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Validate and encode an application message.
    pub fn send(
        &mut self,
        request: AccessRequest,
        network: &MeshNetwork,
        now_ms: u64,
    ) -> Result<OutgoingAccess, AccessError> {
        let AccessRequest {
            mut message,
            element_index,
            model,
            destination,
            application_key,
            ttl,
        } = request;
        check_ttl(ttl)?;
        check_destination(&destination)?;
        let node = network.local_node().ok_or(AccessError::InvalidSource)?;
        let element = node.elements.get(element_index).ok_or(AccessError::InvalidElement)?;
        if let Some(model_id) = model {
            let bound = element.model(model_id).is_some_and(|m| m.is_bound_to(application_key));
            if !bound {
                return Err(AccessError::ModelNotBoundToAppKey);
            }
        }
        let app_key = network
            .application_key(application_key)
            .ok_or(AccessError::NoApplicationKey)?;
        let net_key = network
            .network_key(app_key.bound_network_key())
            .ok_or(AccessError::NoNetworkKey)?;
        let source = node.element_address(element_index);
        let key_set = KeySet::application(app_key, net_key);

        let continuing = message.continues_transaction();
        if let Some(tid) = message.tid_mut()
            && tid.is_none()
        {
            *tid = Some(self.transactions.next_tid(source, destination.address, continuing, now_ms));
        }
        self.finish_send(Arc::from(message), source, destination, key_set, ttl, now_ms)
    }

    /// Validate and encode a configuration message secured with the
    /// destination's Device Key.
    pub fn send_config(
        &mut self,
        message: Box<dyn MeshMessage>,
        destination: Address,
        ttl: Option<u8>,
        network: &MeshNetwork,
        now_ms: u64,
    ) -> Result<OutgoingAccess, AccessError> {
        check_ttl(ttl)?;
        if !destination.is_unicast() {
            return Err(AccessError::InvalidDestination);
        }
        let local = network.local_node().ok_or(AccessError::InvalidSource)?;
        let target = network
            .node_with_address(destination)
            .ok_or(AccessError::InvalidDestination)?;
        let device_key = target.device_key.ok_or(AccessError::NoDeviceKey)?;
        let network_key = target
            .network_keys
            .iter()
            .find_map(|index| network.network_key(*index))
            .or_else(|| network.primary_network_key())
            .ok_or(AccessError::NoNetworkKey)?;
        let key_set = KeySet::device(network_key.index(), target.primary_address, device_key);
        let source = local.primary_address;
        self.finish_send(
            Arc::from(message),
            source,
            MeshAddress::new(destination),
            key_set,
            ttl,
            now_ms,
        )
    }

    fn finish_send(
        &mut self,
        message: Arc<dyn MeshMessage>,
        source: Address,
        destination: MeshAddress,
        key_set: KeySet,
        ttl: Option<u8>,
        now_ms: u64,
    ) -> Result<OutgoingAccess, AccessError> {
        let response_opcode = message
            .response_opcode()
            .filter(|_| destination.address.is_unicast());
        if let Some(response_opcode) = response_opcode {
            let busy = self
                .contexts
                .iter()
                .any(|c| c.matches(response_opcode, destination.address, source));
            if busy || self.contexts.len() >= MAX_ACK_CONTEXTS {
                debug!(opcode = message.opcode(), dst = %destination.address, "Acknowledged request already outstanding");
                return Err(AccessError::Busy);
            }
        }

        let outgoing = self.encode(message.as_ref(), source, destination, key_set, ttl)?;
        trace!(id = outgoing.id, opcode = outgoing.opcode, src = %source, dst = %destination.address, "Access message prepared");

        if let Some(response_opcode) = response_opcode {
            let hops = ttl.unwrap_or(self.config.ttl());
            let retry_delay_ms = self
                .config
                .acknowledgment_retry_delay_ms(hops, outgoing.segment_count());
            self.contexts.push(AcknowledgmentContext {
                id: outgoing.id,
                request: message,
                response_opcode,
                outgoing: outgoing.clone(),
                retry_at_ms: now_ms + retry_delay_ms,
                retry_delay_ms,
                timeout_at_ms: now_ms + self.config.acknowledgment_timeout_ms(),
            });
        }
        Ok(outgoing)
    }

    /// Drop the acknowledgment context of `id`. Returns false when nothing
    /// was pending; calling it again is harmless.
    pub fn cancel(&mut self, id: MessageId) -> bool {
        let before = self.contexts.len();
        self.contexts.retain(|c| c.id != id);
        let removed = self.contexts.len() != before;
        if removed {
            debug!(id, "Acknowledged request cancelled");
        }
        removed
    }

    /// Drop every pending context, returning their ids.
    pub fn cancel_all(&mut self) -> Vec<MessageId> {
        self.scheduled.clear();
        self.contexts.drain(..).map(|c| c.id).collect()
    }

    /// Queue `response` to be sent after a random delay.
    pub fn reply(
        &mut self,
        response: &dyn MeshMessage,
        source: Address,
        destination: Address,
        key_set: KeySet,
        to_group: bool,
        now_ms: u64,
    ) -> Result<MessageId, AccessError> {
        let (low, high) = if to_group {
            GROUP_REPLY_DELAY_MS
        } else {
            UNICAST_REPLY_DELAY_MS
        };
        let delay = rand::rng().random_range(low..=high);
        let outgoing = self.encode(response, source, MeshAddress::new(destination), key_set, None)?;
        let id = outgoing.id;
        trace!(id, opcode = outgoing.opcode, dst = %destination, delay, "Reply scheduled");
        self.scheduled.push(ScheduledSend {
            at_ms: now_ms + delay,
            outgoing,
        });
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------------

    /// Decode and dispatch a decrypted Upper Transport PDU.
    pub fn handle(
        &mut self,
        pdu: &UpperTransportPdu,
        key_set: &KeySet,
        network: &MeshNetwork,
        now_ms: u64,
    ) -> Option<AccessIncoming> {
        let Some(access) = AccessPdu::decode(pdu) else {
            debug!(src = %pdu.source, "Invalid opcode in access PDU");
            return None;
        };
        let node = network.local_node()?;
        let device_key = matches!(key_set, KeySet::Device { .. });

        if device_key
            && network.is_local_unicast(access.destination.address)
            && let Some(request) = ConfigRequest::decode(access.opcode, &access.parameters)
        {
            trace!(src = %access.source, opcode = access.opcode, "Configuration request");
            return Some(AccessIncoming::Config(ConfigIncoming {
                request,
                source: access.source,
                destination: access.destination.address,
                key_set: key_set.clone(),
            }));
        }

        let mut decoded: Option<Arc<dyn MeshMessage>> = None;
        let mut receivers = Vec::new();
        for model in self.registry.iter_mut() {
            if !model.delegate.opcodes().contains(&access.opcode) {
                continue;
            }
            let element_address = node.element_address(model.element_index);
            let accepts = match key_set {
                KeySet::Device { .. } => {
                    model.delegate.requires_device_key() && element_address == access.destination.address
                }
                KeySet::Application { application_key, .. } => {
                    let Some(local) = node
                        .elements
                        .get(model.element_index)
                        .and_then(|e| e.model(model.model_id))
                    else {
                        continue;
                    };
                    let destination = access.destination.address;
                    !model.delegate.requires_device_key()
                        && local.is_bound_to(*application_key)
                        && (destination == element_address
                            || (destination == Address::ALL_NODES && model.element_index == 0)
                            || local.is_subscribed_to(destination))
                }
            };
            if !accepts {
                continue;
            }
            if let Some(message) = model.delegate.decode(access.opcode, &access.parameters) {
                decoded.get_or_insert(message);
                receivers.push((model.element_index, model.model_id));
            }
        }

        let message = decoded
            .or_else(|| {
                device_key
                    .then(|| messages::decode_config_status(access.opcode, &access.parameters))
                    .flatten()
            })
            .unwrap_or_else(|| {
                trace!(opcode = access.opcode, src = %access.source, "No model decodes opcode");
                Arc::new(UnknownMessage {
                    opcode: access.opcode,
                    parameters: access.parameters.clone(),
                })
            });

        let answered = self
            .contexts
            .iter()
            .position(|c| c.matches(access.opcode, access.source, access.destination.address))
            .map(|i| self.contexts.remove(i));
        if let Some(context) = &answered {
            debug!(id = context.id, src = %access.source, opcode = access.opcode, "Response received");
        }

        for (element_index, model_id) in receivers {
            let context = MessageContext {
                source: access.source,
                destination: access.destination,
                key_set: key_set.clone(),
                element_index,
                now_ms,
            };
            let Some(model) = self.registry.get_mut(element_index, model_id) else {
                continue;
            };
            if let Some(request) = &answered {
                model
                    .delegate
                    .handle_response(message.as_ref(), Some(request.request.as_ref()), &context);
                continue;
            }
            match message.kind() {
                MessageKind::Acknowledged { .. } => {
                    let Some(response) = model.delegate.handle_acknowledged(message.as_ref(), &context)
                    else {
                        continue;
                    };
                    let source = node.element_address(element_index);
                    let to_group = !access.destination.address.is_unicast();
                    if let Err(error) = self.reply(
                        response.as_ref(),
                        source,
                        access.source,
                        key_set.clone(),
                        to_group,
                        now_ms,
                    ) {
                        warn!(%error, opcode = response.opcode(), "Response dropped");
                    }
                }
                MessageKind::Response => {
                    model.delegate.handle_response(message.as_ref(), None, &context);
                }
                MessageKind::Unacknowledged => {
                    model.delegate.handle_unacknowledged(message.as_ref(), &context);
                }
            }
        }

        Some(AccessIncoming::Message(AccessReceived {
            message,
            source: access.source,
            destination: access.destination,
            key_set: key_set.clone(),
            response_to: answered.map(|c| c.id),
        }))
    }

    // ------------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------------

    /// Re-read the publication settings of a Model and restart its timer.
    pub fn refresh_publication(
        &mut self,
        element_index: usize,
        model_id: ModelId,
        network: &MeshNetwork,
        now_ms: u64,
    ) {
        let period_ms = network
            .local_node()
            .and_then(|n| n.elements.get(element_index))
            .and_then(|e| e.model(model_id))
            .and_then(|m| m.publish.as_ref())
            .map(|p| p.period.interval_ms())
            .unwrap_or(0);
        let key = (element_index, model_id);
        if period_ms == 0 {
            if self.publications.remove(&key).is_some() {
                debug!(element = element_index, model = ?model_id, "Periodic publication stopped");
            }
            return;
        }
        info!(element = element_index, model = ?model_id, period_ms, "Periodic publication scheduled");
        self.publications.insert(
            key,
            PublicationTimer {
                next_at_ms: now_ms + period_ms,
                period_ms,
            },
        );
    }

    /// Restart the timers of every registered Model.
    pub fn refresh_all_publications(&mut self, network: &MeshNetwork, now_ms: u64) {
        let models: Vec<_> = self
            .registry
            .iter_mut()
            .map(|m| (m.element_index, m.model_id))
            .collect();
        self.publications.clear();
        for (element_index, model_id) in models {
            self.refresh_publication(element_index, model_id, network, now_ms);
        }
    }

    /// Compose and encode a publication of a Model now. Retransmissions
    /// configured for the publication are scheduled.
    ///
    /// Returns `Ok(None)` when the delegate has nothing to publish.
    pub fn publish(
        &mut self,
        element_index: usize,
        model_id: ModelId,
        network: &MeshNetwork,
        now_ms: u64,
    ) -> Result<Option<OutgoingAccess>, AccessError> {
        let node = network.local_node().ok_or(AccessError::InvalidSource)?;
        let element = node.elements.get(element_index).ok_or(AccessError::InvalidElement)?;
        let publish = element
            .model(model_id)
            .and_then(|m| m.publish.as_ref())
            .ok_or(AccessError::InvalidDestination)?;
        let app_key = network
            .application_key(publish.application_key)
            .ok_or(AccessError::NoApplicationKey)?;
        let net_key = network
            .network_key(app_key.bound_network_key())
            .ok_or(AccessError::NoNetworkKey)?;
        let ttl = (publish.ttl != DEFAULT_TTL_SENTINEL).then_some(publish.ttl);
        check_ttl(ttl)?;
        let Some(delegate) = self.registry.get_mut(element_index, model_id) else {
            return Err(AccessError::InvalidElement);
        };
        let Some(message) = delegate.delegate.compose_publication(now_ms) else {
            return Ok(None);
        };

        let source = node.element_address(element_index);
        let key_set = KeySet::application(app_key, net_key);
        let outgoing = self.encode(message.as_ref(), source, publish.address, key_set, ttl)?;
        for n in 1..=u64::from(publish.retransmit.count) {
            let mut copy = outgoing.clone();
            copy.id = self.allocate_id();
            self.scheduled.push(ScheduledSend {
                at_ms: now_ms + n * publish.retransmit.interval_ms,
                outgoing: copy,
            });
        }
        trace!(element = element_index, model = ?model_id, dst = %publish.address.address, "Publishing");
        Ok(Some(outgoing))
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Fire due replies, retries, timeouts and publications.
    ///
    /// Retries towards a destination for which `is_busy` returns true are
    /// postponed instead of queued behind the running transfer.
    pub fn poll(
        &mut self,
        network: &MeshNetwork,
        now_ms: u64,
        is_busy: impl Fn(Address) -> bool,
    ) -> Vec<AccessAction> {
        let mut actions = Vec::new();

        let (due, pending): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|s| s.at_ms <= now_ms);
        self.scheduled = pending;
        actions.extend(due.into_iter().map(|s| AccessAction::Send(s.outgoing)));

        let mut index = 0;
        while index < self.contexts.len() {
            let context = &mut self.contexts[index];
            if now_ms >= context.timeout_at_ms {
                let context = self.contexts.remove(index);
                warn!(id = context.id, opcode = context.outgoing.opcode, dst = %context.outgoing.destination.address, "Acknowledged request timed out");
                actions.push(AccessAction::Timeout {
                    id: context.id,
                    opcode: context.outgoing.opcode,
                    destination: context.outgoing.destination.address,
                });
                continue;
            }
            if now_ms >= context.retry_at_ms {
                if is_busy(context.outgoing.destination.address) {
                    context.retry_at_ms = now_ms + context.retry_delay_ms;
                } else {
                    context.retry_delay_ms *= 2;
                    context.retry_at_ms = now_ms + context.retry_delay_ms;
                    debug!(id = context.id, next_ms = context.retry_delay_ms, "Retrying acknowledged request");
                    actions.push(AccessAction::Send(context.outgoing.clone()));
                }
            }
            index += 1;
        }

        let due: Vec<_> = self
            .publications
            .iter_mut()
            .filter(|(_, timer)| now_ms >= timer.next_at_ms)
            .map(|(key, timer)| {
                timer.next_at_ms = now_ms + timer.period_ms;
                *key
            })
            .collect();
        for (element_index, model_id) in due {
            match self.publish(element_index, model_id, network, now_ms) {
                Ok(Some(outgoing)) => actions.push(AccessAction::Send(outgoing)),
                Ok(None) => {}
                Err(e) => {
                    warn!(element = element_index, model = ?model_id, error = %e, "Periodic publication failed");
                }
            }
        }
        actions
    }

    pub fn next_deadline(&self) -> Option<u64> {
        let scheduled = self.scheduled.iter().map(|s| s.at_ms);
        let contexts = self
            .contexts
            .iter()
            .map(|c| c.retry_at_ms.min(c.timeout_at_ms));
        let publications = self.publications.values().map(|t| t.next_at_ms);
        scheduled.chain(contexts).chain(publications).min()
    }
}

fn check_ttl(ttl: Option<u8>) -> Result<(), AccessError> {
    match ttl {
        Some(1) | Some(128..) => Err(AccessError::InvalidTtl),
        _ => Ok(()),
    }
}

fn check_destination(destination: &MeshAddress) -> Result<(), AccessError> {
    let address = destination.address;
    if address.is_unassigned() || (address.is_virtual() && destination.virtual_label.is_none()) {
        return Err(AccessError::InvalidDestination);
    }
    Ok(())
}
