//! Model delegates.
//!
//! A delegate implements the behaviour of one Model on a local Element:
//! it decodes the opcodes it supports, answers acknowledged requests and
//! composes periodic publications.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::message::MeshMessage;
use super::messages::generic_onoff::{
    GENERIC_ON_OFF_GET, GENERIC_ON_OFF_SET, GENERIC_ON_OFF_SET_UNACKNOWLEDGED, GENERIC_ON_OFF_STATUS,
};
use super::messages::{
    decode_as, GenericOnOffGet, GenericOnOffSet, GenericOnOffSetUnacknowledged,
    GenericOnOffStatus, OnOffSetParameters, OnOffTransition, Transition, TransitionTime,
};
use super::transaction::LastTransaction;
use crate::model::{Address, MeshAddress, ModelId};
use crate::upper::KeySet;

/// Where a message came from and how it was secured.
#[derive(Clone, Debug)]
pub struct MessageContext {
    pub source: Address,
    pub destination: MeshAddress,
    pub key_set: KeySet,
    /// Local Element the receiving Model belongs to.
    pub element_index: usize,
    pub now_ms: u64,
}

/// Behaviour of a local Model.
pub trait ModelDelegate: Send {
    /// Opcodes this Model can receive.
    fn opcodes(&self) -> &[u32];

    fn decode(&self, opcode: u32, parameters: &[u8]) -> Option<Arc<dyn MeshMessage>>;

    /// Configuration-style Models only accept Device Key traffic.
    fn requires_device_key(&self) -> bool {
        false
    }

    /// Answer an acknowledged request. `None` suppresses the response.
    fn handle_acknowledged(
        &mut self,
        request: &dyn MeshMessage,
        context: &MessageContext,
    ) -> Option<Arc<dyn MeshMessage>>;

    fn handle_unacknowledged(&mut self, _message: &dyn MeshMessage, _context: &MessageContext) {}

    /// A response to a request this node sent. `request` is `None` for
    /// unsolicited responses.
    fn handle_response(
        &mut self,
        response: &dyn MeshMessage,
        _request: Option<&dyn MeshMessage>,
        context: &MessageContext,
    ) {
        self.handle_unacknowledged(response, context);
    }

    /// Message to send when the Model's publication period elapses.
    fn compose_publication(&mut self, _now_ms: u64) -> Option<Arc<dyn MeshMessage>> {
        None
    }
}

// ============================================================================
// Registry
// ============================================================================

pub(crate) struct RegisteredModel {
    pub element_index: usize,
    pub model_id: ModelId,
    pub delegate: Box<dyn ModelDelegate>,
}

impl fmt::Debug for RegisteredModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredModel")
            .field("element", &self.element_index)
            .field("model", &self.model_id)
            .field("opcodes", &self.delegate.opcodes().len())
            .finish()
    }
}

/// Delegates of the local node, in registration order.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<RegisteredModel>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `delegate` for a Model. Replaces an existing registration
    /// of the same Model on the same Element.
    pub fn register(&mut self, element_index: usize, model_id: ModelId, delegate: Box<dyn ModelDelegate>) {
        if let Some(existing) = self
            .models
            .iter_mut()
            .find(|m| m.element_index == element_index && m.model_id == model_id)
        {
            debug!(element = element_index, model = ?model_id, "Replacing model delegate");
            existing.delegate = delegate;
            return;
        }
        self.models.push(RegisteredModel {
            element_index,
            model_id,
            delegate,
        });
    }

    pub fn unregister(&mut self, element_index: usize, model_id: ModelId) -> bool {
        let before = self.models.len();
        self.models
            .retain(|m| !(m.element_index == element_index && m.model_id == model_id));
        self.models.len() != before
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisteredModel> {
        self.models.iter_mut()
    }

    pub(crate) fn get_mut(&mut self, element_index: usize, model_id: ModelId) -> Option<&mut RegisteredModel> {
        self.models
            .iter_mut()
            .find(|m| m.element_index == element_index && m.model_id == model_id)
    }
}

// ============================================================================
// Generic OnOff
// ============================================================================

/// Generic OnOff state, shared between the server delegate and the
/// application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OnOffState {
    pub present: bool,
    /// Target state and the time it is reached.
    pub target: Option<(bool, u64)>,
}

impl OnOffState {
    /// Settle a transition whose end time has passed.
    fn settle(&mut self, now_ms: u64) {
        if let Some((target, at)) = self.target
            && now_ms >= at
        {
            self.present = target;
            self.target = None;
        }
    }

    fn status(&self, now_ms: u64) -> GenericOnOffStatus {
        match self.target {
            Some((target, at)) => GenericOnOffStatus {
                present: self.present,
                transition: OnOffTransition::InProgress {
                    target,
                    remaining: TransitionTime::from_ms(at.saturating_sub(now_ms)),
                },
            },
            None => GenericOnOffStatus::new(self.present),
        }
    }
}

/// Generic OnOff Server.
pub struct GenericOnOffServer {
    state: Arc<Mutex<OnOffState>>,
    last_transaction: LastTransaction,
}

impl GenericOnOffServer {
    const OPCODES: [u32; 3] = [GENERIC_ON_OFF_GET, GENERIC_ON_OFF_SET, GENERIC_ON_OFF_SET_UNACKNOWLEDGED];

    pub fn new(initial: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(OnOffState {
                present: initial,
                target: None,
            })),
            last_transaction: LastTransaction::default(),
        }
    }

    /// Handle to the state, readable after the delegate is registered.
    pub fn state(&self) -> Arc<Mutex<OnOffState>> {
        Arc::clone(&self.state)
    }

    fn apply(&mut self, set: &OnOffSetParameters, context: &MessageContext) {
        let tid = set.tid.unwrap_or(0);
        if !self.last_transaction.is_new(
            context.source,
            context.destination.address,
            tid,
            context.now_ms,
        ) {
            debug!(src = %context.source, tid, "Repeated OnOff transaction ignored");
            return;
        }
        let mut state = self.state.lock();
        state.settle(context.now_ms);
        match set.transition {
            Transition::Timed { time, delay } if time.as_ms().is_some_and(|ms| ms > 0) => {
                let duration = time.as_ms().unwrap_or(0) + u64::from(delay) * 5;
                state.target = Some((set.on, context.now_ms + duration));
            }
            _ => {
                state.present = set.on;
                state.target = None;
            }
        }
    }

    fn status(&self, now_ms: u64) -> GenericOnOffStatus {
        let mut state = self.state.lock();
        state.settle(now_ms);
        state.status(now_ms)
    }
}

impl ModelDelegate for GenericOnOffServer {
    fn opcodes(&self) -> &[u32] {
        &Self::OPCODES
    }

    fn decode(&self, opcode: u32, parameters: &[u8]) -> Option<Arc<dyn MeshMessage>> {
        decode_as::<GenericOnOffGet>(opcode, parameters)
            .or_else(|| decode_as::<GenericOnOffSet>(opcode, parameters))
            .or_else(|| decode_as::<GenericOnOffSetUnacknowledged>(opcode, parameters))
    }

    fn handle_acknowledged(
        &mut self,
        request: &dyn MeshMessage,
        context: &MessageContext,
    ) -> Option<Arc<dyn MeshMessage>> {
        if let Some(set) = request.downcast_ref::<GenericOnOffSet>() {
            self.apply(&set.0, context);
        }
        Some(Arc::new(self.status(context.now_ms)) as Arc<dyn MeshMessage>)
    }

    fn handle_unacknowledged(&mut self, message: &dyn MeshMessage, context: &MessageContext) {
        if let Some(set) = message.downcast_ref::<GenericOnOffSetUnacknowledged>() {
            self.apply(&set.0, context);
        }
    }

    fn compose_publication(&mut self, now_ms: u64) -> Option<Arc<dyn MeshMessage>> {
        Some(Arc::new(self.status(now_ms)) as Arc<dyn MeshMessage>)
    }
}

/// Generic OnOff Client: tracks the last reported status.
#[derive(Default)]
pub struct GenericOnOffClient {
    last_status: Arc<Mutex<Option<(Address, GenericOnOffStatus)>>>,
}

impl GenericOnOffClient {
    const OPCODES: [u32; 1] = [GENERIC_ON_OFF_STATUS];

    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the last status received and its sender.
    pub fn last_status(&self) -> Arc<Mutex<Option<(Address, GenericOnOffStatus)>>> {
        Arc::clone(&self.last_status)
    }
}

impl ModelDelegate for GenericOnOffClient {
    fn opcodes(&self) -> &[u32] {
        &Self::OPCODES
    }

    fn decode(&self, opcode: u32, parameters: &[u8]) -> Option<Arc<dyn MeshMessage>> {
        decode_as::<GenericOnOffStatus>(opcode, parameters)
    }

    fn handle_acknowledged(
        &mut self,
        _request: &dyn MeshMessage,
        _context: &MessageContext,
    ) -> Option<Arc<dyn MeshMessage>> {
        None
    }

    fn handle_unacknowledged(&mut self, message: &dyn MeshMessage, context: &MessageContext) {
        if let Some(status) = message.downcast_ref::<GenericOnOffStatus>() {
            *self.last_status.lock() = Some((context.source, *status));
        }
    }
}
