//! Mesh Manager
//!
//! Owns the mesh network state and every protocol layer, and glues them
//! into the receive pipeline (bearer → network → lower → upper → access)
//! and the send pipeline running the other way.
//!
//! The manager is a single-owner state machine. All work happens in
//! [`MeshManager::run`], which selects over bearer events, commands from
//! [`MeshHandle`]s and a periodic tick that fires every due timer through
//! [`MeshManager::poll_timers`]. The synchronous methods take `now_ms`
//! explicitly so the whole pipeline can be driven deterministically.

mod config_server;
mod event;
mod handle;
mod receive;
mod retry;
mod send;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::access::{
    AccessAction, AccessError, AccessLayer, AccessRequest, GenericOnOffClient, GenericOnOffServer,
    MeshMessage, MessageId, ModelDelegate,
};
use crate::bearer::{bearer_channel, now_ms, Bearer, BearerError, BearerEvent, BearerRx};
use crate::config::{Config, ConfigError};
use crate::crypto::CryptoError;
use crate::lower::{LowerTransportLayer, TransferId};
use crate::model::{Address, IvIndexState, KeyIndex, MeshNetwork, ModelId};
use crate::network::{NetworkError, NetworkLayer};
use crate::proxy::ProxyFilter;
use crate::storage::{FileStorage, MemoryStorage, SequenceCounter, Storage, StorageError};
use crate::upper::{HeartbeatPublication, HeartbeatSubscription, UpperTransportLayer};

pub(crate) use handle::Command;
pub use event::MeshEvent;
pub use handle::{MeshHandle, MessageHandle, MessageOutcome, ProxyFilterCommand};
use retry::BearerRetry;

/// Errors related to manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("manager not running")]
    NotRunning,

    #[error("manager already running")]
    AlreadyRunning,

    #[error("mesh network has no local node")]
    NoLocalNode,

    #[error("message of {0} bytes does not fit in 32 segments")]
    MessageTooLong(usize),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("bearer error: {0}")]
    Bearer(#[from] BearerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Manager lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// Created, event loop not started.
    Created,
    Running,
    /// The event loop returned; outstanding messages were cancelled.
    Stopped,
}

impl ManagerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ManagerState::Running)
    }

    pub fn can_start(&self) -> bool {
        matches!(self, ManagerState::Created | ManagerState::Stopped)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ManagerState::Created => "created",
            ManagerState::Running => "running",
            ManagerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Bookkeeping of a message sent by the application.
struct PendingSend {
    opcode: u32,
    destination: Address,
    /// Resolved by a response rather than by delivery to the bearer.
    acknowledged: bool,
    delivered: bool,
    outcome: Option<oneshot::Sender<MessageOutcome>>,
}

/// The mesh engine.
pub struct MeshManager {
    // === Configuration ===
    config: Config,

    // === Network state ===
    network: MeshNetwork,
    iv_state: IvIndexState,
    sequences: SequenceCounter,
    storage: Box<dyn Storage>,

    // === Layers ===
    network_layer: NetworkLayer,
    lower: LowerTransportLayer,
    upper: UpperTransportLayer,
    access: AccessLayer,
    proxy_filter: ProxyFilter,

    // === Bearer ===
    bearer: Option<Box<dyn Bearer>>,
    bearer_rx: Option<BearerRx>,
    /// Sends refused with a transient error, waiting for their backoff.
    bearer_retries: Vec<BearerRetry>,

    // === Outgoing messages ===
    pending: HashMap<MessageId, PendingSend>,
    /// Segmented transfers of the messages they carry.
    transfers: HashMap<TransferId, MessageId>,
    next_transfer_id: TransferId,

    // === Channels ===
    event_tx: mpsc::Sender<MeshEvent>,
    event_rx: Option<mpsc::Receiver<MeshEvent>>,
    command_tx: mpsc::Sender<Command>,
    command_rx: Option<mpsc::Receiver<Command>>,

    state: ManagerState,
}

impl MeshManager {
    /// Create a manager for `network`, restoring the IV Index, sequence
    /// numbers and replay protection records from `storage`.
    pub fn new(
        config: Config,
        mut network: MeshNetwork,
        storage: Box<dyn Storage>,
    ) -> Result<Self, ManagerError> {
        let local = network.local_node().ok_or(ManagerError::NoLocalNode)?;
        let name = local.name.clone();
        let primary = local.primary_address;
        let addresses: Vec<Address> = (0..usize::from(local.element_count()))
            .map(|i| local.element_address(i))
            .collect();

        let iv_state = match storage.iv_index_state() {
            Some(state) => {
                network.set_iv_index(state.iv_index);
                state
            }
            None => IvIndexState {
                iv_index: network.iv_index(),
                ..IvIndexState::default()
            },
        };

        let sequences = SequenceCounter::new();
        for address in addresses {
            if let Some(next) = storage.sequence_number(address) {
                sequences.restore(address, next);
            }
        }

        let mut lower = LowerTransportLayer::new(&config.network.sar);
        lower.restore_replay(storage.replay_records());

        let (event_tx, event_rx) = mpsc::channel(config.manager.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(config.manager.command_buffer.max(1));

        info!(
            name = %name,
            address = %primary,
            iv_index = %iv_state.iv_index,
            "Mesh manager created"
        );

        Ok(Self {
            network_layer: NetworkLayer::new(&config.network),
            lower,
            upper: UpperTransportLayer::new(),
            access: AccessLayer::new(config.network.clone()),
            proxy_filter: ProxyFilter::new(config.manager.proxy_filter.clone()),
            config,
            network,
            iv_state,
            sequences,
            storage,
            bearer: None,
            bearer_rx: None,
            bearer_retries: Vec::new(),
            pending: HashMap::new(),
            transfers: HashMap::new(),
            next_transfer_id: 1,
            event_tx,
            event_rx: Some(event_rx),
            command_tx,
            command_rx: Some(command_rx),
            state: ManagerState::Created,
        })
    }

    /// Build the local node from `config.node` and open the configured
    /// storage.
    pub fn from_config(config: Config) -> Result<Self, ManagerError> {
        let network = config.node.build_network()?;
        let storage: Box<dyn Storage> = match &config.storage.path {
            Some(path) => Box::new(FileStorage::open(path.clone())?),
            None => Box::new(MemoryStorage::new()),
        };
        Self::new(config, network, storage)
    }

    // === Setup ===

    /// Attach the bearer used for sending and the channel it reports
    /// received PDUs on.
    pub fn attach_bearer(&mut self, bearer: Box<dyn Bearer>, events: BearerRx) {
        self.bearer = Some(bearer);
        self.bearer_rx = Some(events);
    }

    /// Register a Model delegate and start its periodic publication.
    pub fn register_model(
        &mut self,
        element_index: usize,
        model_id: ModelId,
        delegate: Box<dyn ModelDelegate>,
        now_ms: u64,
    ) {
        self.access
            .registry_mut()
            .register(element_index, model_id, delegate);
        self.access
            .refresh_publication(element_index, model_id, &self.network, now_ms);
    }

    /// Register the built-in Generic OnOff delegates on every Element that
    /// declares the models.
    pub fn register_default_models(&mut self, now_ms: u64) {
        let declared: Vec<(usize, ModelId)> = self
            .network
            .local_node()
            .map(|node| {
                node.elements
                    .iter()
                    .enumerate()
                    .flat_map(|(i, e)| e.models.iter().map(move |m| (i, m.model_id)))
                    .collect()
            })
            .unwrap_or_default();
        for (element_index, model_id) in declared {
            let delegate: Box<dyn ModelDelegate> = match model_id {
                ModelId::GENERIC_ON_OFF_SERVER => Box::new(GenericOnOffServer::new(false)),
                ModelId::GENERIC_ON_OFF_CLIENT => Box::new(GenericOnOffClient::new()),
                _ => continue,
            };
            debug!(element = element_index, model = ?model_id, "Registering built-in model");
            self.register_model(element_index, model_id, delegate, now_ms);
        }
    }

    /// A handle for sending commands into the event loop.
    pub fn handle(&self) -> MeshHandle {
        MeshHandle::new(self.command_tx.clone())
    }

    /// Take the application event stream. Returns `None` once taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<MeshEvent>> {
        self.event_rx.take()
    }

    // === Accessors ===

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn network(&self) -> &MeshNetwork {
        &self.network
    }

    pub fn access_mut(&mut self) -> &mut AccessLayer {
        &mut self.access
    }

    pub fn proxy_filter(&self) -> &ProxyFilter {
        &self.proxy_filter
    }

    /// Network Key of the connected proxy, if known.
    pub fn proxy_network_key(&self) -> Option<KeyIndex> {
        self.network_layer.proxy_network_key()
    }

    pub fn iv_index_state(&self) -> IvIndexState {
        self.iv_state
    }

    /// Shared handle to the outgoing sequence numbers.
    pub fn sequence_counter(&self) -> SequenceCounter {
        self.sequences.clone()
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn heartbeat_publication(&self) -> Option<&HeartbeatPublication> {
        self.upper.heartbeat_publication()
    }

    pub fn heartbeat_subscription(&self) -> Option<&HeartbeatSubscription> {
        self.upper.heartbeat_subscription()
    }

    /// Number of application messages not yet resolved.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // === Event loop ===

    /// Run the event loop until a shutdown command arrives or the bearer
    /// channel closes.
    ///
    /// Without an attached bearer a dummy channel stands in; holding its
    /// sender keeps it open.
    pub async fn run(&mut self) -> Result<(), ManagerError> {
        if !self.state.can_start() {
            return Err(ManagerError::AlreadyRunning);
        }
        let mut command_rx = self.command_rx.take().ok_or(ManagerError::AlreadyRunning)?;
        let (mut bearer_rx, _bearer_guard) = match self.bearer_rx.take() {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = bearer_channel(1);
                (rx, Some(tx))
            }
        };

        let tick_ms = self.config.manager.tick_interval_ms.max(1);
        let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.state = ManagerState::Running;
        self.access.refresh_all_publications(&self.network, now_ms());
        info!(tick_ms, "Mesh manager running");

        loop {
            tokio::select! {
                event = bearer_rx.recv() => {
                    match event {
                        Some(event) => self.handle_bearer_event(event, now_ms()),
                        None => {
                            info!("Bearer channel closed, stopping");
                            break;
                        }
                    }
                }
                Some(command) = command_rx.recv() => {
                    if !self.handle_command(command, now_ms()) {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.poll_timers(now_ms());
                }
            }
        }

        self.command_rx = Some(command_rx);
        self.shutdown(now_ms());
        Ok(())
    }

    /// Apply a command received from a [`MeshHandle`]. Returns false when
    /// the loop should stop.
    pub(crate) fn handle_command(&mut self, command: Command, now_ms: u64) -> bool {
        match command {
            Command::Send {
                request,
                reply,
                outcome,
            } => {
                let _ = reply.send(self.send(request, Some(outcome), now_ms));
            }
            Command::SendConfig {
                message,
                destination,
                ttl,
                reply,
                outcome,
            } => {
                let result = self.send_config(message, destination, ttl, Some(outcome), now_ms);
                let _ = reply.send(result);
            }
            Command::Cancel(id) => self.cancel(id, now_ms),
            Command::Publish {
                element_index,
                model_id,
                reply,
            } => {
                let _ = reply.send(self.publish(element_index, model_id, now_ms));
            }
            Command::ProxyFilter(command) => self.configure_proxy_filter(command, now_ms),
            Command::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Process an event reported by the bearer.
    pub fn handle_bearer_event(&mut self, event: BearerEvent, now_ms: u64) {
        match event {
            BearerEvent::Opened => info!("Bearer opened"),
            BearerEvent::Pdu { pdu_type, data, .. } => self.handle_pdu(pdu_type, &data, now_ms),
            BearerEvent::Closed => {
                info!("Bearer closed");
                self.network_layer.clear_proxy_network_key();
                self.network_layer.cancel_repeats();
                self.proxy_filter.proxy_disconnected();
                self.abandon_bearer_retries();
            }
        }
    }

    // === Timers ===

    /// Fire every timer due at `now_ms`.
    pub fn poll_timers(&mut self, now_ms: u64) {
        self.process_bearer_retries(now_ms);

        for pdu in self.network_layer.poll_repeats(now_ms) {
            if let Some(bearer) = &self.bearer
                && let Err(e) = bearer.send(&pdu, crate::bearer::PduType::NetworkPdu)
            {
                trace!(error = %e, "Network Transmit repetition dropped");
            }
        }

        let actions = self.lower.poll(now_ms);
        self.process_lower_actions(actions, now_ms);

        if let Some(due) = self.upper.poll(now_ms) {
            self.send_heartbeat(due, now_ms);
        }

        let lower = &self.lower;
        let actions = self
            .access
            .poll(&self.network, now_ms, |destination| lower.is_busy(destination));
        self.process_access_actions(actions, now_ms);

        self.network_layer.purge_cache(now_ms);
    }

    /// Earliest pending deadline across all layers.
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.network_layer.next_deadline(),
            self.lower.next_deadline(),
            self.upper.next_deadline(),
            self.access.next_deadline(),
            self.bearer_retries.iter().map(|r| r.retry_after_ms).min(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn process_access_actions(&mut self, actions: Vec<AccessAction>, now_ms: u64) {
        for action in actions {
            match action {
                AccessAction::Send(outgoing) => self.dispatch_access(outgoing, now_ms),
                AccessAction::Timeout { id, .. } => {
                    self.cancel_transfers(id, now_ms);
                    self.fail(id, AccessError::Timeout);
                }
            }
        }
    }

    // === Sending ===

    /// Send an application message.
    ///
    /// `outcome` resolves with the response of an acknowledged message, or
    /// with `None` once an unacknowledged message was handed to the bearer.
    pub fn send(
        &mut self,
        request: AccessRequest,
        outcome: Option<oneshot::Sender<MessageOutcome>>,
        now_ms: u64,
    ) -> Result<MessageId, AccessError> {
        let outgoing = self.access.send(request, &self.network, now_ms)?;
        Ok(self.start(outgoing, outcome, now_ms))
    }

    /// Send a configuration message secured with the destination's Device
    /// Key.
    pub fn send_config(
        &mut self,
        message: Box<dyn MeshMessage>,
        destination: Address,
        ttl: Option<u8>,
        outcome: Option<oneshot::Sender<MessageOutcome>>,
        now_ms: u64,
    ) -> Result<MessageId, AccessError> {
        let outgoing = self
            .access
            .send_config(message, destination, ttl, &self.network, now_ms)?;
        Ok(self.start(outgoing, outcome, now_ms))
    }

    /// Publish the current state of a Model now. Returns false when the
    /// Model had nothing to publish.
    pub fn publish(
        &mut self,
        element_index: usize,
        model_id: ModelId,
        now_ms: u64,
    ) -> Result<bool, AccessError> {
        match self
            .access
            .publish(element_index, model_id, &self.network, now_ms)?
        {
            Some(outgoing) => {
                self.start(outgoing, None, now_ms);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel a message. Its outcome resolves with
    /// [`AccessError::Cancelled`]; cancelling again does nothing.
    pub fn cancel(&mut self, id: MessageId, now_ms: u64) {
        self.access.cancel(id);
        self.cancel_transfers(id, now_ms);
        self.bearer_retries.retain(|r| r.message != Some(id));
        if self.pending.contains_key(&id) {
            debug!(id, "Message cancelled");
            self.fail(id, AccessError::Cancelled);
        }
    }

    /// Cancel every outstanding message and stop all transfers.
    pub fn shutdown(&mut self, now_ms: u64) {
        self.access.cancel_all();
        let ids: Vec<MessageId> = self.pending.keys().copied().collect();
        for id in ids {
            self.fail(id, AccessError::Cancelled);
        }
        let _ = self.lower.clear();
        self.transfers.clear();
        self.network_layer.cancel_repeats();
        self.bearer_retries.clear();
        self.network_layer.purge_cache(now_ms);
        self.state = ManagerState::Stopped;
        info!("Mesh manager stopped");
    }

    fn start(
        &mut self,
        outgoing: crate::access::OutgoingAccess,
        outcome: Option<oneshot::Sender<MessageOutcome>>,
        now_ms: u64,
    ) -> MessageId {
        let id = outgoing.id;
        self.pending.insert(
            id,
            PendingSend {
                opcode: outgoing.opcode,
                destination: outgoing.destination.address,
                acknowledged: self.access.is_pending(id),
                delivered: false,
                outcome,
            },
        );
        self.dispatch_access(outgoing, now_ms);
        id
    }

    fn cancel_transfers(&mut self, id: MessageId, now_ms: u64) {
        let transfers: Vec<TransferId> = self
            .transfers
            .iter()
            .filter(|(_, message)| **message == id)
            .map(|(transfer, _)| *transfer)
            .collect();
        for transfer in transfers {
            self.transfers.remove(&transfer);
            let _ = self.lower.cancel(transfer, now_ms);
        }
    }

    // === Outcomes ===

    fn emit(&self, event: MeshEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            trace!(error = %e, "Application event dropped");
        }
    }

    /// The message was handed to the bearer or looped back.
    fn delivered(&mut self, id: MessageId) {
        let Some(pending) = self.pending.get_mut(&id) else {
            return;
        };
        if pending.delivered {
            return;
        }
        pending.delivered = true;
        let (opcode, destination, acknowledged) =
            (pending.opcode, pending.destination, pending.acknowledged);
        self.emit(MeshEvent::MessageDelivered {
            id,
            opcode,
            destination,
        });
        if !acknowledged
            && let Some(pending) = self.pending.remove(&id)
            && let Some(outcome) = pending.outcome
        {
            let _ = outcome.send(Ok(None));
        }
    }

    /// A response to the acknowledged message `id` arrived. A transfer
    /// still carrying the request is stopped.
    fn resolve(&mut self, id: MessageId, response: Arc<dyn MeshMessage>, now_ms: u64) {
        self.cancel_transfers(id, now_ms);
        if let Some(pending) = self.pending.remove(&id)
            && let Some(outcome) = pending.outcome
        {
            let _ = outcome.send(Ok(Some(response)));
        }
    }

    fn fail(&mut self, id: MessageId, error: AccessError) {
        let Some(pending) = self.pending.remove(&id) else {
            return;
        };
        self.transfers.retain(|_, message| *message != id);
        if let Some(outcome) = pending.outcome {
            let _ = outcome.send(Err(error));
        }
        self.emit(MeshEvent::DeliveryFailed {
            id,
            opcode: pending.opcode,
            destination: pending.destination,
            error,
        });
    }

    /// Default TTL of the local node.
    fn default_ttl(&self) -> u8 {
        self.network
            .local_node()
            .and_then(|n| n.default_ttl)
            .unwrap_or_else(|| self.config.network.ttl())
    }
}
