//! Application handle to a running manager.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::ManagerError;
use crate::access::{AccessError, AccessRequest, MeshMessage, MessageId};
use crate::model::{Address, KeyIndex, MeshAddress, ModelId};
use crate::proxy::FilterType;

/// Result of sending a message: the response of an acknowledged message,
/// or `None` once an unacknowledged message left the node.
pub type MessageOutcome = Result<Option<Arc<dyn MeshMessage>>, AccessError>;

/// Change requested to the filter of the connected proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyFilterCommand {
    SetType(FilterType),
    Add(BTreeSet<Address>),
    Remove(BTreeSet<Address>),
    /// Back to an empty accept list.
    Reset,
    /// Remove every address, keeping the filter type.
    Clear,
}

/// Commands processed by the event loop.
pub(crate) enum Command {
    Send {
        request: AccessRequest,
        reply: oneshot::Sender<Result<MessageId, AccessError>>,
        outcome: oneshot::Sender<MessageOutcome>,
    },
    SendConfig {
        message: Box<dyn MeshMessage>,
        destination: Address,
        ttl: Option<u8>,
        reply: oneshot::Sender<Result<MessageId, AccessError>>,
        outcome: oneshot::Sender<MessageOutcome>,
    },
    Cancel(MessageId),
    Publish {
        element_index: usize,
        model_id: ModelId,
        reply: oneshot::Sender<Result<bool, AccessError>>,
    },
    ProxyFilter(ProxyFilterCommand),
    Shutdown,
}

/// Cloneable handle for talking to the manager from other tasks.
#[derive(Clone, Debug)]
pub struct MeshHandle {
    tx: mpsc::Sender<Command>,
}

impl MeshHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Send `message` from the Element at `element_index`, secured with
    /// the Application Key `application_key`.
    pub async fn send(
        &self,
        message: impl MeshMessage,
        element_index: usize,
        destination: impl Into<MeshAddress>,
        application_key: KeyIndex,
        ttl: Option<u8>,
    ) -> Result<MessageHandle, ManagerError> {
        self.send_request(AccessRequest {
            message: Box::new(message),
            element_index,
            model: None,
            destination: destination.into(),
            application_key,
            ttl,
        })
        .await
    }

    pub async fn send_request(&self, request: AccessRequest) -> Result<MessageHandle, ManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        let (outcome, outcome_rx) = oneshot::channel();
        self.command(Command::Send {
            request,
            reply,
            outcome,
        })
        .await?;
        let id = reply_rx.await.map_err(|_| ManagerError::NotRunning)??;
        Ok(MessageHandle {
            id,
            tx: self.tx.clone(),
            outcome: outcome_rx,
        })
    }

    /// Send a configuration message to the node at `destination`.
    pub async fn send_config(
        &self,
        message: impl MeshMessage,
        destination: Address,
        ttl: Option<u8>,
    ) -> Result<MessageHandle, ManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        let (outcome, outcome_rx) = oneshot::channel();
        self.command(Command::SendConfig {
            message: Box::new(message),
            destination,
            ttl,
            reply,
            outcome,
        })
        .await?;
        let id = reply_rx.await.map_err(|_| ManagerError::NotRunning)??;
        Ok(MessageHandle {
            id,
            tx: self.tx.clone(),
            outcome: outcome_rx,
        })
    }

    pub async fn cancel(&self, id: MessageId) -> Result<(), ManagerError> {
        self.command(Command::Cancel(id)).await
    }

    /// Publish the state of a Model now.
    pub async fn publish(&self, element_index: usize, model_id: ModelId) -> Result<bool, ManagerError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command(Command::Publish {
            element_index,
            model_id,
            reply,
        })
        .await?;
        Ok(reply_rx.await.map_err(|_| ManagerError::NotRunning)??)
    }

    pub async fn set_proxy_filter_type(&self, filter_type: FilterType) -> Result<(), ManagerError> {
        self.command(Command::ProxyFilter(ProxyFilterCommand::SetType(filter_type)))
            .await
    }

    pub async fn add_to_proxy_filter(&self, addresses: BTreeSet<Address>) -> Result<(), ManagerError> {
        self.command(Command::ProxyFilter(ProxyFilterCommand::Add(addresses)))
            .await
    }

    pub async fn remove_from_proxy_filter(
        &self,
        addresses: BTreeSet<Address>,
    ) -> Result<(), ManagerError> {
        self.command(Command::ProxyFilter(ProxyFilterCommand::Remove(addresses)))
            .await
    }

    pub async fn reset_proxy_filter(&self) -> Result<(), ManagerError> {
        self.command(Command::ProxyFilter(ProxyFilterCommand::Reset)).await
    }

    pub async fn clear_proxy_filter(&self) -> Result<(), ManagerError> {
        self.command(Command::ProxyFilter(ProxyFilterCommand::Clear)).await
    }

    /// Stop the event loop. Outstanding messages resolve as cancelled.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        self.command(Command::Shutdown).await
    }

    async fn command(&self, command: Command) -> Result<(), ManagerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ManagerError::NotRunning)
    }
}

/// A message in flight.
#[derive(Debug)]
pub struct MessageHandle {
    id: MessageId,
    tx: mpsc::Sender<Command>,
    outcome: oneshot::Receiver<MessageOutcome>,
}

impl MessageHandle {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Ask the manager to cancel the message. The outcome then resolves
    /// with [`AccessError::Cancelled`].
    pub fn cancel(&self) {
        let _ = self.tx.try_send(Command::Cancel(self.id));
    }

    /// Wait for the message to complete.
    pub async fn outcome(self) -> MessageOutcome {
        self.outcome.await.unwrap_or(Err(AccessError::Cancelled))
    }
}
