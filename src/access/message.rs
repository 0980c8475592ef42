//! Message traits.

use std::any::Any;
use std::fmt;

/// How a message takes part in request/response exchanges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A request answered by the message with `response_opcode`.
    Acknowledged { response_opcode: u32 },
    Unacknowledged,
    /// Status sent in reply to an acknowledged request.
    Response,
}

/// TransMIC size requested by a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Security {
    /// 32-bit TransMIC.
    #[default]
    Low,
    /// 64-bit TransMIC when the message is segmented.
    High,
}

/// An Access Layer message.
pub trait MeshMessage: fmt::Debug + Send + Sync + 'static {
    fn opcode(&self) -> u32;

    /// Encoded parameters, without the opcode.
    fn parameters(&self) -> Vec<u8>;

    fn kind(&self) -> MessageKind;

    fn security(&self) -> Security {
        Security::Low
    }

    /// Force segmentation even when the payload fits one segment.
    fn is_segmented(&self) -> bool {
        false
    }

    /// Sent with a Device Key.
    fn requires_device_key(&self) -> bool {
        false
    }

    /// TID slot of transaction messages; `None` for other messages.
    fn tid_mut(&mut self) -> Option<&mut Option<u8>> {
        None
    }

    /// Reuse the TID of the active transaction instead of starting a new one.
    fn continues_transaction(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

impl dyn MeshMessage {
    pub fn is<T: MeshMessage>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: MeshMessage>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn response_opcode(&self) -> Option<u32> {
        match self.kind() {
            MessageKind::Acknowledged { response_opcode } => Some(response_opcode),
            _ => None,
        }
    }
}

/// A message type with a fixed opcode that can be decoded from parameters.
pub trait StaticMessage: MeshMessage + Sized {
    const OPCODE: u32;

    /// Decode parameters, rejecting any length the message does not define.
    fn decode(parameters: &[u8]) -> Option<Self>;
}

/// A message no model recognised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownMessage {
    pub opcode: u32,
    pub parameters: Vec<u8>,
}

impl MeshMessage for UnknownMessage {
    fn opcode(&self) -> u32 {
        self.opcode
    }

    fn parameters(&self) -> Vec<u8> {
        self.parameters.clone()
    }

    fn kind(&self) -> MessageKind {
        MessageKind::Unacknowledged
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
