//! Bridge error kinds.

use crate::coap::ClientError;
use crate::message::{Message, MessageError};
use crate::session::SessionError;
use thiserror::Error;

/// Errors returned by the secure bridge.
///
/// Engine and base-client errors are carried through unchanged.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid state: session not connected")]
    InvalidState,

    #[error("no buffers available")]
    NoBufs,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<MessageError> for BridgeError {
    fn from(_: MessageError) -> Self {
        BridgeError::NoBufs
    }
}

/// A failed send that hands the unsent message back to the caller.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SendError {
    error: BridgeError,
    message: Message,
}

impl SendError {
    /// Pair an error with the message that was not sent.
    pub fn new(error: impl Into<BridgeError>, message: Message) -> Self {
        Self {
            error: error.into(),
            message,
        }
    }

    /// The reason the send failed.
    pub fn error(&self) -> &BridgeError {
        &self.error
    }

    /// The unsent message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Take back ownership of the unsent message.
    pub fn into_message(self) -> Message {
        self.message
    }

    /// Split into the error and the unsent message.
    pub fn into_parts(self) -> (BridgeError, Message) {
        (self.error, self.message)
    }
}
