//! CoAP Messaging Client
//!
//! The request/response layer the secure bridge carries: a CoAP
//! (RFC 7252) header and option codec, and a client that correlates
//! responses to requests by token and dispatches response handlers.
//! The client does not retransmit; reliability belongs to whoever owns
//! the exchange timers.

mod client;
mod codec;
mod header;

use crate::error::SendError;
use crate::message::Message;
use std::net::SocketAddr;
use thiserror::Error;

pub use client::{CoapClient, ResponseHandler};
pub use codec::{option, CoapMessage, CoapOption, RequestBuilder};
pub use header::{
    Code, CoapHeader, MessageType, COAP_VERSION, HEADER_SIZE, MAX_TOKEN_LENGTH, PAYLOAD_MARKER,
};

/// Errors from the CoAP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("malformed CoAP message: {0}")]
    Malformed(String),

    #[error("token too long: {0} > 8 bytes")]
    TokenTooLong(usize),

    #[error("request with token {0} already pending")]
    DuplicateToken(String),

    #[error("option {number} value too long: {len} bytes")]
    OptionTooLong { number: u16, len: usize },

    #[error("request reset by peer")]
    Reset,

    #[error("request aborted")]
    Aborted,
}

/// The send half a messaging client transmits through.
pub trait MessageTransport {
    /// Transmit `message` to `peer`.
    ///
    /// On failure the message is handed back inside the error.
    fn send(&mut self, message: Message, peer: SocketAddr) -> Result<(), SendError>;
}
