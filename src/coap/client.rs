//! Request/response correlation.

use super::codec::CoapMessage;
use super::header::{CoapHeader, MessageType};
use super::{ClientError, MessageTransport};
use crate::error::SendError;
use crate::message::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Callback invoked once with the response to a request.
///
/// The message is only borrowed for the duration of the call.
pub type ResponseHandler = Box<dyn FnOnce(Result<&Message, ClientError>) + Send>;

struct PendingRequest {
    message_id: u16,
    peer: SocketAddr,
    handler: ResponseHandler,
}

/// A CoAP client that matches responses to outstanding requests.
///
/// Transmission goes through whatever [`MessageTransport`] the caller
/// hands in, so the same client works over a plain or secured link.
#[derive(Default)]
pub struct CoapClient {
    pending: HashMap<Vec<u8>, PendingRequest>,
}

impl CoapClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Send an encoded CoAP message to `peer`.
    ///
    /// With a handler, the request stays pending until a response with
    /// the same token arrives, the peer resets it, or the client stops.
    /// Ownership of `message` passes to `transport` on success and comes
    /// back inside the error on failure.
    pub fn send_message(
        &mut self,
        message: Message,
        peer: SocketAddr,
        handler: Option<ResponseHandler>,
        transport: &mut dyn MessageTransport,
    ) -> Result<(), SendError> {
        let header = match CoapHeader::parse(message.payload()) {
            Ok((header, _)) => header,
            Err(e) => return Err(SendError::new(e, message)),
        };

        if handler.is_some() && self.pending.contains_key(&header.token) {
            return Err(SendError::new(
                ClientError::DuplicateToken(header.token_hex()),
                message,
            ));
        }

        transport.send(message, peer)?;

        trace!(
            peer = %peer,
            message_type = %header.message_type,
            code = %header.code,
            message_id = header.message_id,
            token = %header.token_hex(),
            "CoAP message sent"
        );

        if let Some(handler) = handler {
            self.pending.insert(
                header.token,
                PendingRequest {
                    message_id: header.message_id,
                    peer,
                    handler,
                },
            );
        }
        Ok(())
    }

    /// Process a decrypted inbound CoAP message from `peer`.
    pub fn process_received_message(&mut self, message: &Message, peer: SocketAddr) {
        let parsed = match CoapMessage::parse(message.payload()) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping malformed CoAP message");
                return;
            }
        };
        let header = &parsed.header;

        if header.message_type == MessageType::Reset {
            let token = self
                .pending
                .iter()
                .find(|(_, p)| p.message_id == header.message_id && same_peer(p.peer, peer))
                .map(|(token, _)| token.clone());
            match token.and_then(|t| self.pending.remove(&t)) {
                Some(request) => {
                    debug!(peer = %peer, message_id = header.message_id, "Request reset by peer");
                    (request.handler)(Err(ClientError::Reset));
                }
                None => trace!(message_id = header.message_id, "Reset for unknown exchange"),
            }
            return;
        }

        if header.code.is_empty() {
            // Separate response follows later under the same token
            trace!(message_id = header.message_id, "Empty acknowledgment");
            return;
        }

        if !header.code.is_response() {
            debug!(
                peer = %peer,
                code = %header.code,
                "Ignoring inbound request, no server role"
            );
            return;
        }

        let matches = self
            .pending
            .get(&header.token)
            .is_some_and(|p| same_peer(p.peer, peer));
        if !matches {
            debug!(
                peer = %peer,
                token = %header.token_hex(),
                "Response matches no pending request"
            );
            return;
        }

        if let Some(request) = self.pending.remove(&header.token) {
            debug!(
                peer = %peer,
                code = %header.code,
                token = %header.token_hex(),
                "Response received"
            );
            (request.handler)(Ok(message));
        }
    }

    /// Abort every pending request.
    pub fn stop(&mut self) {
        for (_, request) in self.pending.drain() {
            (request.handler)(Err(ClientError::Aborted));
        }
    }
}

fn same_peer(a: SocketAddr, b: SocketAddr) -> bool {
    a.ip() == b.ip() && a.port() == b.port()
}
