//! Inbound pipeline: peer filter, decryption, CoAP dispatch.

use super::outbound::RecordQueue;
use super::{BridgeState, SecureClient};
use crate::coap::CoapClient;
use crate::message::{Message, MessageError};
use crate::session::{RecordSink, SessionEngine, SessionSink};
use crate::transport::{DatagramSocket, ReceivedPacket};
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

/// Everything the engine may touch while processing one datagram.
struct SessionIo<'a> {
    records: RecordQueue<'a>,
    client: &'a mut CoapClient,
    peer: SocketAddr,
}

impl RecordSink for SessionIo<'_> {
    fn send_record(&mut self, record: &[u8]) -> Result<(), MessageError> {
        self.records.send_record(record)
    }
}

impl SessionSink for SessionIo<'_> {
    fn deliver(&mut self, plaintext: &[u8]) {
        let mut message = match self.records.pool.new_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(bytes = plaintext.len(), error = %e, "No buffer for decrypted message");
                self.records.stats.inbound_alloc_failures += 1;
                return;
            }
        };

        if let Err(e) = message.append(plaintext) {
            warn!(bytes = plaintext.len(), error = %e, "Decrypted message too large");
            self.records.stats.inbound_append_failures += 1;
            message.free();
            return;
        }

        trace!(peer = %self.peer, bytes = plaintext.len(), "Delivering decrypted message");
        self.client.process_received_message(&message, self.peer);
        self.records.stats.messages_delivered += 1;
        message.free();
    }
}

impl<E: SessionEngine, S: DatagramSocket> SecureClient<E, S> {
    /// Process a datagram received from `sender`.
    ///
    /// Datagrams from anyone but the bound peer are dropped without
    /// reaching the engine. Bytes from the message's read offset onward
    /// go to the engine; decrypted application data is dispatched to the
    /// CoAP client. The connected callback fires here, once.
    pub fn receive(&mut self, message: &Message, sender: SocketAddr) {
        let peer = match self.peer {
            Some(peer) if peer.matches(sender) => peer,
            _ => {
                trace!(sender = %sender, "Dropping datagram from foreign sender");
                self.stats.foreign_datagrams += 1;
                return;
            }
        };
        self.stats.datagrams_accepted += 1;

        let mut io = SessionIo {
            records: RecordQueue {
                pending: &mut self.pending,
                pool: &self.pool,
                tasklets: &mut self.tasklets,
                stats: &mut self.stats,
            },
            client: &mut self.client,
            peer: peer.addr(),
        };
        self.engine.receive(message.payload(), &mut io);

        self.update_session_state();
    }

    /// Copy a packet from the socket into a message and process it.
    pub fn handle_datagram(&mut self, packet: ReceivedPacket) {
        let message = match self.pool.message_from(&packet.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    sender = %packet.remote_addr,
                    bytes = packet.data.len(),
                    error = %e,
                    "No buffer for received datagram"
                );
                self.stats.inbound_alloc_failures += 1;
                return;
            }
        };
        self.receive(&message, packet.remote_addr);
        message.free();
    }

    /// Follow the engine's state after it processed a datagram.
    fn update_session_state(&mut self) {
        if self.engine.is_connected() {
            if self.state != BridgeState::Connected {
                info!(peer = ?self.peer(), "Secure session established");
                self.state = BridgeState::Connected;
            }
            if let Some(callback) = self.connected_callback.take() {
                debug!("Invoking connected callback");
                callback();
            }
        } else if !self.engine.is_started() && self.state.is_active() {
            info!(peer = ?self.peer(), state = %self.state, "Secure session closed");
            self.state = BridgeState::Disconnected;
            self.connected_callback = None;
        }
    }
}
