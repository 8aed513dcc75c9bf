//! Outbound pipeline: CoAP message to encrypted session to pending
//! datagram to socket.

use super::{BridgeStats, BridgeTask, SecureClient};
use crate::coap::{MessageTransport, ResponseHandler};
use crate::error::{BridgeError, SendError};
use crate::message::{Message, MessageError, MessagePool};
use crate::session::{RecordSink, SessionEngine};
use crate::tasklet::TaskletQueue;
use crate::transport::DatagramSocket;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use super::MAX_MESSAGE_LENGTH;

/// Accumulates engine output into the single pending message.
pub(super) struct RecordQueue<'a> {
    pub(super) pending: &'a mut Option<Message>,
    pub(super) pool: &'a MessagePool,
    pub(super) tasklets: &'a mut TaskletQueue<BridgeTask>,
    pub(super) stats: &'a mut BridgeStats,
}

impl RecordSink for RecordQueue<'_> {
    fn send_record(&mut self, record: &[u8]) -> Result<(), MessageError> {
        let message = match self.pending {
            Some(message) => message,
            None => {
                let mut message = self.pool.new_message().map_err(|e| {
                    warn!(error = %e, "No buffer for outbound ciphertext");
                    self.stats.record_failures += 1;
                    e
                })?;
                // Already encrypted above the link layer
                message.set_link_security_enabled(false);
                self.pending.insert(message)
            }
        };

        if let Err(e) = message.append(record) {
            warn!(
                bytes = record.len(),
                pending = message.len(),
                error = %e,
                "Pending datagram cannot hold record, discarding"
            );
            self.stats.record_failures += 1;
            if let Some(message) = self.pending.take() {
                message.free();
            }
            return Err(e);
        }

        self.stats.records_queued += 1;
        if self.tasklets.post(BridgeTask::Flush) {
            trace!(bytes = record.len(), "Flush posted");
        }
        Ok(())
    }
}

/// The send hook the CoAP client transmits through.
pub(super) struct SecureTransport<'a, E: SessionEngine> {
    pub(super) engine: &'a mut E,
    pub(super) records: RecordQueue<'a>,
    pub(super) max_message_length: usize,
}

impl<E: SessionEngine> MessageTransport for SecureTransport<'_, E> {
    fn send(&mut self, message: Message, _peer: SocketAddr) -> Result<(), SendError> {
        let length = message.len();
        if length > self.max_message_length {
            debug!(
                bytes = length,
                max = self.max_message_length,
                "Outbound message exceeds scratch buffer"
            );
            return Err(SendError::new(BridgeError::NoBufs, message));
        }

        let mut scratch = [0u8; MAX_MESSAGE_LENGTH];
        let copied = message.read(0, &mut scratch[..length]);

        if let Err(e) = self.engine.send(&scratch[..copied], &mut self.records) {
            debug!(bytes = copied, error = %e, "Session engine rejected message");
            return Err(SendError::new(e, message));
        }

        trace!(bytes = copied, "Message handed to session engine");
        message.free();
        Ok(())
    }
}

impl<E: SessionEngine, S: DatagramSocket> SecureClient<E, S> {
    /// Send a CoAP request to the bound peer over the secure session.
    ///
    /// Fails with `InvalidState` unless the session is connected. On any
    /// failure the message is handed back inside the error.
    pub fn send_message(
        &mut self,
        message: Message,
        handler: Option<ResponseHandler>,
    ) -> Result<(), SendError> {
        let peer = match self.peer {
            Some(peer) if self.engine.is_connected() => peer.addr(),
            _ => return Err(SendError::new(BridgeError::InvalidState, message)),
        };

        let mut transport = SecureTransport {
            engine: &mut self.engine,
            records: RecordQueue {
                pending: &mut self.pending,
                pool: &self.pool,
                tasklets: &mut self.tasklets,
                stats: &mut self.stats,
            },
            max_message_length: self.max_message_length,
        };
        self.client
            .send_message(message, peer, handler, &mut transport)
    }

    /// Encrypt one already-encoded message and queue the ciphertext.
    ///
    /// This is the transport hook the CoAP client uses; it is exposed for
    /// callers that do their own message correlation. `peer` is ignored,
    /// the session has exactly one.
    pub fn send(&mut self, message: Message, peer: SocketAddr) -> Result<(), SendError> {
        let max_message_length = self.max_message_length;
        let (engine, records) = self.record_queue();
        SecureTransport {
            engine,
            records,
            max_message_length,
        }
        .send(message, peer)
    }

    /// Run the tasklets posted before this call.
    ///
    /// Returns the number run.
    pub fn run_tasklets(&mut self) -> usize {
        let batch = self.tasklets.take_batch();
        for task in &batch {
            match task {
                BridgeTask::Flush => self.flush(),
            }
        }
        batch.len()
    }

    /// Whether deferred work is waiting.
    pub fn has_pending_tasklets(&self) -> bool {
        !self.tasklets.is_empty()
    }

    /// Hand the pending message to the socket and free it.
    fn flush(&mut self) {
        let Some(message) = self.pending.take() else {
            warn!(error = %BridgeError::NoBufs, "Flush found no pending datagram");
            self.stats.empty_flushes += 1;
            return;
        };

        match self.peer {
            Some(peer) => match self.socket.send_to(&message, peer.addr()) {
                Ok(bytes) => {
                    debug!(peer = %peer.addr(), bytes, "Datagram sent");
                    self.stats.datagrams_sent += 1;
                    self.stats.bytes_sent += bytes as u64;
                }
                Err(e) => {
                    warn!(
                        peer = %peer.addr(),
                        bytes = message.len(),
                        error = %e,
                        "Datagram send failed"
                    );
                    self.stats.transmit_failures += 1;
                }
            },
            None => {
                warn!(bytes = message.len(), "No peer bound, dropping datagram");
                self.stats.transmit_failures += 1;
            }
        }

        message.free();
    }
}
