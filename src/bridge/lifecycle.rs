//! Bridge lifecycle: connect, disconnect, and stop.

use super::{BridgeState, BridgeTask, ConnectedCallback, PeerBinding, SecureClient};
use crate::error::BridgeError;
use crate::session::{HandshakeRole, SessionEngine};
use crate::transport::DatagramSocket;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

impl<E: SessionEngine, S: DatagramSocket> SecureClient<E, S> {
    /// Bind `peer` and start a client handshake toward it.
    ///
    /// `on_connected` fires once, from [`receive`](Self::receive), when
    /// the engine first reports the session established. Calling this
    /// while a session is active rebinds the peer and callback and then
    /// asks the engine to start; an engine that refuses a second start
    /// returns its error unchanged.
    pub fn connect(
        &mut self,
        peer: SocketAddr,
        on_connected: Option<ConnectedCallback>,
    ) -> Result<(), BridgeError> {
        if self.state.is_active() {
            warn!(
                peer = %peer,
                state = %self.state,
                "Connect called with a session already active"
            );
        }

        self.peer = Some(PeerBinding::new(peer));
        self.connected_callback = on_connected;

        let (engine, mut records) = self.record_queue();
        match engine.start(HandshakeRole::Client, &mut records) {
            Ok(()) => {
                info!(peer = %peer, "Secure session handshake started");
                self.state = BridgeState::Connecting;
                Ok(())
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to start secure session");
                if !self.engine.is_started() {
                    self.state = BridgeState::Disconnected;
                }
                Err(e.into())
            }
        }
    }

    /// Whether a handshake or session is active in the engine.
    pub fn is_connection_started(&self) -> bool {
        self.engine.is_started()
    }

    /// Whether the engine reports the session established.
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Tear down the session.
    ///
    /// The peer binding and any pending ciphertext are kept; a close
    /// record emitted by the engine leaves on the next flush.
    pub fn disconnect(&mut self) -> Result<(), BridgeError> {
        self.connected_callback = None;

        let (engine, mut records) = self.record_queue();
        let result = engine.stop(&mut records);

        if self.state != BridgeState::Idle {
            self.state = BridgeState::Disconnected;
        }
        match &result {
            Ok(()) => info!(peer = ?self.peer(), "Secure session disconnected"),
            Err(e) => debug!(error = %e, "Disconnect with no active session"),
        }
        result.map_err(BridgeError::from)
    }

    /// Stop the bridge.
    ///
    /// Disconnects an active session, frees any pending ciphertext,
    /// aborts pending requests, and forgets the peer. Always succeeds.
    pub fn stop(&mut self) {
        if self.engine.is_started() {
            let (engine, mut records) = self.record_queue();
            if let Err(e) = engine.stop(&mut records) {
                warn!(error = %e, "Session engine stop failed");
            }
        }

        if let Some(message) = self.pending.take() {
            debug!(bytes = message.len(), "Discarding unflushed ciphertext");
            message.free();
        }
        self.tasklets.cancel(BridgeTask::Flush);

        self.client.stop();

        self.connected_callback = None;
        if let Some(peer) = self.peer.take() {
            info!(peer = %peer.addr(), "Secure client stopped");
        }
        self.state = BridgeState::Idle;
    }
}
