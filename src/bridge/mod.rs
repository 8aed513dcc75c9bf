//! Secure Session Bridge
//!
//! Carries CoAP request/response traffic with a single peer over an
//! encrypted session layered on an unreliable datagram socket.
//!
//! ## Data Flow
//!
//! ```text
//!   send_message ─► CoapClient ─► send hook ─► engine.send
//!                                                  │ send_record (1..n)
//!                                                  ▼
//!                                   pending message ──► flush tasklet ─► socket
//!
//!   socket ─► receive (peer filter) ─► engine.receive
//!                                          │ deliver
//!                                          ▼
//!                        CoapClient::process_received_message
//! ```
//!
//! Ciphertext produced between two flushes accumulates in one pending
//! message and leaves as one datagram. The flush always frees that
//! message, whether or not the socket accepted it.

mod inbound;
mod lifecycle;
mod outbound;

use crate::coap::CoapClient;
use crate::config::BridgeConfig;
use crate::message::{Message, MessagePool};
use crate::session::SessionEngine;
use crate::tasklet::TaskletQueue;
use crate::transport::DatagramSocket;
use std::fmt;
use std::net::SocketAddr;

use outbound::RecordQueue;

/// Ceiling on the plaintext length of one outbound application message.
pub const MAX_MESSAGE_LENGTH: usize = 1232;

/// One-shot notification that the handshake completed.
pub type ConnectedCallback = Box<dyn FnOnce() + Send>;

/// Bridge lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// No peer bound.
    Idle,
    /// Handshake started toward the bound peer.
    Connecting,
    /// Engine reports the session established.
    Connected,
    /// Session torn down or handshake failed; peer still bound.
    Disconnected,
}

impl BridgeState {
    /// Whether a handshake or session is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, BridgeState::Connecting | BridgeState::Connected)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Idle => "idle",
            BridgeState::Connecting => "connecting",
            BridgeState::Connected => "connected",
            BridgeState::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// The remote endpoint of the current or attempted session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerBinding {
    addr: SocketAddr,
}

impl PeerBinding {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether `sender` has the bound address and port.
    ///
    /// IPv6 flow info and scope id are not compared.
    pub fn matches(&self, sender: SocketAddr) -> bool {
        self.addr.ip() == sender.ip() && self.addr.port() == sender.port()
    }
}

/// Work deferred to the next [`SecureClient::run_tasklets`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeTask {
    /// Hand the pending message to the socket.
    Flush,
}

/// Bridge counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Datagrams accepted by the socket.
    pub datagrams_sent: u64,
    /// Bytes accepted by the socket.
    pub bytes_sent: u64,
    /// Flushes whose socket send failed.
    pub transmit_failures: u64,
    /// Flushes that found no pending message.
    pub empty_flushes: u64,
    /// Ciphertext records appended to a pending message.
    pub records_queued: u64,
    /// Records the pending message could not hold.
    pub record_failures: u64,
    /// Datagrams dropped because the sender is not the bound peer.
    pub foreign_datagrams: u64,
    /// Datagrams handed to the engine.
    pub datagrams_accepted: u64,
    /// Decrypted messages handed to the CoAP client.
    pub messages_delivered: u64,
    /// Inbound messages dropped for lack of a buffer.
    pub inbound_alloc_failures: u64,
    /// Decrypted messages too large for a pool buffer.
    pub inbound_append_failures: u64,
}

/// CoAP client secured by a session engine, bound to one peer at a time.
///
/// Single-threaded: every method runs to completion, and deferred
/// transmission happens in [`run_tasklets`](Self::run_tasklets).
pub struct SecureClient<E: SessionEngine, S: DatagramSocket> {
    // === Collaborators ===
    /// Encrypted session engine.
    engine: E,
    /// Datagram socket for flushed ciphertext.
    socket: S,
    /// Base messaging client.
    client: CoapClient,
    /// Allocator for pending and inbound messages.
    pool: MessagePool,

    // === Session ===
    /// Lifecycle state.
    state: BridgeState,
    /// Bound peer (None until the first connect, and after stop).
    peer: Option<PeerBinding>,
    /// Registered until it fires or the session is torn down.
    connected_callback: Option<ConnectedCallback>,

    // === Outbound ===
    /// Ciphertext waiting for the next flush.
    pending: Option<Message>,
    /// Deferred work.
    tasklets: TaskletQueue<BridgeTask>,
    /// Scratch capacity for one plaintext message.
    max_message_length: usize,

    // === Statistics ===
    stats: BridgeStats,
}

impl<E: SessionEngine, S: DatagramSocket> SecureClient<E, S> {
    /// Create an idle bridge.
    pub fn new(engine: E, socket: S, pool: MessagePool) -> Self {
        Self {
            engine,
            socket,
            client: CoapClient::new(),
            pool,
            state: BridgeState::Idle,
            peer: None,
            connected_callback: None,
            pending: None,
            tasklets: TaskletQueue::new(),
            max_message_length: MAX_MESSAGE_LENGTH,
            stats: BridgeStats::default(),
        }
    }

    /// Create a bridge sized by `config`.
    pub fn with_config(engine: E, socket: S, pool: MessagePool, config: &BridgeConfig) -> Self {
        Self::new(engine, socket, pool).with_max_message_length(config.max_message_length())
    }

    /// Set the outbound plaintext limit, clamped to [`MAX_MESSAGE_LENGTH`].
    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length.min(MAX_MESSAGE_LENGTH);
        self
    }

    // === Accessors ===

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// The bound peer, if any.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.map(|p| p.addr())
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn pool(&self) -> &MessagePool {
        &self.pool
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.client.pending_requests()
    }

    /// Bytes waiting for the next flush.
    pub fn pending_transmit_len(&self) -> Option<usize> {
        self.pending.as_ref().map(Message::len)
    }

    /// Whether a connected callback is still registered.
    pub fn has_connected_callback(&self) -> bool {
        self.connected_callback.is_some()
    }

    /// Record sink over the outbound fields.
    fn record_queue(&mut self) -> (&mut E, RecordQueue<'_>) {
        (
            &mut self.engine,
            RecordQueue {
                pending: &mut self.pending,
                pool: &self.pool,
                tasklets: &mut self.tasklets,
                stats: &mut self.stats,
            },
        )
    }
}

impl<E: SessionEngine + fmt::Debug, S: DatagramSocket> fmt::Debug for SecureClient<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureClient")
            .field("engine", &self.engine)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("pending", &self.pending_transmit_len())
            .field("stats", &self.stats)
            .finish()
    }
}
