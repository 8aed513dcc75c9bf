//! Datagram Transport
//!
//! The socket seen from the bridge: an outbound [`DatagramSocket`] the
//! flush tasklet hands ciphertext to, and a channel of
//! [`ReceivedPacket`]s feeding the run loop.

pub mod udp;

use crate::message::Message;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// One datagram as read off the socket.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    /// Sender address and port.
    pub remote_addr: SocketAddr,
    pub data: Vec<u8>,
    pub received_at: Instant,
}

impl ReceivedPacket {
    pub fn new(remote_addr: SocketAddr, data: Vec<u8>) -> Self {
        Self {
            remote_addr,
            data,
            received_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub type PacketTx = mpsc::Sender<ReceivedPacket>;
pub type PacketRx = mpsc::Receiver<ReceivedPacket>;

/// Bounded channel from the receive task to the run loop.
pub fn packet_channel(buffer: usize) -> (PacketTx, PacketRx) {
    mpsc::channel(buffer)
}

/// Socket errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket not bound")]
    NotBound,

    #[error("socket already bound")]
    AlreadyBound,

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },

    #[error("datagram of {len} bytes exceeds mtu {mtu}")]
    DatagramTooLarge { len: usize, mtu: u16 },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),
}

/// Socket lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Bound,
    Closed,
    /// Last bind attempt failed.
    Failed,
}

impl SocketState {
    pub fn is_bound(&self) -> bool {
        matches!(self, SocketState::Bound)
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SocketState::Unbound => "unbound",
            SocketState::Bound => "bound",
            SocketState::Closed => "closed",
            SocketState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Outbound half of a datagram socket.
///
/// Sends must not block: they run inside the bridge's flush tasklet.
pub trait DatagramSocket {
    /// Transmit `message` as one datagram to `peer`.
    ///
    /// Returns the bytes handed to the network. The caller keeps the
    /// message whatever the outcome.
    fn send_to(&mut self, message: &Message, peer: SocketAddr) -> Result<usize, TransportError>;

    /// Largest datagram the socket will send.
    fn mtu(&self) -> u16;
}
