//! Encrypted Session Engine
//!
//! The contract between the secure bridge and the engine that owns the
//! handshake and per-record encryption. The engine never touches a socket:
//! ciphertext leaves through a [`RecordSink`] and decrypted application
//! data arrives through a [`SessionSink`], both handed in by the caller on
//! every call that can produce output.
//!
//! ## Call Contract
//!
//! ```text
//!   start(role, sink)   client role emits its first handshake record
//!   send(bytes, sink)   zero or more sink.send_record() calls, in order
//!   receive(bytes, sink) zero or more send_record()/deliver() calls
//!   stop(sink)          established engines emit a close record
//! ```
//!
//! [`PskSession`] is the engine shipped with this crate.

mod cipher;
mod psk;
#[cfg(test)]
mod tests;

use crate::message::MessageError;
use std::fmt;
use thiserror::Error;

pub use cipher::CipherState;
pub use psk::{PskSession, RecordType, PSK_MIN_SIZE};

/// Size of the AEAD tag.
pub const TAG_SIZE: usize = 16;

/// Errors from session engine operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("session not started")]
    NotStarted,

    #[error("session not connected")]
    NotConnected,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("record too large: {size} > {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("counter overflow")]
    CounterOverflow,

    #[error("replay detected: counter {0} already seen or too old")]
    ReplayDetected(u64),

    #[error("invalid pre-shared key: {0}")]
    InvalidPsk(String),

    #[error("record sink failed: {0}")]
    Buffer(#[from] MessageError),
}

/// Which side of the handshake this engine plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Sends the first handshake record.
    Client,
    /// Waits for the client's first record.
    Server,
}

impl fmt::Display for HandshakeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeRole::Client => write!(f, "client"),
            HandshakeRole::Server => write!(f, "server"),
        }
    }
}

/// Receiver for ciphertext produced by the engine.
pub trait RecordSink {
    /// Accept one chunk of ciphertext for transmission.
    ///
    /// An error aborts the engine operation that produced the chunk.
    fn send_record(&mut self, record: &[u8]) -> Result<(), MessageError>;
}

/// Receiver for everything an inbound datagram can produce.
pub trait SessionSink: RecordSink {
    /// Accept one decrypted application message.
    fn deliver(&mut self, plaintext: &[u8]);
}

/// An encrypted, connection-oriented session with a single peer.
pub trait SessionEngine {
    /// Begin a handshake in the given role.
    fn start(&mut self, role: HandshakeRole, sink: &mut dyn RecordSink) -> Result<(), SessionError>;

    /// Tear down the session.
    fn stop(&mut self, sink: &mut dyn RecordSink) -> Result<(), SessionError>;

    /// Whether a handshake or session is active.
    fn is_started(&self) -> bool;

    /// Whether the handshake has completed.
    fn is_connected(&self) -> bool;

    /// Encrypt application bytes, emitting ciphertext through `sink`.
    fn send(&mut self, plaintext: &[u8], sink: &mut dyn RecordSink) -> Result<(), SessionError>;

    /// Process one received datagram.
    ///
    /// Failures are handled inside the engine; there is nobody to report
    /// them to.
    fn receive(&mut self, datagram: &[u8], sink: &mut dyn SessionSink);
}
