//! coaps-bridge: secure CoAP client over an encrypted datagram session
//!
//! Carries commissioning request/response traffic between a mesh node and
//! a single peer. CoAP messages are encrypted by a session engine, the
//! resulting records are coalesced into one datagram per flush, and
//! inbound datagrams are filtered by peer before decryption.

pub mod bridge;
pub mod coap;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod tasklet;
pub mod transport;

// Re-export bridge types
pub use bridge::{
    BridgeState, BridgeStats, BridgeTask, ConnectedCallback, PeerBinding, SecureClient,
    MAX_MESSAGE_LENGTH,
};
pub use error::{BridgeError, SendError};

// Re-export CoAP types
pub use coap::{
    ClientError, Code, CoapClient, CoapHeader, CoapMessage, MessageTransport, MessageType,
    RequestBuilder, ResponseHandler,
};

// Re-export config types
pub use config::{BridgeConfig, Config, ConfigError, SessionConfig, UdpConfig};

// Re-export message types
pub use message::{Message, MessageError, MessagePool};

// Re-export session types
pub use session::{
    HandshakeRole, PskSession, RecordSink, SessionEngine, SessionError, SessionSink,
};

// Re-export scheduling types
pub use tasklet::TaskletQueue;

// Re-export transport types
pub use transport::udp::UdpTransport;
pub use transport::{
    packet_channel, DatagramSocket, PacketRx, PacketTx, ReceivedPacket, SocketState,
    TransportError,
};
