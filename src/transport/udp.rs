//! tokio UDP socket for the bridge.
//!
//! A spawned task reads datagrams into the packet channel. Sends use
//! `try_send_to` so the flush tasklet never awaits.

use super::{DatagramSocket, PacketTx, ReceivedPacket, SocketState, TransportError};
use crate::config::UdpConfig;
use crate::message::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Receive buffer slack above the configured MTU.
const RECV_HEADROOM: usize = 64;

pub struct UdpTransport {
    config: UdpConfig,
    state: SocketState,
    socket: Option<Arc<UdpSocket>>,
    packet_tx: PacketTx,
    receiver: Option<JoinHandle<()>>,
}

impl UdpTransport {
    pub fn new(config: UdpConfig, packet_tx: PacketTx) -> Self {
        Self {
            config,
            state: SocketState::Unbound,
            socket: None,
            packet_tx,
            receiver: None,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Bound local address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the socket and spawn the receive task.
    pub async fn bind(&mut self) -> Result<SocketAddr, TransportError> {
        if self.state.is_bound() {
            return Err(TransportError::AlreadyBound);
        }

        let addr: SocketAddr = self.config.bind_addr().parse().map_err(|_| {
            self.state = SocketState::Failed;
            TransportError::InvalidBindAddress(self.config.bind_addr().to_string())
        })?;

        let socket = UdpSocket::bind(addr).await.map_err(|source| {
            self.state = SocketState::Failed;
            TransportError::Bind { addr, source }
        })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        let socket = Arc::new(socket);
        self.receiver = Some(tokio::spawn(receive_loop(
            socket.clone(),
            self.packet_tx.clone(),
            self.config.mtu() as usize + RECV_HEADROOM,
        )));
        self.socket = Some(socket);
        self.state = SocketState::Bound;

        info!(local_addr = %local_addr, mtu = self.config.mtu(), "UDP socket bound");
        Ok(local_addr)
    }

    /// Stop the receive task and drop the socket.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if !self.state.is_bound() {
            return Err(TransportError::NotBound);
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
            let _ = receiver.await;
        }
        self.socket = None;
        self.state = SocketState::Closed;
        debug!("UDP socket closed");
        Ok(())
    }
}

impl DatagramSocket for UdpTransport {
    fn send_to(&mut self, message: &Message, peer: SocketAddr) -> Result<usize, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotBound)?;

        let mtu = self.config.mtu();
        if message.len() > mtu as usize {
            return Err(TransportError::DatagramTooLarge {
                len: message.len(),
                mtu,
            });
        }

        let sent = socket
            .try_send_to(message.as_bytes(), peer)
            .map_err(TransportError::Send)?;
        trace!(peer = %peer, bytes = sent, "UDP datagram sent");
        Ok(sent)
    }

    fn mtu(&self) -> u16 {
        self.config.mtu()
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, packet_tx: PacketTx, buffer_size: usize) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP unreachable from a previous send surfaces here
                warn!(error = %e, "UDP receive error");
                continue;
            }
        };
        trace!(sender = %sender, bytes = len, "UDP datagram received");

        if packet_tx
            .send(ReceivedPacket::new(sender, buf[..len].to_vec()))
            .await
            .is_err()
        {
            debug!("Packet channel closed, UDP receive task exiting");
            return;
        }
    }
}
