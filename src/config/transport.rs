//! Transport configuration (`transport.*`).

use serde::{Deserialize, Serialize};

/// Default UDP bind address: any interface, ephemeral port.
const DEFAULT_UDP_BIND_ADDR: &str = "0.0.0.0:0";

/// Default UDP MTU (IPv6 minimum).
const DEFAULT_UDP_MTU: u16 = 1280;

/// UDP socket configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UdpConfig {
    /// Bind address (`transport.bind_addr`). Defaults to "0.0.0.0:0".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,

    /// Largest datagram the socket will send (`transport.mtu`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

impl UdpConfig {
    /// Get the bind address, using default if not configured.
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_UDP_BIND_ADDR)
    }

    /// Get the UDP MTU, using default if not configured.
    pub fn mtu(&self) -> u16 {
        self.mtu.unwrap_or(DEFAULT_UDP_MTU)
    }

    /// Override fields present in `other`.
    pub fn merge(&mut self, other: UdpConfig) {
        if other.bind_addr.is_some() {
            self.bind_addr = other.bind_addr;
        }
        if other.mtu.is_some() {
            self.mtu = other.mtu;
        }
    }
}
