//! Bridge Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./coaps-bridge.yaml` (current directory - highest priority)
//! 2. `~/.coaps-bridge.yaml` (home directory)
//! 3. `~/.config/coaps-bridge/coaps-bridge.yaml` (user config directory)
//! 4. `/etc/coaps-bridge/coaps-bridge.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files.
//!
//! ```yaml
//! bridge:
//!   max_message_length: 1024
//!   message_buffers: 16
//! session:
//!   psk: "00112233445566778899aabbccddeeff"
//! transport:
//!   bind_addr: "[::]:0"
//! peer: "[fd00::1]:5684"
//! ```

mod bridge;
mod session;
mod transport;

use crate::message::MessagePool;
use crate::session::{PskSession, SessionError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use bridge::BridgeConfig;
pub use session::SessionConfig;
pub use transport::UdpConfig;

/// Default config filename.
const CONFIG_FILENAME: &str = "coaps-bridge.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid peer address '{0}'")]
    InvalidPeer(String),

    #[error("no pre-shared key configured (session.psk)")]
    MissingPsk,

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bridge limits and buffers (`bridge.*`).
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Session engine settings (`session.*`).
    #[serde(default)]
    pub session: SessionConfig,

    /// UDP socket (`transport.*`).
    #[serde(default)]
    pub transport: UdpConfig,

    /// Default peer to connect to (`peer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("/etc/coaps-bridge").join(CONFIG_FILENAME));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("coaps-bridge").join(CONFIG_FILENAME));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".coaps-bridge.yaml"));
        }

        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        self.bridge.merge(other.bridge);
        self.session.merge(other.session);
        self.transport.merge(other.transport);
        if other.peer.is_some() {
            self.peer = other.peer;
        }
    }

    /// The configured peer, parsed.
    pub fn peer_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.peer
            .as_deref()
            .map(|peer| {
                peer.parse()
                    .map_err(|_| ConfigError::InvalidPeer(peer.to_string()))
            })
            .transpose()
    }

    /// Build the session engine from `session.psk`.
    pub fn create_session(&self) -> Result<PskSession, ConfigError> {
        let psk = self.session.psk.as_deref().ok_or(ConfigError::MissingPsk)?;
        Ok(PskSession::from_hex(psk)?)
    }

    /// Build the message pool from `bridge.*`.
    pub fn create_pool(&self) -> MessagePool {
        MessagePool::new(self.bridge.message_buffers(), self.bridge.buffer_size())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MAX_MESSAGE_LENGTH;
    use crate::session::SessionEngine;
    use std::fs;
    use tempfile::TempDir;

    const PSK_HEX: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.bridge.max_message_length(), MAX_MESSAGE_LENGTH);
        assert_eq!(config.bridge.message_buffers(), 16);
        assert_eq!(config.bridge.buffer_size(), 1280);
        assert_eq!(config.transport.bind_addr(), "0.0.0.0:0");
        assert_eq!(config.transport.mtu(), 1280);
        assert!(config.peer_addr().unwrap().is_none());
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert!(config.session.psk.is_none());
        assert!(config.peer.is_none());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
bridge:
  max_message_length: 512
  message_buffers: 4
  buffer_size: 600
session:
  psk: "00112233445566778899aabbccddeeff"
transport:
  bind_addr: "127.0.0.1:0"
  mtu: 1400
peer: "[fd00::1]:5684"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bridge.max_message_length(), 512);
        assert_eq!(config.bridge.message_buffers(), 4);
        assert_eq!(config.bridge.buffer_size(), 600);
        assert_eq!(config.transport.bind_addr(), "127.0.0.1:0");
        assert_eq!(config.transport.mtu(), 1400);
        assert_eq!(
            config.peer_addr().unwrap(),
            Some("[fd00::1]:5684".parse().unwrap())
        );

        let pool = config.create_pool();
        assert_eq!(pool.max_buffers(), 4);
        assert_eq!(pool.buffer_size(), 600);
    }

    #[test]
    fn test_max_message_length_clamped() {
        let yaml = r#"
bridge:
  max_message_length: 4096
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bridge.max_message_length(), MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
bridge:
  max_length: 10
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_invalid_peer() {
        let mut config = Config::new();
        config.peer = Some("not-an-address".to_string());
        assert!(matches!(
            config.peer_addr(),
            Err(ConfigError::InvalidPeer(_))
        ));
    }

    #[test]
    fn test_create_session() {
        let mut config = Config::new();
        assert!(matches!(
            config.create_session(),
            Err(ConfigError::MissingPsk)
        ));

        config.session.psk = Some("abcd".to_string());
        assert!(matches!(
            config.create_session(),
            Err(ConfigError::Session(SessionError::InvalidPsk(_)))
        ));

        config.session.psk = Some(PSK_HEX.to_string());
        let session = config.create_session().unwrap();
        assert!(!session.is_started());
    }

    #[test]
    fn test_merge_overrides_present_fields() {
        let mut base = Config::new();
        base.session.psk = Some("base".to_string());
        base.bridge.message_buffers = Some(8);
        base.peer = Some("[fd00::1]:5684".to_string());

        let mut other = Config::new();
        other.bridge.message_buffers = Some(32);
        other.transport.mtu = Some(1400);

        base.merge(other);
        assert_eq!(base.session.psk, Some("base".to_string()));
        assert_eq!(base.bridge.message_buffers(), 32);
        assert_eq!(base.transport.mtu(), 1400);
        assert_eq!(base.peer, Some("[fd00::1]:5684".to_string()));
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low_priority = temp_dir.path().join("low.yaml");
        let high_priority = temp_dir.path().join("high.yaml");
        let missing = temp_dir.path().join("missing.yaml");

        fs::write(
            &low_priority,
            r#"
session:
  psk: "low"
peer: "127.0.0.1:5684"
"#,
        )
        .unwrap();
        fs::write(
            &high_priority,
            r#"
session:
  psk: "high"
"#,
        )
        .unwrap();

        let paths = vec![low_priority, missing, high_priority.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1], high_priority);
        assert_eq!(config.session.psk, Some("high".to_string()));
        assert_eq!(config.peer, Some("127.0.0.1:5684".to_string()));
    }

    #[test]
    fn test_load_file_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "bridge: [1, 2").unwrap();

        assert!(matches!(
            Config::load_file(&path),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert!(paths.iter().any(|p| p.ends_with(CONFIG_FILENAME)));
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/etc/coaps-bridge") && p.ends_with(CONFIG_FILENAME)));
    }

    #[test]
    fn test_to_yaml_omits_unset() {
        let mut config = Config::new();
        config.peer = Some("[fd00::1]:5684".to_string());

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("peer:"));
        assert!(!yaml.contains("psk:"));
        assert!(!yaml.contains("max_message_length:"));
    }
}
