//! Session configuration (`session.*`).

use serde::{Deserialize, Serialize};

/// Pre-shared key for the session engine.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Hex-encoded pre-shared key (`session.psk`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psk: Option<String>,
}

impl SessionConfig {
    /// Override fields present in `other`.
    pub fn merge(&mut self, other: SessionConfig) {
        if other.psk.is_some() {
            self.psk = other.psk;
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("psk", &self.psk.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}
