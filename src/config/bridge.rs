//! Bridge configuration (`bridge.*`).

use crate::bridge::MAX_MESSAGE_LENGTH;
use crate::message::{DEFAULT_BUFFER_SIZE, DEFAULT_MESSAGE_BUFFERS};
use serde::{Deserialize, Serialize};

/// Message size limits and buffer pool sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Largest outbound application message (`bridge.max_message_length`).
    /// Values above the built-in ceiling are clamped to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,

    /// Pool size (`bridge.message_buffers`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_buffers: Option<usize>,

    /// Per-buffer capacity in bytes (`bridge.buffer_size`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
}

impl BridgeConfig {
    pub fn max_message_length(&self) -> usize {
        self.max_message_length
            .map_or(MAX_MESSAGE_LENGTH, |len| len.min(MAX_MESSAGE_LENGTH))
    }

    pub fn message_buffers(&self) -> usize {
        self.message_buffers.unwrap_or(DEFAULT_MESSAGE_BUFFERS)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    /// Override fields present in `other`.
    pub fn merge(&mut self, other: BridgeConfig) {
        if other.max_message_length.is_some() {
            self.max_message_length = other.max_message_length;
        }
        if other.message_buffers.is_some() {
            self.message_buffers = other.message_buffers;
        }
        if other.buffer_size.is_some() {
            self.buffer_size = other.buffer_size;
        }
    }
}
