//! Symmetric record cipher.

use super::{SessionError, TAG_SIZE};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use std::fmt;

/// Largest plaintext a single record may carry.
pub(crate) const MAX_PLAINTEXT_SIZE: usize = u16::MAX as usize - TAG_SIZE - 8;

/// ChaCha20-Poly1305 state for one direction of a session.
///
/// Counters travel on the wire; nonces are the counter in little-endian
/// with a 4-byte zero prefix.
#[derive(Clone)]
pub struct CipherState {
    /// Encryption key (32 bytes).
    key: [u8; 32],
    /// Next counter to seal with.
    next_counter: u64,
}

impl CipherState {
    /// Create a cipher state whose first sealed counter is `first_counter`.
    pub fn new(key: [u8; 32], first_counter: u64) -> Self {
        Self {
            key,
            next_counter: first_counter,
        }
    }

    /// Seal `plaintext` with the next counter, returning (counter, ciphertext + tag).
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<(u64, Vec<u8>), SessionError> {
        if self.next_counter == u64::MAX {
            return Err(SessionError::CounterOverflow);
        }
        let counter = self.next_counter;
        let ciphertext = self.encrypt_with_counter(plaintext, counter, aad)?;
        self.next_counter += 1;
        Ok((counter, ciphertext))
    }

    /// Seal with an explicit counter, leaving the internal counter alone.
    pub fn encrypt_with_counter(
        &self,
        plaintext: &[u8],
        counter: u64,
        aad: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(SessionError::RecordTooLarge {
                size: plaintext.len(),
                max: MAX_PLAINTEXT_SIZE,
            });
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| SessionError::EncryptionFailed)?;

        let nonce = Self::counter_to_nonce(counter);
        cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| SessionError::EncryptionFailed)
    }

    /// Open a record sealed with `counter` and `aad`.
    ///
    /// Replay checks are the caller's job.
    pub fn decrypt_with_counter(
        &self,
        ciphertext: &[u8],
        counter: u64,
        aad: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        if ciphertext.len() < TAG_SIZE {
            return Err(SessionError::MalformedRecord(format!(
                "ciphertext shorter than tag: {} bytes",
                ciphertext.len()
            )));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|_| SessionError::DecryptionFailed)?;

        let nonce = Self::counter_to_nonce(counter);
        cipher
            .decrypt(&nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| SessionError::DecryptionFailed)
    }

    /// Next counter `encrypt` will use.
    pub fn next_counter(&self) -> u64 {
        self.next_counter
    }

    fn counter_to_nonce(counter: u64) -> Nonce {
        let mut nonce_bytes = [0u8; 12];
        nonce_bytes[4..12].copy_from_slice(&counter.to_le_bytes());
        *Nonce::from_slice(&nonce_bytes)
    }
}

impl fmt::Debug for CipherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherState")
            .field("next_counter", &self.next_counter)
            .field("key", &"[redacted]")
            .finish()
    }
}
