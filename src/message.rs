//! Message Buffers
//!
//! Owned datagram/application buffers drawn from a bounded pool. A
//! `Message` holds its bytes, a read offset, and a link-security flag.
//! Dropping (or calling [`Message::free`]) returns the buffer to the
//! pool that allocated it.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Default number of buffers a pool hands out concurrently.
pub const DEFAULT_MESSAGE_BUFFERS: usize = 16;

/// Default per-buffer byte capacity (IPv6 minimum MTU).
pub const DEFAULT_BUFFER_SIZE: usize = 1280;

/// Errors from message allocation and buffer writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message pool exhausted: {in_use} of {max} buffers in use")]
    PoolExhausted { in_use: usize, max: usize },

    #[error("buffer capacity exceeded: {len} bytes > capacity {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },
}

#[derive(Debug)]
struct PoolShared {
    max_buffers: usize,
    buffer_size: usize,
    in_use: AtomicUsize,
}

/// Bounded message allocator.
///
/// Cloning the pool yields another handle to the same budget.
#[derive(Clone, Debug)]
pub struct MessagePool {
    shared: Arc<PoolShared>,
}

impl MessagePool {
    /// Create a pool handing out at most `max_buffers` messages of
    /// `buffer_size` bytes each.
    pub fn new(max_buffers: usize, buffer_size: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                max_buffers,
                buffer_size,
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Allocate an empty message.
    pub fn new_message(&self) -> Result<Message, MessageError> {
        let shared = &self.shared;
        let mut in_use = shared.in_use.load(Ordering::Acquire);
        loop {
            if in_use >= shared.max_buffers {
                return Err(MessageError::PoolExhausted {
                    in_use,
                    max: shared.max_buffers,
                });
            }
            match shared.in_use.compare_exchange_weak(
                in_use,
                in_use + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => in_use = current,
            }
        }

        Ok(Message {
            data: Vec::new(),
            offset: 0,
            link_security: true,
            capacity: shared.buffer_size,
            lease: Lease {
                shared: Arc::clone(shared),
            },
        })
    }

    /// Allocate a message holding a copy of `bytes`.
    pub fn message_from(&self, bytes: &[u8]) -> Result<Message, MessageError> {
        let mut message = self.new_message()?;
        message.append(bytes)?;
        Ok(message)
    }

    /// Number of messages currently allocated.
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }

    /// Number of messages that can still be allocated.
    pub fn available(&self) -> usize {
        self.shared.max_buffers.saturating_sub(self.in_use())
    }

    /// Maximum concurrently allocated messages.
    pub fn max_buffers(&self) -> usize {
        self.shared.max_buffers
    }

    /// Per-message byte capacity.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_BUFFERS, DEFAULT_BUFFER_SIZE)
    }
}

/// Releases one pool slot when dropped.
struct Lease {
    shared: Arc<PoolShared>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.shared.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An exclusively owned message buffer.
pub struct Message {
    data: Vec<u8>,
    offset: usize,
    link_security: bool,
    capacity: usize,
    lease: Lease,
}

impl Message {
    /// Total length in bytes (independent of the read offset).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the message holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte capacity of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current read offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Move the read offset, clamped to the message length.
    pub fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.data.len());
    }

    /// Append bytes to the end of the message.
    ///
    /// Fails without modifying the message if the result would exceed
    /// the buffer capacity.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        let len = self.data.len() + bytes.len();
        if len > self.capacity {
            return Err(MessageError::CapacityExceeded {
                len,
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Copy bytes starting at `offset` into `buf`, returning the count copied.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(src) = self.data.get(offset..) else {
            return 0;
        };
        let count = src.len().min(buf.len());
        buf[..count].copy_from_slice(&src[..count]);
        count
    }

    /// All bytes of the message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes from the read offset to the end.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// Whether link-layer security should be applied on transmit.
    pub fn is_link_security_enabled(&self) -> bool {
        self.link_security
    }

    /// Enable or disable link-layer security for this message.
    pub fn set_link_security_enabled(&mut self, enabled: bool) {
        self.link_security = enabled;
    }

    /// Release the message back to its pool.
    pub fn free(self) {
        drop(self);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.data.len())
            .field("offset", &self.offset)
            .field("link_security", &self.link_security)
            .field("capacity", &self.capacity)
            .field("pool_in_use", &self.lease.shared.in_use.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_accounting() {
        let pool = MessagePool::new(2, 64);
        assert_eq!(pool.available(), 2);

        let first = pool.new_message().unwrap();
        let second = pool.new_message().unwrap();
        assert_eq!(pool.in_use(), 2);

        let err = pool.new_message().unwrap_err();
        assert_eq!(err, MessageError::PoolExhausted { in_use: 2, max: 2 });

        first.free();
        assert_eq!(pool.in_use(), 1);
        drop(second);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_append_respects_capacity() {
        let pool = MessagePool::new(1, 8);
        let mut message = pool.new_message().unwrap();

        message.append(&[1, 2, 3, 4, 5]).unwrap();
        let err = message.append(&[6, 7, 8, 9]).unwrap_err();
        assert!(matches!(err, MessageError::CapacityExceeded { len: 9, capacity: 8 }));

        // Failed append leaves contents untouched
        assert_eq!(message.as_bytes(), &[1, 2, 3, 4, 5]);
        message.append(&[6, 7, 8]).unwrap();
        assert_eq!(message.len(), 8);
    }

    #[test]
    fn test_offset_and_payload() {
        let pool = MessagePool::default();
        let mut message = pool.message_from(b"headerbody").unwrap();

        assert_eq!(message.payload(), b"headerbody");
        message.set_offset(6);
        assert_eq!(message.offset(), 6);
        assert_eq!(message.payload(), b"body");

        message.set_offset(100);
        assert_eq!(message.offset(), message.len());
        assert!(message.payload().is_empty());
    }

    #[test]
    fn test_read() {
        let pool = MessagePool::default();
        let message = pool.message_from(&[10, 20, 30, 40]).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(message.read(1, &mut buf), 3);
        assert_eq!(buf, [20, 30, 40]);

        let mut big = [0u8; 16];
        assert_eq!(message.read(0, &mut big), 4);
        assert_eq!(message.read(9, &mut big), 0);
    }

    #[test]
    fn test_link_security_default_enabled() {
        let pool = MessagePool::default();
        let mut message = pool.new_message().unwrap();
        assert!(message.is_link_security_enabled());
        message.set_link_security_enabled(false);
        assert!(!message.is_link_security_enabled());
    }

    #[test]
    fn test_cloned_pool_shares_budget() {
        let pool = MessagePool::new(1, 16);
        let other = pool.clone();
        let _held = pool.new_message().unwrap();
        assert!(other.new_message().is_err());
    }
}
