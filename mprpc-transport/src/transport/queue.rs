//! Outbound messages held back until the connection is ready.

use std::collections::VecDeque;

use bytes::Bytes;

/// FIFO buffer of encoded messages waiting for a connection.
///
/// Appended to while the transport is connecting, drained in one batch when
/// the connection comes up, cleared when the transport closes.
#[derive(Debug, Default)]
pub struct PendingQueue {
    messages: VecDeque<Bytes>,
    bytes: usize,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: Bytes) {
        self.bytes += message.len();
        self.messages.push_back(message);
    }

    /// Remove every message, in submission order.
    pub fn take_all(&mut self) -> Vec<Bytes> {
        self.bytes = 0;
        self.messages.drain(..).collect()
    }

    /// Drop every message, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.messages.len();
        self.messages.clear();
        self.bytes = 0;
        dropped
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total encoded size of queued messages.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}
