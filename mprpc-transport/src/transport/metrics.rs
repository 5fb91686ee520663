//! Counters describing what a transport did with its messages.

/// Snapshot of transport activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Number of connection attempts started (0 or 1 per transport)
    pub connect_attempts: u64,

    /// Total number of messages queued while connecting
    pub messages_queued: u64,

    /// Total number of queued messages flushed to the socket on connect
    pub messages_flushed: u64,

    /// Total number of messages handed straight to a connected socket
    pub messages_sent: u64,

    /// Total number of queued messages dropped by a close
    pub messages_dropped: u64,

    /// Total number of sends refused because the transport was closed
    pub sends_rejected: u64,

    /// Total number of inbound messages forwarded to the listener
    pub messages_received: u64,

    /// Total encoded bytes handed to the socket
    pub bytes_sent: u64,
}

impl TransportMetrics {
    /// Record a connection attempt.
    pub fn record_connect_attempt(&mut self) {
        self.connect_attempts += 1;
    }

    /// Record a message queued behind the connection.
    pub fn record_message_queued(&mut self) {
        self.messages_queued += 1;
    }

    /// Record queued messages written after connecting.
    pub fn record_messages_flushed(&mut self, count: usize, bytes: usize) {
        self.messages_flushed += count as u64;
        self.bytes_sent += bytes as u64;
    }

    /// Record a message sent without queuing.
    pub fn record_message_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record queued messages discarded by a close.
    pub fn record_messages_dropped(&mut self, count: usize) {
        self.messages_dropped += count as u64;
    }

    /// Record a send refused by a closed transport.
    pub fn record_send_rejected(&mut self) {
        self.sends_rejected += 1;
    }

    /// Record an inbound message.
    pub fn record_message_received(&mut self) {
        self.messages_received += 1;
    }

    /// Messages that reached the socket, queued or not.
    pub fn total_sent(&self) -> u64 {
        self.messages_sent + self.messages_flushed
    }
}
