//! Configuration structures for sockets, sessions, clients and servers.

use std::time::Duration;

use mprpc_core::DEFAULT_MAX_FRAME_SIZE;

/// Configuration for the TCP socket collaborator.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Timeout for a connection attempt.
    pub connect_timeout: Duration,

    /// Maximum bytes buffered for a single inbound value.
    pub max_frame_size: usize,

    /// Disable Nagle's algorithm on connected sockets.
    pub nodelay: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
        }
    }
}

impl SocketConfig {
    /// Configuration for low-latency local networking.
    pub fn local_network() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Configuration for high-latency WAN networking.
    pub fn wan_network() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Set the connection attempt timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the inbound frame size limit.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Configuration for call correlation.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Deadline for a single call.
    ///
    /// `None` (the default) waits until a reply arrives or the connection
    /// fails.
    pub call_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Fail calls that receive no reply within `timeout`.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Configuration for [`Client`](crate::Client).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Socket behavior.
    pub socket: SocketConfig,

    /// Call behavior.
    pub session: SessionConfig,

    /// Worker threads for the client-owned runtime.
    pub worker_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            session: SessionConfig::default(),
            worker_threads: 1,
        }
    }
}

impl ClientConfig {
    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.session.call_timeout = Some(timeout);
        self
    }

    /// Set the socket configuration.
    pub fn with_socket(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }
}

/// Configuration for [`Server`](crate::Server).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Maximum bytes buffered for a single inbound value.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults_to_no_timeout() {
        assert_eq!(SessionConfig::default().call_timeout, None);
        assert_eq!(ClientConfig::default().session.call_timeout, None);
    }

    #[test]
    fn test_builders() {
        let config = ClientConfig::default()
            .with_call_timeout(Duration::from_millis(250))
            .with_socket(SocketConfig::local_network().with_max_frame_size(1024));
        assert_eq!(config.session.call_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.socket.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.socket.max_frame_size, 1024);
    }

    #[test]
    fn test_presets_order_by_latency() {
        assert!(
            SocketConfig::local_network().connect_timeout
                < SocketConfig::wan_network().connect_timeout
        );
    }
}
