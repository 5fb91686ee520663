//! The socket collaborator seen by [`Transport`](crate::Transport).
//!
//! A [`Socket`] starts operations and returns immediately; outcomes arrive
//! later on the socket's own execution context through [`SocketEvents`]:
//!
//! ```text
//!  Transport ──try_connect / try_send / try_close──► Socket
//!      ▲                                               │
//!      └── on_connected / on_message_received ─────────┤
//!          on_connect_failed / on_closed / on_failed ──┘
//! ```
//!
//! The socket only holds a [`Weak`] reference to its event sink, so it never
//! keeps a transport alive.

mod outbound;

/// Tokio TCP implementation.
pub mod tcp;

/// Tokio UDP implementation.
pub mod udp;

use std::sync::Weak;
use std::time::Duration;

use bytes::Bytes;
use mprpc_core::Value;

use crate::error::SocketError;

pub use tcp::TcpSocket;
pub use udp::UdpSocket;

/// Asynchronous connection primitives.
///
/// None of these block. Implementations must tolerate any call order,
/// including `try_send` after `try_close` (the message is discarded).
pub trait Socket: Send + Sync + 'static {
    /// Begin connecting. The result is reported through `events`.
    fn try_connect(&self, events: Weak<dyn SocketEvents>);

    /// Hand a fully encoded message to the connection, preserving call order.
    fn try_send(&self, message: Bytes);

    /// Block until every message handed to `try_send` has been written, or
    /// `timeout` elapses. Returns `false` if anything is left unwritten.
    ///
    /// Must not be called from the thread that drives the socket. The default
    /// suits sockets that write synchronously inside `try_send`.
    fn flush(&self, timeout: Duration) -> bool {
        let _ = timeout;
        true
    }

    /// Close the connection and discard anything not yet written.
    ///
    /// An event already being delivered on another thread may still arrive.
    fn try_close(&self);
}

/// Lifecycle callbacks delivered by a [`Socket`].
pub trait SocketEvents: Send + Sync {
    /// The connection attempt succeeded.
    fn on_connected(&self);

    /// A complete value was read and decoded.
    fn on_message_received(&self, message: Value);

    /// The connection attempt failed.
    fn on_connect_failed(&self);

    /// The peer closed the connection.
    fn on_closed(&self);

    /// The connection broke.
    fn on_failed(&self, error: SocketError);
}

pub(crate) fn deliver(events: &Weak<dyn SocketEvents>, f: impl FnOnce(&dyn SocketEvents)) {
    if let Some(events) = events.upgrade() {
        f(events.as_ref());
    }
}
