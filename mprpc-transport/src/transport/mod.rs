//! Connection state machine that hides connection latency.
//!
//! A [`Transport`] owns one physical connection. Messages sent before the
//! connection exists are queued and written, in order, once it comes up.
//!
//! # Connection Lifecycle
//!
//! ```text
//! ┌──────┐ first send ┌────────────┐ on_connected ┌───────────┐
//! │ Idle ├───────────►│ Connecting ├─────────────►│ Connected │
//! └──┬───┘            └─────┬──────┘              └─────┬─────┘
//!    │                      │ connect failed            │ closed / failed
//!    │ try_close            ▼                           │
//!    └─────────────────►┌────────┐◄─────────────────────┘
//!                       │ Closed │  (terminal)
//!                       └────────┘
//! ```
//!
//! # Locking
//!
//! State and queue live behind one mutex. The mutex is never held while
//! calling into the socket or the listener, so either may call back into the
//! transport from the same thread.
//!
//! All failure callbacks close the transport before notifying the listener:
//! by the time a listener sees a failure the transport is already `Closed`.

/// Counters describing transport activity
pub mod metrics;

/// Outbound message buffer
pub mod queue;

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mprpc_core::{RpcError, Value};
use parking_lot::{Condvar, Mutex};

use crate::error::SocketError;
use crate::socket::{Socket, SocketEvents};

pub use metrics::TransportMetrics;
pub use queue::PendingQueue;

/// Connection state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Nothing sent yet, no connection attempted.
    Idle,
    /// A connection attempt is in flight; sends are queued.
    Connecting,
    /// Sends go straight to the socket.
    Connected,
    /// Terminal. Sends are rejected.
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Idle => "idle",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Receiver of transport events, typically a [`Session`](crate::Session).
///
/// Failure callbacks are delivered after the transport reached `Closed`.
pub trait TransportListener: Send + Sync {
    /// The connection came up and queued messages were handed to the socket.
    fn on_connected(&self) {}

    /// A decoded inbound message.
    fn on_message_received(&self, message: Value);

    /// The connection could not be established.
    fn on_connect_failed(&self);

    /// The connection was closed.
    fn on_closed(&self);

    /// The connection broke.
    fn on_failed(&self, error: SocketError);
}

struct TransportInner {
    state: TransportState,
    queue: PendingQueue,
    /// A connect-time flush is running outside the lock; new sends must
    /// queue behind it even though the state is already `Connected`.
    flushing: bool,
    metrics: TransportMetrics,
}

enum SendAction {
    Send(Bytes),
    Connect,
    Queued,
}

/// One logical connection with latency-hiding send queue.
pub struct Transport<S: Socket> {
    socket: S,
    inner: Mutex<TransportInner>,
    /// Signalled when a connect-time flush ends or the transport closes.
    settled: Condvar,
    listener: Weak<dyn TransportListener>,
    this: Weak<Self>,
}

impl<S: Socket> Transport<S> {
    /// Create an idle transport over `socket` reporting to `listener`.
    ///
    /// The listener is held weakly; the transport never keeps it alive.
    pub fn new(socket: S, listener: Weak<dyn TransportListener>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            socket,
            inner: Mutex::new(TransportInner {
                state: TransportState::Idle,
                queue: PendingQueue::new(),
                flushing: false,
                metrics: TransportMetrics::default(),
            }),
            settled: Condvar::new(),
            listener,
            this: this.clone(),
        })
    }

    /// Send an encoded message, connecting first if needed.
    ///
    /// The first send on an idle transport starts the one and only connection
    /// attempt. Until it succeeds, messages queue and are written in
    /// submission order ahead of anything sent afterwards.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::SendRejected` if the transport is closed. The
    /// message is not queued and will never be delivered.
    pub fn send_message(&self, message: Bytes) -> Result<(), RpcError> {
        let action = {
            let mut inner = self.inner.lock();
            match inner.state {
                TransportState::Connected if !inner.flushing => {
                    inner.metrics.record_message_sent(message.len());
                    SendAction::Send(message)
                }
                TransportState::Connected | TransportState::Connecting => {
                    inner.queue.push(message);
                    inner.metrics.record_message_queued();
                    SendAction::Queued
                }
                TransportState::Idle => {
                    inner.state = TransportState::Connecting;
                    inner.queue.push(message);
                    inner.metrics.record_message_queued();
                    inner.metrics.record_connect_attempt();
                    SendAction::Connect
                }
                TransportState::Closed => {
                    inner.metrics.record_send_rejected();
                    return Err(RpcError::SendRejected);
                }
            }
        };

        match action {
            SendAction::Send(message) => self.socket.try_send(message),
            SendAction::Connect => {
                tracing::debug!("Transport::send_message starting connection attempt");
                self.socket.try_connect(self.events());
            }
            SendAction::Queued => {}
        }
        Ok(())
    }

    /// Close the transport.
    ///
    /// Queued messages are dropped, never flushed. Idempotent: only the call
    /// that performs the transition notifies the listener with `on_closed`.
    pub fn try_close(&self) {
        if self.shutdown() {
            if let Some(listener) = self.listener.upgrade() {
                listener.on_closed();
            }
        }
    }

    /// Block until every message accepted so far has been written by the
    /// socket, or `timeout` elapses.
    ///
    /// Waits out a pending connection and its queue flush first. An idle
    /// transport has nothing to write and returns at once. Must not be called
    /// from the thread that drives the socket.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the transport is or becomes closed, and
    /// `Timeout` if the deadline passes first.
    pub fn flush(&self, timeout: Duration) -> Result<(), RpcError> {
        let deadline = Instant::now() + timeout;
        {
            let mut inner = self.inner.lock();
            loop {
                match inner.state {
                    TransportState::Idle => return Ok(()),
                    TransportState::Closed => return Err(RpcError::ConnectionClosed),
                    TransportState::Connected if !inner.flushing => break,
                    TransportState::Connected | TransportState::Connecting => {
                        if self.settled.wait_until(&mut inner, deadline).timed_out() {
                            return Err(RpcError::Timeout);
                        }
                    }
                }
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.socket.flush(remaining) {
            return Ok(());
        }
        match self.state() {
            TransportState::Closed => Err(RpcError::ConnectionClosed),
            _ => Err(RpcError::Timeout),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    /// Number of messages waiting for the connection.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Snapshot of transport counters.
    pub fn metrics(&self) -> TransportMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Access the underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    fn events(&self) -> Weak<dyn SocketEvents> {
        self.this.clone()
    }

    /// Move to `Closed` and close the socket. Returns `true` if this call
    /// performed the transition.
    fn shutdown(&self) -> bool {
        let (previous, dropped) = {
            let mut inner = self.inner.lock();
            let previous = std::mem::replace(&mut inner.state, TransportState::Closed);
            inner.flushing = false;
            let dropped = inner.queue.clear();
            inner.metrics.record_messages_dropped(dropped);
            (previous, dropped)
        };
        self.settled.notify_all();

        if previous != TransportState::Closed {
            tracing::debug!(from = %previous, dropped, "Transport closed");
        }
        self.socket.try_close();
        previous != TransportState::Closed
    }

    fn notify(&self, f: impl FnOnce(&dyn TransportListener)) {
        match self.listener.upgrade() {
            Some(listener) => f(listener.as_ref()),
            None => tracing::debug!("Transport event dropped: listener is gone"),
        }
    }
}

impl<S: Socket> SocketEvents for Transport<S> {
    fn on_connected(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state != TransportState::Connecting {
                tracing::debug!(state = %inner.state, "Transport ignoring late connect");
                return;
            }
            inner.state = TransportState::Connected;
            inner.flushing = true;
        }

        // Drain in batches: sends racing with the flush queue up behind it,
        // so the flush ends only when the queue is observed empty.
        loop {
            let batch = {
                let mut inner = self.inner.lock();
                if inner.state != TransportState::Connected || !inner.flushing {
                    return;
                }
                if inner.queue.is_empty() {
                    inner.flushing = false;
                    self.settled.notify_all();
                    break;
                }
                let bytes = inner.queue.bytes();
                let batch = inner.queue.take_all();
                inner.metrics.record_messages_flushed(batch.len(), bytes);
                batch
            };

            tracing::debug!(count = batch.len(), "Transport flushing queued messages");
            for message in batch {
                self.socket.try_send(message);
            }
        }

        tracing::debug!("Transport connected");
        self.notify(|listener| listener.on_connected());
    }

    fn on_message_received(&self, message: Value) {
        self.inner.lock().metrics.record_message_received();
        self.notify(|listener| listener.on_message_received(message));
    }

    fn on_connect_failed(&self) {
        tracing::debug!("Transport connect failed");
        self.shutdown();
        self.notify(|listener| listener.on_connect_failed());
    }

    fn on_closed(&self) {
        tracing::debug!("Transport closed by peer");
        self.shutdown();
        self.notify(|listener| listener.on_closed());
    }

    fn on_failed(&self, error: SocketError) {
        tracing::debug!(%error, "Transport failed");
        self.shutdown();
        self.notify(|listener| listener.on_failed(error));
    }
}

impl<S: Socket> Drop for Transport<S> {
    fn drop(&mut self) {
        self.socket.try_close();
    }
}
