//! Call correlation over an asynchronous transport.
//!
//! A [`Session`] turns the transport's fire-and-forget sends into blocking
//! calls. Each call gets a fresh request id and a [`PendingCall`] entry; the
//! caller blocks on that entry until the matching response arrives or the
//! connection fails.
//!
//! # Resolution
//!
//! ```text
//!            ┌─ response with id ──► Ok(result) | Err(RemoteError)
//! Pending ───┼─ connection failure ► Err(ConnectFailed | ConnectionClosed | TransportFailure)
//!            └─ deadline elapsed ──► Err(Timeout)
//! ```
//!
//! Whoever removes the entry from the table resolves it. A response for an
//! id no longer in the table (already timed out, already failed, or never
//! issued) is discarded.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = Session::new(socket, MsgpackCodec, SessionConfig::default());
//! let sum = session.call("add", vec![Value::from(1), Value::from(2)])?;
//! ```

mod pending;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use mprpc_core::{Codec, Message, MsgpackCodec, RpcError, RpcResult, Value};
use parking_lot::Mutex;

use self::pending::PendingCall;
use crate::config::SessionConfig;
use crate::error::SocketError;
use crate::socket::Socket;
use crate::transport::{Transport, TransportListener};

/// Synchronous call interface over one [`Transport`].
pub struct Session<S: Socket, C: Codec = MsgpackCodec> {
    transport: Arc<Transport<S>>,
    pending: Mutex<HashMap<u32, PendingCall>>,
    next_id: AtomicU32,
    codec: C,
    config: SessionConfig,
}

impl<S: Socket, C: Codec> Session<S, C> {
    /// Create a session and its transport over `socket`.
    ///
    /// Nothing connects until the first call.
    pub fn new(socket: S, codec: C, config: SessionConfig) -> Arc<Self> {
        Self::build(socket, codec, config, 0)
    }

    /// Create a session whose first request id is `first_id`.
    #[cfg(test)]
    pub(crate) fn with_first_id(
        socket: S,
        codec: C,
        config: SessionConfig,
        first_id: u32,
    ) -> Arc<Self> {
        Self::build(socket, codec, config, first_id)
    }

    fn build(socket: S, codec: C, config: SessionConfig, first_id: u32) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let listener: Weak<dyn TransportListener> = this.clone();
            Self {
                transport: Transport::new(socket, listener),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(first_id),
                codec,
                config,
            }
        })
    }

    /// Call `method` with `args` and block until it completes.
    ///
    /// Must not be called from an async runtime worker thread.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError` if the peer reported a failure, `Timeout` if a
    /// call timeout is configured and elapsed, `SendRejected` if the
    /// transport is closed, and the matching transport error if the
    /// connection failed while the call was outstanding.
    ///
    /// # Panics
    ///
    /// Panics if the request id counter wraps onto an id that is still
    /// outstanding.
    pub fn call(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        let (id, slot) = self.register(method);

        let request = Message::Request {
            id,
            method: method.to_string(),
            params: args,
        };
        let sent = self
            .codec
            .encode(&request.into_value())
            .map_err(RpcError::from)
            .and_then(|bytes| self.transport.send_message(bytes));
        if let Err(error) = sent {
            if self.pending.lock().remove(&id).is_none() {
                // A failure broadcast got there first and carries the cause.
                return slot.wait(None).unwrap_or(Err(error));
            }
            tracing::debug!(id, method, %error, "Session::call send failed");
            return Err(error);
        }

        if let Some(outcome) = slot.wait(self.config.call_timeout) {
            return outcome;
        }

        if self.pending.lock().remove(&id).is_some() {
            tracing::debug!(id, method, "Session::call timed out");
            return Err(RpcError::Timeout);
        }
        // A resolver removed the entry first and is about to fill the slot.
        slot.wait(None).unwrap_or(Err(RpcError::Timeout))
    }

    /// Send a notification. No reply is expected.
    ///
    /// # Errors
    ///
    /// Returns `SendRejected` if the transport is closed.
    pub fn notify(&self, method: &str, args: Vec<Value>) -> RpcResult<()> {
        let message = Message::Notification {
            method: method.to_string(),
            params: args,
        };
        let bytes = self.codec.encode(&message.into_value())?;
        self.transport.send_message(bytes)
    }

    /// Block until every request and notification sent so far has been
    /// written to the network, or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// See [`Transport::flush`].
    pub fn flush(&self, timeout: Duration) -> RpcResult<()> {
        self.transport.flush(timeout)
    }

    /// Close the transport, failing every outstanding call with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.transport.try_close();
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<Transport<S>> {
        &self.transport
    }

    /// Number of calls waiting for a reply.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().len()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn register(&self, method: &str) -> (u32, Arc<pending::CallSlot>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let call = PendingCall::new(method);
        let slot = call.slot.clone();

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.insert(id, call) {
            panic!(
                "request id {} reused while a call to {} is still outstanding",
                id, previous.method
            );
        }
        (id, slot)
    }

    fn fail_all(&self, error: RpcError) {
        let calls: Vec<(u32, PendingCall)> = self.pending.lock().drain().collect();
        if calls.is_empty() {
            return;
        }

        tracing::debug!(count = calls.len(), %error, "Session failing outstanding calls");
        for (id, call) in calls {
            call.resolve(id, Err(error.clone()));
        }
    }
}

impl<S: Socket, C: Codec> TransportListener for Session<S, C> {
    fn on_message_received(&self, message: Value) {
        match Message::from_value(message) {
            Ok(Message::Response { id, error, result }) => {
                let call = self.pending.lock().remove(&id);
                let Some(call) = call else {
                    tracing::debug!(id, "Session discarding reply for unknown request id");
                    return;
                };
                let outcome = if error.is_nil() {
                    Ok(result)
                } else {
                    Err(RpcError::RemoteError(error))
                };
                call.resolve(id, outcome);
            }
            Ok(Message::Request { id, method, .. }) => {
                tracing::debug!(id, %method, "Session ignoring inbound request");
            }
            Ok(Message::Notification { method, .. }) => {
                tracing::debug!(%method, "Session ignoring inbound notification");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session discarding malformed message");
            }
        }
    }

    fn on_connect_failed(&self) {
        self.fail_all(RpcError::ConnectFailed);
    }

    fn on_closed(&self) {
        self.fail_all(RpcError::ConnectionClosed);
    }

    fn on_failed(&self, error: SocketError) {
        self.fail_all(RpcError::TransportFailure(error.to_string()));
    }
}

impl<S: Socket, C: Codec> Drop for Session<S, C> {
    fn drop(&mut self) {
        self.transport.try_close();
    }
}
