//! MessagePack-RPC server over Tokio TCP or UDP.
//!
//! ```text
//!  accept loop ──► connection task ──decode──► Dispatcher::dispatch(method, params, Responder)
//!                        │                                                   │
//!                        └──── write task ◄──── encoded Response ◄───────────┘
//! ```
//!
//! Each TCP connection owns a writer task fed by an unbounded channel; every
//! [`Responder`] holds a sender into it, so replies may be produced out of
//! order and from any thread. [`UdpServer`] runs the same dispatch over
//! datagrams, replying to the sender's address.

mod methods;
mod responder;
mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use mprpc_core::{Codec, FrameDecoder, Message, MsgpackCodec, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::ServerConfig;
use crate::error::ServerError;

pub use methods::{MethodMap, NO_METHOD_ERROR};
pub use responder::{NO_RESPONSE_ERROR, Responder};
pub use udp::UdpServer;

const READ_CHUNK: usize = 4096;

/// Routes inbound calls to application code.
///
/// Both methods run on the connection's task and must not block; hand the
/// [`Responder`] to another thread for slow work.
pub trait Dispatcher<C: Codec = MsgpackCodec>: Send + Sync + 'static {
    /// Handle a request. `responder` must eventually be answered or dropped.
    fn dispatch(&self, method: &str, params: Vec<Value>, responder: Responder<C>);

    /// Handle a notification. No reply is possible.
    fn notify(&self, method: &str, params: Vec<Value>) {
        tracing::debug!(method, params = params.len(), "Dispatcher ignoring notification");
    }
}

/// A bound, not yet serving, listener.
pub struct Server<C: Codec = MsgpackCodec> {
    listener: TcpListener,
    codec: C,
    config: ServerConfig,
}

impl Server<MsgpackCodec> {
    /// Bind to `address` with the MessagePack codec.
    pub async fn bind(address: &str, config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_codec(address, MsgpackCodec, config).await
    }
}

impl<C: Codec> Server<C> {
    /// Bind to `address` with a custom codec.
    pub async fn bind_with_codec(
        address: &str,
        codec: C,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.to_string(),
                source,
            })?;
        tracing::debug!(address, "Server bound");
        Ok(Self {
            listener,
            codec,
            config,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting connections on the current Tokio runtime.
    ///
    /// Serving stops when the returned handle is shut down or dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn serve<D: Dispatcher<C>>(self, dispatcher: D) -> Result<ServerHandle, ServerError> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            self.listener,
            self.codec,
            self.config,
            Arc::new(dispatcher),
            shutdown_rx,
        ));
        tracing::debug!(%local_addr, "Server serving");
        Ok(ServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server accepts connections on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every connection and wait for the accept loop
    /// to exit.
    pub async fn shutdown(mut self) {
        self.signal();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn signal(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.signal();
    }
}

async fn accept_loop<C: Codec, D: Dispatcher<C>>(
    listener: TcpListener,
    codec: C,
    config: ServerConfig,
    dispatcher: Arc<D>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!(connections = connections.len(), "accept_loop: shutting down");
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accept_loop: connection accepted");
                    connections.spawn(connection_task(
                        stream,
                        peer,
                        codec.clone(),
                        config.max_frame_size,
                        dispatcher.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept_loop: accept failed"),
            }
        }
    }
    connections.shutdown().await;
}

async fn connection_task<C: Codec, D: Dispatcher<C>>(
    stream: TcpStream,
    peer: SocketAddr,
    codec: C,
    max_frame_size: usize,
    dispatcher: Arc<D>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "connection_task: set_nodelay failed");
    }
    let (mut reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    // Outlives this task while responders are still unanswered.
    tokio::spawn(write_task(writer, outbound_rx, peer));

    let mut decoder = FrameDecoder::new(codec.clone(), max_frame_size);
    'read: loop {
        decoder.buffer_mut().reserve(READ_CHUNK);
        match reader.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                tracing::debug!(%peer, "connection_task: peer closed connection");
                break;
            }
            Ok(_) => loop {
                match decoder.next_value() {
                    Ok(Some(value)) => route(value, &codec, dispatcher.as_ref(), peer, || {
                        let outbound = outbound_tx.clone();
                        move |reply: Bytes| {
                            if outbound.send(reply).is_err() {
                                tracing::debug!(%peer, "reply dropped: connection closed");
                            }
                        }
                    }),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(%peer, error = %e, "connection_task: undecodable stream");
                        break 'read;
                    }
                }
            },
            Err(e) => {
                tracing::debug!(%peer, error = %e, "connection_task: read failed");
                break;
            }
        }
    }
}

/// Hand one decoded message to the dispatcher. `reply_sender` builds the
/// reply path for a request.
fn route<C, D, F, R>(value: Value, codec: &C, dispatcher: &D, peer: SocketAddr, reply_sender: F)
where
    C: Codec,
    D: Dispatcher<C>,
    F: FnOnce() -> R,
    R: FnOnce(Bytes) + Send + 'static,
{
    match Message::from_value(value) {
        Ok(Message::Request { id, method, params }) => {
            tracing::trace!(%peer, id, %method, "route: request");
            let responder = Responder::new(id, codec.clone(), reply_sender());
            dispatcher.dispatch(&method, params, responder);
        }
        Ok(Message::Notification { method, params }) => {
            tracing::trace!(%peer, %method, "route: notification");
            dispatcher.notify(&method, params);
        }
        Ok(Message::Response { id, .. }) => {
            tracing::debug!(%peer, id, "route: ignoring response sent to server");
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "route: discarding malformed message");
        }
    }
}

async fn write_task(
    mut stream: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    peer: SocketAddr,
) {
    while let Some(reply) = outbound.recv().await {
        if let Err(e) = stream.write_all(&reply).await {
            tracing::debug!(%peer, error = %e, "write_task: write failed");
            return;
        }
    }
    let _ = stream.shutdown().await;
}
