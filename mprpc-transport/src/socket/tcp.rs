//! TCP socket driven by a Tokio runtime.
//!
//! Each connection runs as background tasks on the runtime handle given at
//! construction:
//!
//! - `connection_task`: connects, installs the writer, then reads and decodes
//!   inbound values until the stream ends
//! - `write_task`: drains the outbound channel onto the stream in order
//!
//! `try_send` pushes onto an unbounded channel, so the caller never blocks
//! on network I/O. `flush` waits for the writer task to drain that channel.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use mprpc_core::{Codec, FrameDecoder, MsgpackCodec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::outbound::Outbound;
use super::{Socket, SocketEvents, deliver};
use crate::config::SocketConfig;
use crate::error::SocketError;

/// Read buffer growth per read call.
const READ_CHUNK: usize = 4096;

/// A [`Socket`] over a Tokio `TcpStream`.
pub struct TcpSocket<C: Codec = MsgpackCodec> {
    address: String,
    handle: Handle,
    codec: C,
    config: SocketConfig,
    outbound: Arc<Outbound>,
}

impl<C: Codec> TcpSocket<C> {
    /// Create an unconnected socket for `address` (`host:port`).
    pub fn new(address: impl Into<String>, handle: Handle, codec: C, config: SocketConfig) -> Self {
        Self {
            address: address.into(),
            handle,
            codec,
            config,
            outbound: Arc::new(Outbound::default()),
        }
    }

    /// Destination address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns `true` while a connection is established and writable.
    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }
}

impl<C: Codec> Socket for TcpSocket<C> {
    fn try_connect(&self, events: Weak<dyn SocketEvents>) {
        if self.outbound.is_closed() {
            tracing::debug!(address = %self.address, "TcpSocket::try_connect on closed socket");
            return;
        }
        let task = self.handle.spawn(connection_task(
            self.address.clone(),
            self.codec.clone(),
            self.config.clone(),
            self.outbound.clone(),
            events,
        ));
        self.outbound.track(task);
    }

    fn try_send(&self, message: Bytes) {
        self.outbound.send(message);
    }

    fn flush(&self, timeout: Duration) -> bool {
        self.outbound.flush(timeout)
    }

    fn try_close(&self) {
        if self.outbound.close() {
            tracing::debug!(address = %self.address, "TcpSocket closing");
        }
    }
}

async fn connection_task<C: Codec>(
    address: String,
    codec: C,
    config: SocketConfig,
    outbound: Arc<Outbound>,
    events: Weak<dyn SocketEvents>,
) {
    tracing::debug!(%address, "connection_task: connecting");
    let stream =
        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(%address, error = %e, "connection_task: connect failed");
                deliver(&events, |ev| ev.on_connect_failed());
                return;
            }
            Err(_) => {
                tracing::debug!(
                    %address,
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    "connection_task: connect timed out"
                );
                deliver(&events, |ev| ev.on_connect_failed());
                return;
            }
        };

    if config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "connection_task: set_nodelay failed");
        }
    }

    let (read_half, write_half) = stream.into_split();
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let installed = outbound.install(writer_tx, || {
        tokio::spawn(write_task(
            write_half,
            writer_rx,
            outbound.clone(),
            events.clone(),
        ))
    });
    if !installed {
        tracing::debug!(%address, "connection_task: socket closed while connecting");
        return;
    }

    tracing::debug!(%address, "connection_task: connected");
    deliver(&events, |ev| ev.on_connected());

    read_loop(read_half, codec, config.max_frame_size, events).await;
}

async fn write_task(
    mut stream: OwnedWriteHalf,
    mut messages: mpsc::UnboundedReceiver<Bytes>,
    outbound: Arc<Outbound>,
    events: Weak<dyn SocketEvents>,
) {
    while let Some(message) = messages.recv().await {
        if let Err(e) = stream.write_all(&message).await {
            tracing::debug!(error = %e, "write_task: write_all failed");
            outbound.writer_finished();
            deliver(&events, |ev| ev.on_failed(SocketError::Io(e)));
            return;
        }
        outbound.record_written();
    }
    outbound.writer_finished();
    let _ = stream.shutdown().await;
}

async fn read_loop<C: Codec>(
    mut stream: OwnedReadHalf,
    codec: C,
    max_frame_size: usize,
    events: Weak<dyn SocketEvents>,
) {
    let mut decoder = FrameDecoder::new(codec, max_frame_size);
    loop {
        decoder.buffer_mut().reserve(READ_CHUNK);
        match stream.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                tracing::debug!("read_loop: peer closed connection");
                deliver(&events, |ev| ev.on_closed());
                return;
            }
            Ok(n) => {
                tracing::trace!(n, buffered = decoder.buffered(), "read_loop: received bytes");
                loop {
                    match decoder.next_value() {
                        Ok(Some(value)) => deliver(&events, |ev| ev.on_message_received(value)),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(error = %e, "read_loop: undecodable stream");
                            deliver(&events, |ev| ev.on_failed(SocketError::Codec(e)));
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "read_loop: read failed");
                deliver(&events, |ev| ev.on_failed(SocketError::Io(e)));
                return;
            }
        }
    }
}
