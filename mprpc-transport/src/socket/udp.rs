//! UDP socket driven by a Tokio runtime.
//!
//! Every message travels as exactly one datagram, so no framing is needed:
//! each received datagram is decoded on its own. "Connecting" binds an
//! ephemeral local port and fixes the peer address; it fails only when the
//! address cannot be resolved or bound.
//!
//! Datagrams are not retransmitted. A lost request or reply leaves the call
//! outstanding until the session's call timeout, if one is configured.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use mprpc_core::{Codec, MsgpackCodec};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::outbound::Outbound;
use super::{Socket, SocketEvents, deliver};
use crate::config::SocketConfig;
use crate::error::SocketError;

/// Largest payload a UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A [`Socket`] over a connected Tokio `UdpSocket`.
pub struct UdpSocket<C: Codec = MsgpackCodec> {
    address: String,
    handle: Handle,
    codec: C,
    config: SocketConfig,
    outbound: Arc<Outbound>,
}

impl<C: Codec> UdpSocket<C> {
    /// Create an unbound socket for the peer at `address` (`host:port`).
    pub fn new(address: impl Into<String>, handle: Handle, codec: C, config: SocketConfig) -> Self {
        Self {
            address: address.into(),
            handle,
            codec,
            config,
            outbound: Arc::new(Outbound::default()),
        }
    }

    /// Peer address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns `true` while bound and writable.
    pub fn is_connected(&self) -> bool {
        self.outbound.is_connected()
    }
}

impl<C: Codec> Socket for UdpSocket<C> {
    fn try_connect(&self, events: Weak<dyn SocketEvents>) {
        if self.outbound.is_closed() {
            tracing::debug!(address = %self.address, "UdpSocket::try_connect on closed socket");
            return;
        }
        let task = self.handle.spawn(datagram_task(
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
            tracing::debug!(address = %self.address, "UdpSocket closing");
        }
    }
}

async fn bind_connected(address: &str) -> io::Result<tokio::net::UdpSocket> {
    let peer = tokio::net::lookup_host(address).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} did not resolve to any address", address),
        )
    })?;
    let local: SocketAddr = if peer.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = tokio::net::UdpSocket::bind(local).await?;
    socket.connect(peer).await?;
    Ok(socket)
}

async fn datagram_task<C: Codec>(
    address: String,
    codec: C,
    config: SocketConfig,
    outbound: Arc<Outbound>,
    events: Weak<dyn SocketEvents>,
) {
    let socket = match tokio::time::timeout(config.connect_timeout, bind_connected(&address)).await
    {
        Ok(Ok(socket)) => Arc::new(socket),
        Ok(Err(e)) => {
            tracing::debug!(%address, error = %e, "datagram_task: bind failed");
            deliver(&events, |ev| ev.on_connect_failed());
            return;
        }
        Err(_) => {
            tracing::debug!(%address, "datagram_task: address resolution timed out");
            deliver(&events, |ev| ev.on_connect_failed());
            return;
        }
    };

    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let installed = outbound.install(writer_tx, || {
        tokio::spawn(send_task(
            socket.clone(),
            writer_rx,
            outbound.clone(),
            events.clone(),
        ))
    });
    if !installed {
        tracing::debug!(%address, "datagram_task: socket closed while binding");
        return;
    }

    tracing::debug!(%address, "datagram_task: bound");
    deliver(&events, |ev| ev.on_connected());

    recv_loop(socket, codec, events).await;
}

async fn send_task(
    socket: Arc<tokio::net::UdpSocket>,
    mut messages: mpsc::UnboundedReceiver<Bytes>,
    outbound: Arc<Outbound>,
    events: Weak<dyn SocketEvents>,
) {
    while let Some(message) = messages.recv().await {
        if let Err(e) = socket.send(&message).await {
            tracing::debug!(len = message.len(), error = %e, "send_task: send failed");
            outbound.writer_finished();
            deliver(&events, |ev| ev.on_failed(SocketError::Io(e)));
            return;
        }
        outbound.record_written();
    }
    outbound.writer_finished();
}

async fn recv_loop<C: Codec>(
    socket: Arc<tokio::net::UdpSocket>,
    codec: C,
    events: Weak<dyn SocketEvents>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => match codec.decode(&buf[..n]) {
                Ok(value) => deliver(&events, |ev| ev.on_message_received(value)),
                // A datagram stands alone; a bad one does not poison the next.
                Err(e) => tracing::debug!(n, error = %e, "recv_loop: ignoring malformed datagram"),
            },
            Err(e) => {
                // Includes ICMP port unreachable reported on a connected socket.
                tracing::debug!(error = %e, "recv_loop: receive failed");
                deliver(&events, |ev| ev.on_failed(SocketError::Io(e)));
                return;
            }
        }
    }
}
