//! Datagram server: one request or notification per datagram, replies sent
//! back to the datagram's source address.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use mprpc_core::{Codec, MsgpackCodec};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use super::{Dispatcher, ServerHandle, route};
use crate::error::ServerError;
use crate::socket::udp::MAX_DATAGRAM_SIZE;

/// A bound, not yet serving, UDP socket.
pub struct UdpServer<C: Codec = MsgpackCodec> {
    socket: UdpSocket,
    codec: C,
}

impl UdpServer<MsgpackCodec> {
    /// Bind to `address` with the MessagePack codec.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        Self::bind_with_codec(address, MsgpackCodec).await
    }
}

impl<C: Codec> UdpServer<C> {
    /// Bind to `address` with a custom codec.
    pub async fn bind_with_codec(address: &str, codec: C) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.to_string(),
                source,
            })?;
        tracing::debug!(address, "UdpServer bound");
        Ok(Self { socket, codec })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Start receiving datagrams on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn serve<D: Dispatcher<C>>(self, dispatcher: D) -> Result<ServerHandle, ServerError> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(datagram_loop(
            Arc::new(self.socket),
            self.codec,
            Arc::new(dispatcher),
            shutdown_rx,
        ));
        tracing::debug!(%local_addr, "UdpServer serving");
        Ok(ServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

async fn datagram_loop<C: Codec, D: Dispatcher<C>>(
    socket: Arc<UdpSocket>,
    codec: C,
    dispatcher: Arc<D>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let reply_writer = tokio::spawn(reply_task(socket.clone(), reply_rx));

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!("datagram_loop: shutting down");
                break;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => match codec.decode(&buf[..n]) {
                    Ok(value) => route(value, &codec, dispatcher.as_ref(), peer, || {
                        let replies = reply_tx.clone();
                        move |reply: Bytes| {
                            if replies.send((reply, peer)).is_err() {
                                tracing::debug!(%peer, "reply dropped: server stopped");
                            }
                        }
                    }),
                    Err(e) => tracing::debug!(
                        %peer,
                        n,
                        error = %e,
                        "datagram_loop: ignoring malformed datagram"
                    ),
                },
                Err(e) => tracing::debug!(error = %e, "datagram_loop: recv_from failed"),
            }
        }
    }
    reply_writer.abort();
}

async fn reply_task(
    socket: Arc<UdpSocket>,
    mut replies: mpsc::UnboundedReceiver<(Bytes, SocketAddr)>,
) {
    while let Some((reply, peer)) = replies.recv().await {
        if let Err(e) = socket.send_to(&reply, peer).await {
            tracing::debug!(%peer, len = reply.len(), error = %e, "reply_task: send_to failed");
        }
    }
}
