//! # mprpc-transport
//!
//! Client-side connection handling and call correlation for MessagePack-RPC,
//! plus Tokio TCP and UDP servers.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                Client / Server                   │  façades
//! ├──────────────────────────────────────────────────┤
//! │  Session: request ids, pending calls, blocking   │  correlation
//! ├──────────────────────────────────────────────────┤
//! │  Transport: Idle → Connecting → Connected        │  latency hiding
//! │             send queue flushed on connect        │
//! ├──────────────────────────────────────────────────┤
//! │  Socket: TcpSocket / UdpSocket on Tokio          │  I/O
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Values, messages and the codec live in `mprpc-core` and are re-exported
//! here.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod client;
mod config;
mod error;
mod server;
mod session;

/// Socket collaborator traits and the TCP and UDP implementations.
pub mod socket;

/// Connection state machine.
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig, SessionConfig, SocketConfig};
pub use error::{ServerError, SocketError};
pub use server::{
    Dispatcher, MethodMap, NO_METHOD_ERROR, NO_RESPONSE_ERROR, Responder, Server, ServerHandle,
    UdpServer,
};
pub use session::Session;
pub use socket::{Socket, SocketEvents, TcpSocket, UdpSocket};
pub use transport::{PendingQueue, Transport, TransportListener, TransportMetrics, TransportState};

pub use mprpc_core::{
    Codec, CodecError, DEFAULT_MAX_FRAME_SIZE, FrameDecoder, Message, MessageError, MsgpackCodec,
    RpcError, RpcResult, Value, ValueMap,
};
