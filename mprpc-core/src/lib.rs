//! # mprpc-core
//!
//! Value model, message envelopes and codec for the mprpc MessagePack-RPC
//! client and server.
//!
//! This crate performs no I/O:
//!
//! - **Value model**: [`Value`] and [`ValueMap`], the typed representation of
//!   everything exchanged with a peer
//! - **Messages**: [`Message`], the request/response/notification envelopes
//! - **Codec**: the [`Codec`] trait, the [`MsgpackCodec`] implementation and
//!   the streaming [`FrameDecoder`]
//! - **Errors**: [`RpcError`], the failure kinds a remote call reports

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod error;
mod message;
mod value;

// Codec exports
pub use codec::{Codec, CodecError, DEFAULT_MAX_FRAME_SIZE, FrameDecoder, MsgpackCodec};

// Error exports
pub use error::{RpcError, RpcResult};

// Message exports
pub use message::{Message, MessageError, NOTIFY, REQUEST, RESPONSE};

// Value exports
pub use value::{Value, ValueMap};
