//! Error types for socket and server operations.

use std::io;

use mprpc_core::CodecError;
use thiserror::Error;

/// Errors a socket reports through
/// [`SocketEvents::on_failed`](crate::SocketEvents::on_failed).
#[derive(Error, Debug)]
pub enum SocketError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Inbound bytes could not be decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors that can occur while running a server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding the listening socket failed
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested listen address.
        address: String,
        /// Underlying error.
        source: io::Error,
    },

    /// Reading the bound address failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
