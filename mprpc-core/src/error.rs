//! Error type returned by remote calls.

use crate::codec::CodecError;
use crate::value::Value;

/// Ways a remote call can fail.
///
/// Transport-level kinds (`ConnectFailed`, `ConnectionClosed`,
/// `TransportFailure`) are broadcast to every call outstanding on the
/// connection, so the type is `Clone`. `RemoteError` is kept apart from them:
/// it means the peer ran the procedure and reported an application error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The connection could not be established.
    #[error("connection failed")]
    ConnectFailed,

    /// The connection was closed, locally or by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The socket reported an error other than a clean close.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// No reply arrived before the call deadline.
    #[error("call timed out")]
    Timeout,

    /// The peer executed the call and reported an error.
    #[error("remote error: {0}")]
    RemoteError(Value),

    /// The transport is closed; the message was not queued.
    #[error("send rejected: transport is closed")]
    SendRejected,

    /// The outbound message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl RpcError {
    /// Returns `true` for failures of the connection rather than of the call.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::ConnectFailed
                | RpcError::ConnectionClosed
                | RpcError::TransportFailure(_)
                | RpcError::SendRejected
        )
    }
}

/// Result type for remote calls.
pub type RpcResult<T> = Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display() {
        assert_eq!(RpcError::ConnectFailed.to_string(), "connection failed");
        assert_eq!(RpcError::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(
            RpcError::TransportFailure("reset by peer".to_string()).to_string(),
            "transport failure: reset by peer"
        );
        assert_eq!(RpcError::Timeout.to_string(), "call timed out");
        assert_eq!(
            RpcError::RemoteError(Value::from("boom")).to_string(),
            r#"remote error: "boom""#
        );
    }

    #[test]
    fn test_remote_error_is_not_transport() {
        assert!(!RpcError::RemoteError(Value::Nil).is_transport());
        assert!(!RpcError::Timeout.is_transport());
        assert!(RpcError::SendRejected.is_transport());
        assert!(RpcError::TransportFailure(String::new()).is_transport());
    }
}
