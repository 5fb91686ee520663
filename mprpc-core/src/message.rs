//! MessagePack-RPC message envelopes.
//!
//! Every message on the wire is an array whose first element is a type tag:
//!
//! ```text
//! Request:      [0, msgid, method, params]
//! Response:     [1, msgid, error, result]
//! Notification: [2, method, params]
//! ```
//!
//! A response with a non-nil `error` reports a remote failure and its
//! `result` carries no meaning.

use crate::value::Value;

/// Type tag of a request message.
pub const REQUEST: i64 = 0;
/// Type tag of a response message.
pub const RESPONSE: i64 = 1;
/// Type tag of a notification message.
pub const NOTIFY: i64 = 2;

/// Errors produced when a value is not a well-formed message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The envelope is not an array.
    #[error("message is a {found}, expected array")]
    NotAnArray {
        /// Type name of the value found instead.
        found: &'static str,
    },

    /// The envelope has the wrong number of elements for its type.
    #[error("message type {kind} expects {expected} elements, got {actual}")]
    BadArity {
        /// Message type tag.
        kind: i64,
        /// Required element count.
        expected: usize,
        /// Actual element count.
        actual: usize,
    },

    /// The type tag is missing or unknown.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The message id is not an integer in `u32` range.
    #[error("invalid message id: {0}")]
    InvalidId(String),

    /// The method name is not raw bytes.
    #[error("method name is a {found}, expected raw")]
    InvalidMethod {
        /// Type name of the value found instead.
        found: &'static str,
    },

    /// The parameters are not an array.
    #[error("params is a {found}, expected array")]
    InvalidParams {
        /// Type name of the value found instead.
        found: &'static str,
    },
}

/// A decoded MessagePack-RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A call expecting a response carrying the same id.
    Request {
        /// Correlation id.
        id: u32,
        /// Remote procedure name.
        method: String,
        /// Positional arguments.
        params: Vec<Value>,
    },
    /// The answer to a request.
    Response {
        /// Id of the request being answered.
        id: u32,
        /// Remote error, `Nil` on success.
        error: Value,
        /// Return value, meaningful only when `error` is `Nil`.
        result: Value,
    },
    /// A one-way call; no response is sent.
    Notification {
        /// Remote procedure name.
        method: String,
        /// Positional arguments.
        params: Vec<Value>,
    },
}

impl Message {
    /// Build the wire envelope for this message.
    pub fn into_value(self) -> Value {
        match self {
            Message::Request { id, method, params } => Value::Array(vec![
                Value::Integer(REQUEST),
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            Message::Response { id, error, result } => Value::Array(vec![
                Value::Integer(RESPONSE),
                Value::from(id),
                error,
                result,
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                Value::Integer(NOTIFY),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    /// Parse a wire envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`MessageError`] describing the first structural problem.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(MessageError::NotAnArray {
                    found: other.type_name(),
                });
            }
        };

        let kind = match items.first() {
            Some(Value::Integer(kind)) => *kind,
            Some(other) => return Err(MessageError::UnknownType(other.to_string())),
            None => return Err(MessageError::UnknownType("<empty>".to_string())),
        };

        let expected = match kind {
            REQUEST | RESPONSE => 4,
            NOTIFY => 3,
            other => return Err(MessageError::UnknownType(other.to_string())),
        };
        if items.len() != expected {
            return Err(MessageError::BadArity {
                kind,
                expected,
                actual: items.len(),
            });
        }

        let mut fields = items.into_iter().skip(1);
        let mut next = || fields.next().unwrap_or_default();

        Ok(match kind {
            REQUEST => {
                let id = parse_id(next())?;
                let method = parse_method(next())?;
                let params = parse_params(next())?;
                Message::Request { id, method, params }
            }
            RESPONSE => {
                let id = parse_id(next())?;
                let error = next();
                let result = next();
                Message::Response { id, error, result }
            }
            _ => {
                let method = parse_method(next())?;
                let params = parse_params(next())?;
                Message::Notification { method, params }
            }
        })
    }
}

fn parse_id(value: Value) -> Result<u32, MessageError> {
    value
        .as_i64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| MessageError::InvalidId(value.to_string()))
}

fn parse_method(value: Value) -> Result<String, MessageError> {
    match value {
        Value::Raw(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        other => Err(MessageError::InvalidMethod {
            found: other.type_name(),
        }),
    }
}

fn parse_params(value: Value) -> Result<Vec<Value>, MessageError> {
    match value {
        Value::Array(params) => Ok(params),
        other => Err(MessageError::InvalidParams {
            found: other.type_name(),
        }),
    }
}
