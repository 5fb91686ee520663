//! Responder: server-side handle for answering one request.
//!
//! Every inbound request comes with a `Responder` that must be answered with
//! either [`Responder::result`] or [`Responder::error`]. A responder dropped
//! without an answer sends [`NO_RESPONSE_ERROR`] so the caller never waits on
//! a reply that will not come.
//!
//! # Example
//!
//! ```rust,ignore
//! // Immediate reply
//! fn dispatch(&self, method: &str, params: Vec<Value>, responder: Responder) {
//!     responder.result(params.len() as i64);
//! }
//!
//! // Deferred reply: hand the responder to a worker thread
//! std::thread::spawn(move || responder.result(expensive()));
//! ```

use bytes::Bytes;
use mprpc_core::{Codec, Message, MsgpackCodec, Value};

/// Error value sent when a responder is dropped unanswered.
pub const NO_RESPONSE_ERROR: &str = "NoResponseError: request was dropped without a reply";

/// Delivers an encoded reply to wherever the request came from.
type ReplySender = Box<dyn FnOnce(Bytes) + Send>;

/// Answers one request exactly once.
///
/// `Send`, so a dispatcher may answer from any thread.
pub struct Responder<C: Codec = MsgpackCodec> {
    id: u32,
    codec: C,
    /// Taken by the first answer.
    sender: Option<ReplySender>,
}

impl<C: Codec> Responder<C> {
    /// Create a responder that hands the encoded reply for request `id` to
    /// `sender`.
    pub fn new(id: u32, codec: C, sender: impl FnOnce(Bytes) + Send + 'static) -> Self {
        Self {
            id,
            codec,
            sender: Some(Box::new(sender)),
        }
    }

    /// Request id this responder answers.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Reply with a successful result.
    pub fn result(mut self, result: impl Into<Value>) {
        self.respond(Value::Nil, result.into());
    }

    /// Reply with an application error. A `Nil` error is sent as the string
    /// `"unknown error"` so the reply is never mistaken for a success.
    pub fn error(mut self, error: impl Into<Value>) {
        let error = match error.into() {
            Value::Nil => Value::from("unknown error"),
            error => error,
        };
        self.respond(error, Value::Nil);
    }

    fn respond(&mut self, error: Value, result: Value) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        let reply = Message::Response {
            id: self.id,
            error,
            result,
        };
        let bytes = match self.codec.encode(&reply.into_value()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(id = self.id, error = %e, "Responder failed to encode reply");
                let fallback = Message::Response {
                    id: self.id,
                    error: Value::from(format!("EncodeError: {}", e)),
                    result: Value::Nil,
                };
                match self.codec.encode(&fallback.into_value()) {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                }
            }
        };

        sender(bytes);
    }
}

impl<C: Codec> Drop for Responder<C> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            tracing::warn!(id = self.id, "Responder dropped without reply");
            self.respond(Value::from(NO_RESPONSE_ERROR), Value::Nil);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use tokio::sync::mpsc;

    fn channel_responder(id: u32) -> (Responder, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let responder = Responder::new(id, MsgpackCodec, move |bytes| {
            let _ = tx.send(bytes);
        });
        (responder, rx)
    }

    fn reply(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Message {
        let bytes = rx.try_recv().expect("reply should be written");
        let value = MsgpackCodec.decode(&bytes).expect("decode reply");
        Message::from_value(value).expect("valid message")
    }

    #[test]
    fn test_result_sends_response() {
        let (responder, mut rx) = channel_responder(7);
        responder.result(42);
        assert_eq!(
            reply(&mut rx),
            Message::Response {
                id: 7,
                error: Value::Nil,
                result: Value::from(42),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_error_sends_error_response() {
        let (responder, mut rx) = channel_responder(3);
        responder.error("boom");
        match reply(&mut rx) {
            Message::Response { id, error, result } => {
                assert_eq!(id, 3);
                assert_eq!(error, Value::from("boom"));
                assert!(result.is_nil());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_nil_error_is_replaced() {
        let (responder, mut rx) = channel_responder(1);
        responder.error(Value::Nil);
        match reply(&mut rx) {
            Message::Response { error, .. } => assert!(!error.is_nil()),
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_sends_no_response_error() {
        let (responder, mut rx) = channel_responder(9);
        drop(responder);
        match reply(&mut rx) {
            Message::Response { id, error, .. } => {
                assert_eq!(id, 9);
                assert_eq!(error, Value::from(NO_RESPONSE_ERROR));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_connection_is_tolerated() {
        let (responder, rx) = channel_responder(2);
        drop(rx);
        responder.result("late");
    }

    #[test]
    fn test_sender_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let responder = Responder::new(4, MsgpackCodec, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        responder.result(Value::Nil);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
