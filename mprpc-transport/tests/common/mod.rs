//! Shared test doubles for transport and session tests.

#![allow(dead_code)]

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mprpc_transport::{
    Codec, Message, MsgpackCodec, Socket, SocketError, SocketEvents, TransportListener, Value,
};
use parking_lot::Mutex;

type SendHook = Box<dyn FnOnce(&Bytes) + Send>;

#[derive(Default)]
struct MockSocketState {
    connects: usize,
    closes: usize,
    sent: Vec<Bytes>,
    events: Option<Weak<dyn SocketEvents>>,
    on_send: Option<SendHook>,
}

/// Socket that records every operation and lets the test fire events.
///
/// Clones share state, so a test keeps one clone after handing the other
/// to a transport.
#[derive(Clone, Default)]
pub struct MockSocket {
    state: Arc<Mutex<MockSocketState>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    /// Sent messages decoded with the MessagePack codec.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .map(|bytes| {
                let value = MsgpackCodec.decode(bytes).expect("sent bytes decode");
                Message::from_value(value).expect("sent bytes form a message")
            })
            .collect()
    }

    /// Run `hook` on the next `try_send`, before recording it.
    pub fn on_next_send(&self, hook: impl FnOnce(&Bytes) + Send + 'static) {
        self.state.lock().on_send = Some(Box::new(hook));
    }

    /// The event sink handed over by `try_connect`.
    pub fn events(&self) -> Arc<dyn SocketEvents> {
        self.state
            .lock()
            .events
            .as_ref()
            .expect("try_connect was never called")
            .upgrade()
            .expect("event sink is gone")
    }

    pub fn fire_connected(&self) {
        self.events().on_connected();
    }

    pub fn fire_connect_failed(&self) {
        self.events().on_connect_failed();
    }

    pub fn fire_closed(&self) {
        self.events().on_closed();
    }

    pub fn fire_failed(&self, reason: &str) {
        let error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, reason.to_string());
        self.events().on_failed(SocketError::Io(error));
    }

    pub fn fire_message(&self, message: Message) {
        self.events().on_message_received(message.into_value());
    }

    pub fn fire_reply(&self, id: u32, result: Value) {
        self.fire_message(Message::Response {
            id,
            error: Value::Nil,
            result,
        });
    }
}

impl Socket for MockSocket {
    fn try_connect(&self, events: Weak<dyn SocketEvents>) {
        let mut state = self.state.lock();
        state.connects += 1;
        state.events = Some(events);
    }

    fn try_send(&self, message: Bytes) {
        let hook = self.state.lock().on_send.take();
        if let Some(hook) = hook {
            hook(&message);
        }
        self.state.lock().sent.push(message);
    }

    fn try_close(&self) {
        self.state.lock().closes += 1;
    }
}

/// Listener that records the events it receives.
#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<Value>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: &str) {
        self.events.lock().push(event.to_string());
    }
}

impl TransportListener for RecordingListener {
    fn on_connected(&self) {
        self.record("connected");
    }

    fn on_message_received(&self, message: Value) {
        self.record("message");
        self.messages.lock().push(message);
    }

    fn on_connect_failed(&self) {
        self.record("connect_failed");
    }

    fn on_closed(&self) {
        self.record("closed");
    }

    fn on_failed(&self, error: SocketError) {
        self.record(&format!("failed: {}", error));
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}

pub fn msg(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}
