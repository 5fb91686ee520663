//! Writer bookkeeping shared by the Tokio sockets.
//!
//! Tracks the channel into the writer task, the background tasks to abort on
//! close, and how many handed-off messages have reached the network so a
//! caller can wait for the writer to catch up.

use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct OutboundState {
    /// Sender feeding the writer task; present only while connected.
    writer: Option<mpsc::UnboundedSender<Bytes>>,

    /// Background tasks to abort on close.
    tasks: Vec<JoinHandle<()>>,

    /// Set once by `close`; the socket is not reusable.
    closed: bool,

    /// Messages accepted by the writer channel.
    submitted: u64,

    /// Messages fully written by the writer task.
    written: u64,

    /// The writer task has exited.
    writer_done: bool,
}

#[derive(Default)]
pub(crate) struct Outbound {
    state: Mutex<OutboundState>,
    progress: Condvar,
}

impl Outbound {
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Track a background task. Returns `false` (and aborts the task) if the
    /// socket was closed in the meantime.
    pub(crate) fn track(&self, task: JoinHandle<()>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            task.abort();
            return false;
        }
        state.tasks.push(task);
        true
    }

    /// Install the writer channel and its task. Returns `false` if the socket
    /// was closed while connecting.
    pub(crate) fn install(
        &self,
        writer: mpsc::UnboundedSender<Bytes>,
        task: impl FnOnce() -> JoinHandle<()>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.writer = Some(writer);
        state.tasks.push(task());
        true
    }

    pub(crate) fn send(&self, message: Bytes) {
        let mut state = self.state.lock();
        let len = message.len();
        let accepted = match &state.writer {
            Some(writer) => writer.send(message).is_ok(),
            None => {
                tracing::debug!(len, "socket dropping message: not connected");
                return;
            }
        };
        if accepted {
            state.submitted += 1;
        } else {
            tracing::debug!(len, "socket dropping message: writer task has exited");
        }
    }

    pub(crate) fn record_written(&self) {
        self.state.lock().written += 1;
        self.progress.notify_all();
    }

    pub(crate) fn writer_finished(&self) {
        self.state.lock().writer_done = true;
        self.progress.notify_all();
    }

    /// Wait until every accepted message has been written.
    ///
    /// Returns `false` on timeout, or if the writer exited with messages
    /// still unwritten.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.written >= state.submitted {
                return true;
            }
            if state.writer_done {
                return false;
            }
            if self.progress.wait_until(&mut state, deadline).timed_out() {
                return state.written >= state.submitted;
            }
        }
    }

    /// Close abortively: unwritten messages are discarded.
    pub(crate) fn close(&self) -> bool {
        let (was_open, tasks) = {
            let mut state = self.state.lock();
            let was_open = !state.closed;
            state.closed = true;
            state.writer = None;
            state.writer_done = true;
            (was_open, std::mem::take(&mut state.tasks))
        };
        self.progress.notify_all();
        for task in tasks {
            task.abort();
        }
        was_open
    }
}
