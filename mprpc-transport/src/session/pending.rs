//! In-flight call records and their one-shot result slots.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mprpc_core::{RpcError, Value};
use parking_lot::{Condvar, Mutex};

/// Final outcome of a call.
pub(crate) type CallOutcome = Result<Value, RpcError>;

/// One-shot rendezvous between the resolver and the blocked caller.
///
/// Resolved at most once; later resolutions are ignored.
#[derive(Default)]
pub(crate) struct CallSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

#[derive(Default)]
struct SlotState {
    resolved: bool,
    outcome: Option<CallOutcome>,
}

impl CallSlot {
    /// Store the outcome and wake the caller. Returns `false` if the slot
    /// was already resolved.
    pub fn resolve(&self, outcome: CallOutcome) -> bool {
        let mut state = self.state.lock();
        if state.resolved {
            return false;
        }
        state.resolved = true;
        state.outcome = Some(outcome);
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Block until resolved, or until `timeout` elapses, and take the outcome.
    ///
    /// Returns `None` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<CallOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while !state.resolved {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() && !state.resolved {
                        return None;
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
        state.outcome.take()
    }
}

/// Record of one outstanding call.
pub(crate) struct PendingCall {
    pub method: String,
    pub slot: Arc<CallSlot>,
    pub started: Instant,
}

impl PendingCall {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            slot: Arc::new(CallSlot::default()),
            started: Instant::now(),
        }
    }

    /// Resolve the call, logging how long it was outstanding.
    pub fn resolve(self, id: u32, outcome: CallOutcome) {
        tracing::debug!(
            id,
            method = %self.method,
            ok = outcome.is_ok(),
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "PendingCall resolved"
        );
        self.slot.resolve(outcome);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_slot_resolves_once() {
        let slot = CallSlot::default();
        assert!(slot.resolve(Ok(Value::from(1))));
        assert!(!slot.resolve(Err(RpcError::ConnectionClosed)));
        assert_eq!(slot.wait(None), Some(Ok(Value::from(1))));
    }

    #[test]
    fn test_slot_wakes_blocked_waiter() {
        let slot = Arc::new(CallSlot::default());
        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        slot.resolve(Err(RpcError::ConnectFailed));
        let outcome = waiter.join().expect("waiter thread");
        assert_eq!(outcome, Some(Err(RpcError::ConnectFailed)));
    }

    #[test]
    fn test_slot_times_out() {
        let slot = CallSlot::default();
        let started = Instant::now();
        assert_eq!(slot.wait(Some(Duration::from_millis(30))), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
