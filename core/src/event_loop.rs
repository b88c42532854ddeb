//! Delivery of completions on the thread that owns the event loop.
//!
//! Workers never run user callbacks. They push a `Completion` into a channel
//! and whoever holds the `EventLoop` (typically the UI thread) drains it.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::call::CallShared;
use crate::outcome::{Callback, Outcome};

pub(crate) struct Completion {
    pub(crate) call: Arc<CallShared>,
    pub(crate) callback: Callback,
    pub(crate) outcome: Outcome,
}

/// Receiving end of a dispatcher's completion channel.
///
/// Not `Sync`: exactly one thread drives it.
pub struct EventLoop {
    receiver: Receiver<Completion>,
}

impl EventLoop {
    pub(crate) fn new(receiver: Receiver<Completion>) -> Self {
        EventLoop { receiver }
    }

    // Returns whether the callback ran. A call cancelled after its outcome
    // was queued is skipped here.
    fn deliver(&self, completion: Completion) -> bool {
        let Completion {
            call,
            callback,
            outcome,
        } = completion;
        if !call.mark_delivered() {
            log::debug!("skipping callback of cancelled call {}", call.id);
            return false;
        }
        log::debug!("delivering call {} ({})", call.id, call.tag);
        callback(outcome);
        true
    }

    /// Run every callback already queued, without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            if self.deliver(completion) {
                ran += 1;
            }
        }
        ran
    }

    /// Wait up to `timeout` for at least one completion, then run everything
    /// queued. Returns how many callbacks ran.
    pub fn run_timeout(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => usize::from(self.deliver(completion)) + self.run_pending(),
            Err(_) => 0,
        }
    }

    /// Keep delivering until `done` returns true or `timeout` elapses.
    /// Returns the final value of `done`.
    pub fn run_until<F>(&self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    self.deliver(completion);
                }
                Err(RecvTimeoutError::Timeout) => return done(),
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
        true
    }
}
