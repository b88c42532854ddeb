//! Per-call lifecycle shared between the caller, the worker and the event loop.
//!
//! # Design
//! Each dispatched call owns one `CallState` cell. Every transition is a
//! compare-and-swap, which is what makes "exactly one callback, or none if
//! cancelled first" hold without a lock:
//!
//! ```text
//! Created -> Dispatched -> Completed -> Delivered
//!                  \            \
//!                   +------------+--> Cancelled
//! ```
//!
//! A call that reaches `Completed` has its outcome queued for the event loop;
//! cancelling it before the loop gets to it still suppresses the callback.
//! Once `Delivered`, cancellation is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::registry::CallRegistry;
use crate::tag::Tag;
use crate::transport::Transport;

/// Identifier of one dispatched call, unique per dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    Created = 0,
    Dispatched = 1,
    Completed = 2,
    Delivered = 3,
    Cancelled = 4,
}

impl CallState {
    fn from_u8(v: u8) -> CallState {
        match v {
            0 => CallState::Created,
            1 => CallState::Dispatched,
            2 => CallState::Completed,
            3 => CallState::Delivered,
            _ => CallState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Delivered | CallState::Cancelled)
    }
}

/// State shared by every party interested in one call.
#[derive(Debug)]
pub(crate) struct CallShared {
    pub(crate) id: CallId,
    pub(crate) tag: Tag,
    state: AtomicU8,
}

impl CallShared {
    pub(crate) fn new(id: CallId, tag: Tag) -> Self {
        CallShared {
            id,
            tag,
            state: AtomicU8::new(CallState::Created as u8),
        }
    }

    pub(crate) fn state(&self) -> CallState {
        CallState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state() == CallState::Cancelled
    }

    fn transition(&self, from: CallState, to: CallState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_dispatched(&self) -> bool {
        self.transition(CallState::Created, CallState::Dispatched)
    }

    /// Worker side: claim the right to queue an outcome.
    pub(crate) fn mark_completed(&self) -> bool {
        self.transition(CallState::Dispatched, CallState::Completed)
    }

    /// Event-loop side: claim the right to run the callback.
    pub(crate) fn mark_delivered(&self) -> bool {
        self.transition(CallState::Completed, CallState::Delivered)
    }

    /// Returns `false` when the call already reached a terminal state.
    pub(crate) fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if CallState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                CallState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Token for one dispatched call.
///
/// Dropping the handle does not cancel the call.
#[derive(Clone)]
pub struct CallHandle {
    pub(crate) shared: Arc<CallShared>,
    pub(crate) registry: Arc<CallRegistry>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl CallHandle {
    pub fn id(&self) -> CallId {
        self.shared.id
    }

    pub fn tag(&self) -> &Tag {
        &self.shared.tag
    }

    pub fn state(&self) -> CallState {
        self.shared.state()
    }

    /// Cancel this call only. Returns whether it was still cancellable.
    pub fn cancel(&self) -> bool {
        self.registry.remove(&self.shared.tag, self.shared.id);
        let cancelled = self.shared.cancel();
        if cancelled {
            log::info!("cancelled call {} ({})", self.shared.id, self.shared.tag);
        }
        cancelled
    }

    /// Cancel every active call sharing this call's tag.
    pub fn cancel_tag(&self) -> usize {
        let calls = self.registry.take_tag(&self.shared.tag);
        let cancelled = calls.iter().filter(|c| c.cancel()).count();
        self.transport.cancel(&self.shared.tag);
        log::info!("cancelled {cancelled} call(s) tagged {}", self.shared.tag);
        cancelled
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.shared.id)
            .field("tag", &self.shared.tag)
            .field("state", &self.shared.state())
            .finish()
    }
}
