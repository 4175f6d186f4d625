//! Defines the public event types broadcast by the loop.
//!
//! This module is the loop's observability surface. The engine publishes a
//! [`LoopEvent`] for every lifecycle transition and every dispatch, and an
//! application (or a test) subscribes via
//! [`EventLoop::subscribe`](crate::engine::EventLoop::subscribe) to watch the
//! timeline unfold without hooking the callbacks themselves.

use crate::common::EventId;
use crate::time::Timestamp;

/// Notifications emitted by the event loop as it runs.
///
/// Emission is best-effort: if no subscriber is listening the event is
/// silently dropped, and the loop never blocks on its subscribers.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// Fired when the loop transitions from stopped to running.
    Started {
        /// Timeline position captured as the epoch origin.
        epoch: Timestamp,
    },
    /// Fired when the loop transitions from running to stopped.
    Stopped {
        /// Number of pending events discarded without running.
        discarded: usize,
    },
    /// Fired when a new event is accepted into the pending set.
    EventScheduled {
        id: EventId,
        sequence: u64,
        /// Absolute due time if the loop is running, otherwise the relative
        /// delay that will be rebased at start.
        due: Timestamp,
    },
    /// Fired when a pending event is marked canceled.
    EventCanceled { id: EventId },
    /// Fired after an event's action has been executed.
    EventDispatched {
        id: EventId,
        sequence: u64,
        due: Timestamp,
        /// Timeline position at which the drain picked the event up.
        fired_at: Timestamp,
    },
    /// Fired when an event's action panicked. The panic is contained and
    /// the drain continues with the remaining due events.
    CallbackPanicked { id: EventId, sequence: u64 },
}
