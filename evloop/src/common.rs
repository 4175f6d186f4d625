//! Contains common, primitive types and a prelude for easy importing.
//!
//! This module defines the handle type used to uniquely identify scheduled
//! events within the loop. Using a versioned slotmap key instead of a bare
//! integer prevents stale-handle bugs: once an event has been dispatched or
//! discarded, its key can never accidentally refer to a later event.

use slotmap::new_key_type;

new_key_type! {
    /// Uniquely and safely identifies a scheduled event within the loop.
    ///
    /// This key is returned by [`EventLoop::add_event`](crate::engine::EventLoop::add_event)
    /// and can be passed to [`EventLoop::cancel`](crate::engine::EventLoop::cancel).
    /// Keys are versioned and never reused, so cancelling an event that has
    /// already run is always a harmless no-op.
    pub struct EventId;
}

/// A function closure bound with its arguments, executed when its event
/// comes due. Invoked with no further parameters at dispatch time.
pub type Action = Box<dyn FnMut() + Send + Sync>;
