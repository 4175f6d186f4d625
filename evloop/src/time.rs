//! Timeline primitives for the event loop.
//!
//! The loop does not deal in wall-clock dates. All scheduling happens on a
//! single monotonic timeline measured in fractional seconds from the moment
//! the loop was constructed. Delays may be negative ("already overdue"), so
//! the timeline scalar is a signed float rather than a `Duration`.

use tokio::time::Instant;

/// A point on the loop's timeline, in seconds since the clock's origin.
pub type Timestamp = f64;

/// A monotonic clock anchored at loop construction.
///
/// Built on [`tokio::time::Instant`] so that Tokio's paused test clock
/// (`start_paused = true`) drives the loop deterministically in tests.
#[derive(Debug, Clone, Copy)]
pub struct LoopClock {
    origin: Instant,
}

impl LoopClock {
    /// Creates a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Samples the current timeline position.
    pub fn now(&self) -> Timestamp {
        (Instant::now() - self.origin).as_secs_f64()
    }
}

impl Default for LoopClock {
    fn default() -> Self {
        Self::new()
    }
}
