//! # Evloop
//!
//! A timer-driven discrete-event loop for Rust.
//!
//! Evloop is the scheduling primitive for simulated or test-harness
//! timelines: callers register callbacks to run after relative delays, and
//! a single lazily re-armed timer wakes the loop to dispatch everything due,
//! in time order, with FIFO tie-breaking.
//!
//! ## Core Concepts
//!
//! - **EventLoop**: a cloneable handle over one shared pending set. Events
//!   added before `start()` hold relative delays anchored to the start epoch.
//! - **Single armed timer**: at most one outstanding timer exists at any
//!   instant, set for the earliest pending event; insertions that displace
//!   the head replace it, and each drain re-arms for whatever remains.
//! - **Lazy cancellation**: `cancel()` marks an event; the drain skips and
//!   drops it when its turn comes. No heap surgery, no races.
//! - **Event-Driven observability**: the loop broadcasts strongly-typed
//!   [`LoopEvent`](events::LoopEvent)s for every lifecycle transition and
//!   dispatch, which applications and tests can subscribe to.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use evloop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ev = EventLoop::new(LoopConfig::default());
//!
//!     // Delays added before start() are relative to the start epoch,
//!     // and may be negative ("already overdue").
//!     for delay in [5.0, 4.0, 10.0, -1.0, 0.0, 9.0, 3.0] {
//!         ev.add_event(delay, move || println!("time {delay}"));
//!     }
//!
//!     ev.start();
//!     tokio::time::sleep(std::time::Duration::from_secs(11)).await;
//!     ev.stop();
//! }
//! ```

pub const ENGINE_NAME: &str = "Evloop Engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Declare all the modules in the crate.
pub mod common;
pub mod config;
pub mod engine;
pub mod events;
pub mod time;

mod queue;

/// A prelude module for easy importing of the most common evloop types.
pub mod prelude {
    pub use crate::common::EventId;
    pub use crate::config::LoopConfig;
    pub use crate::engine::EventLoop;
    pub use crate::events::LoopEvent;
    pub use crate::time::Timestamp;
}
