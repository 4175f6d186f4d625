//! The pending-event priority queue.
//!
//! Events are ordered by `(due, sequence)` ascending: earlier due times
//! first, and among events due at the identical instant, the one scheduled
//! first wins. Sequence numbers are unique, so the order is total and
//! dispatch is deterministic.
//!
//! The queue is owned by the engine and only ever touched under the loop's
//! lock; it is not a shared structure in its own right.

use crate::common::EventId;
use crate::time::Timestamp;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A scheduled entry in the pending set.
///
/// The entry carries only ordering data and the [`EventId`] of its action
/// record; the action itself (and its canceled flag) lives in the engine's
/// slotmap so that cancellation never has to dig into the heap.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    /// Strictly increasing creation counter, used only to break due-time ties.
    pub sequence: u64,
    /// Absolute due time on the loop's timeline. Relative until the loop
    /// starts and rebases the queue against the epoch origin.
    pub due: Timestamp,
    /// Handle of the action record for this entry.
    pub id: EventId,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .total_cmp(&other.due)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// Min-heap of pending events keyed by `(due, sequence)`.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Inserts an entry. O(log n), always succeeds.
    pub(crate) fn push(&mut self, event: Event) {
        self.heap.push(Reverse(event));
    }

    /// The entry with the smallest `(due, sequence)`, if any.
    pub(crate) fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|Reverse(e)| e)
    }

    /// Removes and returns the earliest entry.
    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    /// Shifts every due time by `offset`.
    ///
    /// Used when the loop starts: entries scheduled before start hold
    /// relative delays, and rebasing by the epoch origin converts them to
    /// absolute due times. A constant shift preserves the heap order.
    pub(crate) fn rebase(&mut self, offset: Timestamp) {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        for Reverse(event) in &mut entries {
            event.due += offset;
        }
        self.heap = entries.into();
    }
}
