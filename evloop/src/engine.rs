//! The core engine: a timer-driven discrete-event loop.
//!
//! An [`EventLoop`] keeps a min-heap of pending events and at most one armed
//! one-shot timer, set to fire at the due time of the earliest event. When
//! the timer fires it drains every event whose due time has passed, runs
//! their actions in `(due, sequence)` order, then re-arms for the next
//! pending event. Callers may add, cancel, start, and stop from any thread;
//! actions run sequentially on the timer's own task.

use crate::common::{Action, EventId};
use crate::config::LoopConfig;
use crate::events::LoopEvent;
use crate::queue::{Event, EventQueue};
use crate::time::{LoopClock, Timestamp};
use slotmap::SlotMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{error, info, trace};

/// An action record for a scheduled event.
///
/// Lives in the slotmap, not in the heap, so cancellation is a flag write
/// behind the loop lock rather than an O(n) heap removal.
struct EventRecord {
    action: Action,
    canceled: bool,
    sequence: u64,
}

/// The single outstanding one-shot timer.
///
/// `generation` ties the spawned timer task to this handle: a task whose
/// generation no longer matches was superseded or stopped and must exit
/// without draining. `fired` flips when the task wakes up, after which the
/// timer can no longer be usefully aborted and insertions leave it alone.
struct ArmedTimer {
    generation: u64,
    fired: bool,
    handle: AbortHandle,
}

/// Lock-protected loop state. Every field is read and written only while
/// holding the loop-wide mutex.
struct Inner {
    queue: EventQueue,
    records: SlotMap<EventId, EventRecord>,
    next_sequence: u64,
    epoch_origin: Option<Timestamp>,
    timer_generation: u64,
    armed: Option<ArmedTimer>,
    running: bool,
}

/// Outcome of one locked step of the drain cycle.
enum Step {
    /// A due, live event was extracted; run its action outside the lock.
    Run {
        id: EventId,
        sequence: u64,
        due: Timestamp,
        action: Action,
    },
    /// A due but canceled event was dropped; keep draining.
    Skip,
    /// Queue empty, loop stopped, or earliest event still in the future.
    Done,
}

/// The main event loop.
///
/// This struct is a cloneable handle: clones share the same pending set and
/// timer, so one can be captured by a callback to schedule further events
/// re-entrantly. The loop is constructed stopped; events added before
/// [`start`](EventLoop::start) hold relative delays that are anchored to the
/// epoch origin when the loop starts.
#[derive(Clone)]
pub struct EventLoop {
    state: Arc<Mutex<Inner>>,
    clock: LoopClock,
    runtime: Handle,
    label: Arc<str>,
    loop_events: broadcast::Sender<LoopEvent>,
}

impl EventLoop {
    /// Creates a new, stopped `EventLoop` with the given configuration.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime: the loop captures the
    /// current runtime handle so that timers can be armed later from
    /// arbitrary threads.
    pub fn new(config: LoopConfig) -> Self {
        let (loop_events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(Inner {
                queue: EventQueue::new(),
                records: SlotMap::with_key(),
                next_sequence: 0,
                epoch_origin: None,
                timer_generation: 0,
                armed: None,
                running: false,
            })),
            clock: LoopClock::new(),
            runtime: Handle::current(),
            label: config.label.into(),
            loop_events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.state.lock().expect("event loop state poisoned")
    }

    fn emit(&self, event: LoopEvent) {
        self.loop_events.send(event).ok();
    }

    /// Subscribes to the [`LoopEvent`] stream.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.loop_events.subscribe()
    }

    /// Whether the loop is currently dispatching.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Number of events currently pending (including canceled ones that the
    /// drain has not reached yet).
    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    /// The current position on the loop's timeline, in seconds.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The timeline position at which the loop last started, if running.
    pub fn epoch_origin(&self) -> Option<Timestamp> {
        self.lock().epoch_origin
    }

    /// Schedules `action` to run `delay_secs` from now.
    ///
    /// A negative delay means "already overdue": the event runs at the next
    /// drain opportunity, ordered before everything scheduled after it. If
    /// the loop has not started yet, the delay is interpreted relative to
    /// the eventual start epoch instead of the current instant.
    ///
    /// Returns the [`EventId`] handle for later cancellation.
    pub fn add_event(
        &self,
        delay_secs: f64,
        action: impl FnMut() + Send + Sync + 'static,
    ) -> EventId {
        let mut inner = self.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let due = if inner.running {
            self.clock.now() + delay_secs
        } else {
            // Relative until start() rebases the queue against the epoch.
            delay_secs
        };
        let id = inner.records.insert(EventRecord {
            action: Box::new(action),
            canceled: false,
            sequence,
        });
        inner.queue.push(Event { sequence, due, id });
        if inner.running {
            self.rearm_for_insert(&mut inner, id);
        }
        trace!(label = %self.label, sequence, due, "event scheduled");
        self.emit(LoopEvent::EventScheduled { id, sequence, due });
        id
    }

    /// Marks a pending event canceled.
    ///
    /// Lazy deletion: the entry stays in the heap and is dropped, without
    /// running, when the drain reaches it. Returns `true` if the event was
    /// still pending; cancelling a dispatched or already-canceled event is
    /// a no-op returning `false`.
    pub fn cancel(&self, id: EventId) -> bool {
        let mut inner = self.lock();
        match inner.records.get_mut(id) {
            Some(record) if !record.canceled => {
                record.canceled = true;
                trace!(label = %self.label, sequence = record.sequence, "event canceled");
                self.emit(LoopEvent::EventCanceled { id });
                true
            }
            _ => false,
        }
    }

    /// Starts dispatching. Idempotent.
    ///
    /// Captures the epoch origin, converts every pre-start relative delay
    /// into an absolute due time anchored at that epoch, and arms the timer
    /// for the earliest pending event.
    pub fn start(&self) {
        let mut inner = self.lock();
        if inner.running {
            return;
        }
        inner.running = true;
        let epoch = self.clock.now();
        inner.epoch_origin = Some(epoch);
        inner.queue.rebase(epoch);
        if !inner.queue.is_empty() {
            self.arm_timer_locked(&mut inner);
        }
        info!(label = %self.label, epoch, pending = inner.queue.len(), "event loop started");
        self.emit(LoopEvent::Started { epoch });
    }

    /// Stops dispatching and discards all pending work. Idempotent.
    ///
    /// The armed timer is aborted, scheduled-but-not-yet-run events are
    /// dropped without executing, and the sequence counter resets to zero.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if !inner.running {
            return;
        }
        if let Some(timer) = inner.armed.take() {
            timer.handle.abort();
        }
        let discarded = inner.queue.len();
        inner.queue.clear();
        inner.records.clear();
        inner.next_sequence = 0;
        inner.epoch_origin = None;
        inner.running = false;
        info!(label = %self.label, discarded, "event loop stopped");
        self.emit(LoopEvent::Stopped { discarded });
    }

    /// Decides whether a fresh insertion needs the timer re-armed.
    ///
    /// Arms an idle timer, or replaces an armed-but-unfired timer whose
    /// target the new event displaced at the head of the queue. A timer
    /// that has already fired is left alone: the in-flight drain observes
    /// the updated head when it finishes and re-arms correctly.
    fn rearm_for_insert(&self, inner: &mut Inner, inserted: EventId) {
        let displaced_head = inner.queue.peek().is_some_and(|head| head.id == inserted);
        match inner.armed.take() {
            None => self.arm_timer_locked(inner),
            Some(timer) if !timer.fired && displaced_head => {
                timer.handle.abort();
                self.arm_timer_locked(inner);
            }
            Some(timer) => inner.armed = Some(timer),
        }
    }

    /// Arms the one-shot timer for the current earliest pending event.
    ///
    /// Caller must hold the lock, and the loop must be running with no
    /// timer outstanding; arming a second timer is a broken invariant, not
    /// a recoverable condition.
    fn arm_timer_locked(&self, inner: &mut Inner) {
        assert!(inner.armed.is_none(), "second timer armed while one is outstanding");
        assert!(inner.running, "timer armed on a stopped loop");
        let Some(head) = inner.queue.peek() else {
            return;
        };
        let delay = Duration::try_from_secs_f64(head.due - self.clock.now())
            .unwrap_or(Duration::ZERO);
        inner.timer_generation += 1;
        let generation = inner.timer_generation;
        let this = self.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            this.run_due_events(generation);
        });
        trace!(label = %self.label, generation, delay_secs = delay.as_secs_f64(), "timer armed");
        inner.armed = Some(ArmedTimer {
            generation,
            fired: false,
            handle: task.abort_handle(),
        });
    }

    /// The drain-and-rearm cycle, invoked by the timer task when it fires.
    ///
    /// Extracts and runs every due event in order, releasing the lock while
    /// each action executes so that callbacks can re-enter the loop. After
    /// the drain, clears the armed handle and re-arms if the loop is still
    /// running with events remaining.
    fn run_due_events(&self, generation: u64) {
        {
            let mut inner = self.lock();
            match inner.armed.as_mut() {
                Some(timer) if timer.generation == generation => timer.fired = true,
                // Superseded by a nearer insertion, or the loop stopped,
                // between this task's wake-up and here.
                _ => return,
            }
        }
        loop {
            let step = {
                let mut inner = self.lock();
                let owns_timer = inner
                    .armed
                    .as_ref()
                    .is_some_and(|timer| timer.generation == generation);
                // A stop()/start() during a callback orphans this drain: the
                // restarted loop owns a fresh timer, and this task must not
                // touch its queue.
                if !owns_timer || !inner.running || inner.queue.is_empty() {
                    Step::Done
                } else {
                    let now = self.clock.now();
                    let head_due = inner.queue.peek().map(|head| head.due);
                    if head_due.map_or(true, |due| due > now) {
                        Step::Done
                    } else {
                        let entry = inner.queue.pop().expect("peeked entry vanished");
                        match inner.records.remove(entry.id) {
                            Some(record) if !record.canceled => Step::Run {
                                id: entry.id,
                                sequence: entry.sequence,
                                due: entry.due,
                                action: record.action,
                            },
                            _ => Step::Skip,
                        }
                    }
                }
            };
            match step {
                Step::Done => break,
                Step::Skip => continue,
                Step::Run {
                    id,
                    sequence,
                    due,
                    mut action,
                } => {
                    let fired_at = self.clock.now();
                    if panic::catch_unwind(AssertUnwindSafe(|| action())).is_err() {
                        error!(
                            label = %self.label,
                            sequence,
                            "event callback panicked; continuing drain"
                        );
                        self.emit(LoopEvent::CallbackPanicked { id, sequence });
                    } else {
                        trace!(label = %self.label, sequence, due, fired_at, "event dispatched");
                        self.emit(LoopEvent::EventDispatched {
                            id,
                            sequence,
                            due,
                            fired_at,
                        });
                    }
                }
            }
        }
        let mut inner = self.lock();
        let owns_timer = inner
            .armed
            .as_ref()
            .is_some_and(|timer| timer.generation == generation);
        if owns_timer {
            inner.armed = None;
            // Re-arm for whatever is earliest now, including events added
            // re-entrantly during the final callback of this drain.
            if inner.running && !inner.queue.is_empty() {
                self.arm_timer_locked(&mut inner);
            }
        }
    }
}
