//! End-to-end scheduling behavior, driven on Tokio's paused test clock so
//! the timelines are deterministic and fast.

use evloop::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

type Trace = Arc<Mutex<Vec<String>>>;

fn recorder() -> (Trace, impl Fn(&EventLoop, f64, &str)) {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let sink = trace.clone();
    let record = move |ev: &EventLoop, delay: f64, label: &str| {
        let sink = sink.clone();
        let label = label.to_string();
        ev.add_event(delay, move || {
            sink.lock().unwrap().push(label.clone());
        });
    };
    (trace, record)
}

async fn advance(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn events_dispatch_in_delay_order_with_fifo_ties() {
    let ev = EventLoop::new(LoopConfig::default());
    let (trace, record) = recorder();

    for delay in [5.0, 4.0, 10.0, -1.0, 0.0, 9.0, 3.0] {
        record(&ev, delay, &format!("{delay}"));
    }
    // Two events due at the identical instant run in insertion order.
    record(&ev, 2.0, "tie-first");
    record(&ev, 2.0, "tie-second");

    ev.start();
    advance(11.0).await;

    let got = trace.lock().unwrap().clone();
    assert_eq!(
        got,
        vec!["-1", "0", "tie-first", "tie-second", "3", "4", "5", "9", "10"]
    );
}

#[tokio::test(start_paused = true)]
async fn pre_start_delay_is_anchored_at_the_start_epoch() {
    let ev = EventLoop::new(LoopConfig::default());
    let fired_at = Arc::new(Mutex::new(None));
    let sink = fired_at.clone();
    let probe = ev.clone();
    ev.add_event(3.0, move || {
        *sink.lock().unwrap() = Some(probe.now());
    });

    // The loop starts well after the event was added; the 3s delay counts
    // from the epoch, not from add time.
    advance(2.0).await;
    ev.start();
    let epoch = ev.epoch_origin().expect("running loop has an epoch");
    advance(4.0).await;

    let at = fired_at.lock().unwrap().expect("event fired");
    assert!((at - (epoch + 3.0)).abs() < 0.05, "fired at {at}, epoch {epoch}");
}

#[tokio::test(start_paused = true)]
async fn post_start_delay_is_relative_to_add_time() {
    let ev = EventLoop::new(LoopConfig::default());
    ev.start();
    advance(1.5).await;

    let added_at = ev.now();
    let fired_at = Arc::new(Mutex::new(None));
    let sink = fired_at.clone();
    let probe = ev.clone();
    ev.add_event(2.0, move || {
        *sink.lock().unwrap() = Some(probe.now());
    });
    advance(3.0).await;

    let at = fired_at.lock().unwrap().expect("event fired");
    assert!((at - (added_at + 2.0)).abs() < 0.05, "fired at {at}, added at {added_at}");
}

#[tokio::test(start_paused = true)]
async fn canceled_event_never_runs_but_later_events_do() {
    let ev = EventLoop::new(LoopConfig::default());
    let (trace, record) = recorder();
    record(&ev, 6.0, "survivor");

    let doomed = ev.add_event(5.0, || panic!("canceled event must not run"));
    ev.start();
    advance(2.0).await;
    assert!(ev.cancel(doomed));
    advance(10.0).await;

    assert_eq!(trace.lock().unwrap().clone(), vec!["survivor"]);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let ev = EventLoop::new(LoopConfig::default());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    ev.add_event(1.0, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut rx = ev.subscribe();
    ev.start();
    let epoch = ev.epoch_origin();
    advance(0.5).await;
    // Second start is a no-op: no epoch reset, no rebased delay, no
    // duplicate timer.
    ev.start();
    assert_eq!(ev.epoch_origin(), epoch);
    advance(1.0).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let mut started = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LoopEvent::Started { .. }) {
            started += 1;
        }
    }
    assert_eq!(started, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_discards_the_queue() {
    let ev = EventLoop::new(LoopConfig::default());
    let (trace, record) = recorder();
    record(&ev, 2.0, "a");
    record(&ev, 3.0, "b");
    record(&ev, 4.0, "c");

    let mut rx = ev.subscribe();
    ev.start();
    ev.stop();
    assert!(!ev.is_running());
    assert_eq!(ev.pending_events(), 0);
    ev.stop();

    advance(10.0).await;
    assert!(trace.lock().unwrap().is_empty(), "discarded events must not run");

    let mut stopped = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LoopEvent::Stopped { .. }) {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 1);
}

#[tokio::test(start_paused = true)]
async fn callbacks_can_schedule_re_entrantly() {
    let ev = EventLoop::new(LoopConfig::default());
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));

    let sink = trace.clone();
    let handle = ev.clone();
    ev.add_event(1.0, move || {
        sink.lock().unwrap().push("first".to_string());
        let inner_sink = sink.clone();
        // Scheduled from inside a callback, due before the 3s event.
        handle.add_event(1.0, move || {
            inner_sink.lock().unwrap().push("nested".to_string());
        });
    });

    let sink = trace.clone();
    ev.add_event(3.0, move || {
        sink.lock().unwrap().push("last".to_string());
    });

    ev.start();
    advance(5.0).await;

    assert_eq!(
        trace.lock().unwrap().clone(),
        vec!["first", "nested", "last"]
    );
}

#[tokio::test(start_paused = true)]
async fn a_panicking_callback_does_not_kill_the_drain() {
    let ev = EventLoop::new(LoopConfig::default());
    let (trace, record) = recorder();

    ev.add_event(1.0, || panic!("boom"));
    record(&ev, 1.0, "after-panic");
    record(&ev, 2.0, "next-drain");

    let mut rx = ev.subscribe();
    ev.start();
    advance(3.0).await;

    assert_eq!(
        trace.lock().unwrap().clone(),
        vec!["after-panic", "next-drain"]
    );
    let mut panicked = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LoopEvent::CallbackPanicked { .. }) {
            panicked += 1;
        }
    }
    assert_eq!(panicked, 1);
}

#[tokio::test(start_paused = true)]
async fn a_nearer_event_displaces_an_armed_timer() {
    let ev = EventLoop::new(LoopConfig::default());
    let (trace, record) = recorder();

    record(&ev, 10.0, "far");
    ev.start();
    advance(0.5).await;
    // The timer is armed for the 10s event; this insertion must supersede it.
    record(&ev, 1.0, "near");
    advance(2.0).await;
    assert_eq!(trace.lock().unwrap().clone(), vec!["near"]);

    advance(9.0).await;
    assert_eq!(trace.lock().unwrap().clone(), vec!["near", "far"]);
}

#[tokio::test(start_paused = true)]
async fn negative_delay_on_a_running_loop_runs_at_the_next_drain() {
    let ev = EventLoop::new(LoopConfig::default());
    let (trace, record) = recorder();
    ev.start();
    advance(2.0).await;

    // Already overdue: due lands in the past and the timer fires with a
    // zero delay rather than waiting.
    let fired_at = Arc::new(Mutex::new(None));
    let sink = fired_at.clone();
    let probe = ev.clone();
    let tracer = trace.clone();
    ev.add_event(-1.0, move || {
        *sink.lock().unwrap() = Some(probe.now());
        tracer.lock().unwrap().push("overdue".to_string());
    });
    record(&ev, 0.5, "later");
    advance(1.0).await;

    assert_eq!(trace.lock().unwrap().clone(), vec!["overdue", "later"]);
    let at = fired_at.lock().unwrap().expect("overdue event fired");
    assert!((at - 2.0).abs() < 0.05, "dispatched at {at}, added at 2.0");
}

/// A gate a callback can block on, so a test can hold a dispatch mid-flight
/// while the rest of the loop's machinery keeps moving.
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// Real time and real worker threads: a drain blocked inside a callback has
// to keep running while the loop is stopped and restarted around it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_during_a_callback_keeps_a_single_dispatcher() {
    let ev = EventLoop::new(LoopConfig::default());
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    // High-water mark of concurrently executing post-restart callbacks.
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    let first_gate = Gate::new();
    let first_entered = Arc::new(AtomicBool::new(false));
    {
        let (gate, entered, tracer) = (first_gate.clone(), first_entered.clone(), trace.clone());
        ev.add_event(0.05, move || {
            entered.store(true, Ordering::SeqCst);
            gate.wait();
            tracer.lock().unwrap().push("old".to_string());
        });
    }
    ev.start();
    wait_for(|| first_entered.load(Ordering::SeqCst)).await;

    // Restart while the first callback is still executing with the lock
    // released. Its drain task survives the stop and must come back as an
    // orphan, not as a second dispatcher for the restarted loop.
    ev.stop();
    ev.start();

    let second_gate = Gate::new();
    let second_entered = Arc::new(AtomicBool::new(false));
    {
        let (gate, entered, tracer) = (second_gate.clone(), second_entered.clone(), trace.clone());
        let (active, max_active) = (active.clone(), max_active.clone());
        ev.add_event(0.05, move || {
            let running = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(running, Ordering::SeqCst);
            entered.store(true, Ordering::SeqCst);
            gate.wait();
            tracer.lock().unwrap().push("blocking".to_string());
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
    {
        let tracer = trace.clone();
        let (active, max_active) = (active.clone(), max_active.clone());
        ev.add_event(0.1, move || {
            let running = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_active.fetch_max(running, Ordering::SeqCst);
            tracer.lock().unwrap().push("queued".to_string());
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    wait_for(|| second_entered.load(Ordering::SeqCst)).await;
    // Release the pre-restart callback: its drain resumes while "blocking"
    // is still executing, and the "queued" event is due.
    first_gate.release();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !trace.lock().unwrap().iter().any(|label| label == "queued"),
        "an orphaned drain dispatched the restarted loop's event"
    );

    second_gate.release();
    wait_for(|| trace.lock().unwrap().iter().any(|label| label == "queued")).await;

    assert_eq!(max_active.load(Ordering::SeqCst), 1, "callbacks overlapped");
    assert_eq!(
        trace.lock().unwrap().clone(),
        vec!["old", "blocking", "queued"]
    );
}

#[tokio::test(start_paused = true)]
async fn loop_event_stream_reflects_the_lifecycle() {
    let ev = EventLoop::new(LoopConfig::default());
    let mut rx = ev.subscribe();

    let id = ev.add_event(1.0, || {});
    let doomed = ev.add_event(2.0, || {});
    ev.start();
    ev.cancel(doomed);
    advance(3.0).await;
    ev.stop();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            LoopEvent::EventScheduled { .. } => "scheduled",
            LoopEvent::Started { .. } => "started",
            LoopEvent::EventCanceled { .. } => "canceled",
            LoopEvent::EventDispatched { id: did, .. } => {
                assert_eq!(did, id, "only the live event is dispatched");
                "dispatched"
            }
            LoopEvent::Stopped { .. } => "stopped",
            LoopEvent::CallbackPanicked { .. } => "panicked",
        });
    }
    assert_eq!(
        kinds,
        vec![
            "scheduled",
            "scheduled",
            "started",
            "canceled",
            "dispatched",
            "stopped"
        ]
    );
}
