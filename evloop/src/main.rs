use anyhow::Result;
use evloop::prelude::*;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    // 2. Create the loop.
    let ev = EventLoop::new(LoopConfig {
        label: "evdemo".to_string(),
        ..Default::default()
    });

    // 3. Watch the loop-event stream in the background.
    let done = spawn_event_listener(&ev);

    // 4. Schedule a timeline before starting: the delays are relative to
    //    the epoch the loop will capture at start().
    schedule_demo_timeline(&ev);

    // 5. Start dispatching and wait for the stop event (or Ctrl+C).
    ev.start();

    tokio::select! {
        _ = done => info!("demo timeline complete"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; discarding pending events");
            ev.stop();
        }
    }

    Ok(())
}

/// Subscribes to the loop's event stream, logs everything it sees, and
/// resolves once the loop reports it has stopped.
fn spawn_event_listener(ev: &EventLoop) -> tokio::task::JoinHandle<()> {
    let mut rx = ev.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            info!("[LOOP] => {:?}", event);
            if matches!(event, LoopEvent::Stopped { .. }) {
                break;
            }
        }
    })
}

/// Schedules the demonstration timeline: labeled one-shot events at mixed
/// (including negative) delays, a self-rescheduling repeat event, a slow
/// callback that blocks the drain, and a final stop.
fn schedule_demo_timeline(ev: &EventLoop) {
    for delay in [5.0, 4.0, 10.0, -1.0, 0.0, 9.0, 3.0, 7.0, 3.14] {
        let handle = ev.clone();
        ev.add_event(delay, move || {
            info!(
                elapsed = handle.epoch_origin().map(|epoch| handle.now() - epoch).unwrap_or(0.0),
                "time {delay}"
            );
        });
    }

    schedule_repeat(ev.clone(), 1.0, 5);

    // Callbacks run on the drain's own context: this one visibly delays
    // every event due within the next second.
    ev.add_event(12.0, || {
        info!("sleep 1");
        std::thread::sleep(Duration::from_secs(1));
        info!("sleep done");
    });

    let handle = ev.clone();
    ev.add_event(15.75, move || {
        info!("stop time: 15.75");
        handle.stop();
    });
}

/// Re-entrant scheduling: each firing schedules the next from inside its
/// own callback.
fn schedule_repeat(ev: EventLoop, interval: f64, remaining: u32) {
    let handle = ev.clone();
    ev.add_event(interval, move || {
        info!(interval, remaining = remaining - 1, "repeat");
        if remaining > 1 {
            schedule_repeat(handle.clone(), interval, remaining - 1);
        }
    });
}
