use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use evloop::prelude::*;
use evloop::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", "evshell — interactive event scheduling".cyan().bold());
    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", version_string);
    println!(
        "{}",
        "---------------------------------------------------------------".dimmed()
    );
}

/// Drops handle-table entries whose events the loop has already resolved,
/// so `list` only ever shows work that can still be canceled.
fn prune_resolved(scheduled: &Mutex<HashMap<usize, EventId>>, event: &LoopEvent) {
    let mut scheduled = scheduled.lock().unwrap();
    match event {
        LoopEvent::EventDispatched { id, .. } => {
            scheduled.retain(|_, scheduled_id| *scheduled_id != *id);
        }
        LoopEvent::Stopped { .. } => scheduled.clear(),
        _ => {}
    }
}

/// Spawns a task that prunes the handle table and prints the loop's event
/// stream, gated by a shared flag.
fn spawn_event_listener(
    ev: &EventLoop,
    is_listening: Arc<AtomicBool>,
    scheduled: Arc<Mutex<HashMap<usize, EventId>>>,
) {
    let mut rx = ev.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            prune_resolved(&scheduled, &event);
            if is_listening.load(Ordering::Relaxed) {
                let stamp = Local::now().format("%H:%M:%S%.3f");
                println!("\n<-- [{}] {:?}\n>> ", stamp, event);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_target(false)
        .init();

    // An optional config file path may be passed as the first argument.
    let config = match env::args().nth(1) {
        Some(path) => LoopConfig::from_file(&path)?,
        None => LoopConfig {
            label: "evshell".to_string(),
            ..Default::default()
        },
    };

    let ev = EventLoop::new(config);

    // The shell's state management variables. The handle table is shared
    // with the listener task, which prunes dispatched entries.
    let scheduled: Arc<Mutex<HashMap<usize, EventId>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut next_handle: usize = 0;

    // Create the shared flag for the event-stream listener.
    let is_listening = Arc::new(AtomicBool::new(true));
    spawn_event_listener(&ev, is_listening.clone(), scheduled.clone());

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!(
        "{} is ready. Type 'help' for commands or 'exit' to quit.",
        ENGINE_NAME.cyan()
    );

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.trim().split_whitespace().collect::<Vec<_>>();

                if let Some(command) = args.first() {
                    match *command {
                        "add" => match (args.get(1), args.get(2)) {
                            (Some(secs_str), label) => {
                                if let Ok(secs) = secs_str.parse::<f64>() {
                                    let label = label.unwrap_or(&"event").to_string();
                                    let printable = label.clone();
                                    let id = ev.add_event(secs, move || {
                                        println!("<-- [FIRED] {}", printable);
                                    });
                                    let handle = next_handle;
                                    scheduled.lock().unwrap().insert(handle, id);
                                    next_handle += 1;
                                    println!(
                                        "--> Scheduled '{}' in {}s with handle: #{}",
                                        label, secs, handle
                                    );
                                } else {
                                    println!(
                                        "Error: '{}' is not a valid delay in seconds.",
                                        secs_str
                                    );
                                }
                            }
                            _ => println!("Usage: add <SECONDS> [LABEL]"),
                        },
                        "cancel" => match args.get(1).map(|s| s.parse::<usize>()) {
                            Some(Ok(handle)) => {
                                let removed = scheduled.lock().unwrap().remove(&handle);
                                if let Some(id) = removed {
                                    if ev.cancel(id) {
                                        println!("--> Event #{} canceled.", handle);
                                    } else {
                                        println!(
                                            "--> Event #{} already dispatched or discarded.",
                                            handle
                                        );
                                    }
                                } else {
                                    println!(
                                        "Error: Invalid handle #{}. Use 'list' to see scheduled events.",
                                        handle
                                    );
                                }
                            }
                            _ => println!("Usage: cancel <HANDLE>"),
                        },
                        "list" => {
                            println!(
                                "Loop running: {}; pending events: {}",
                                ev.is_running(),
                                ev.pending_events()
                            );
                            for (handle, id) in scheduled.lock().unwrap().iter() {
                                println!("  Handle #{}: {:?}", handle, id);
                            }
                        }
                        "start" => {
                            ev.start();
                            println!("--> Loop started.");
                        }
                        "stop" => {
                            ev.stop();
                            scheduled.lock().unwrap().clear();
                            println!("--> Loop stopped; pending events discarded.");
                        }
                        "events" => match args.get(1) {
                            Some(&"on") => {
                                is_listening.store(true, Ordering::Relaxed);
                                println!("--> Event stream printing enabled.");
                            }
                            Some(&"off") => {
                                is_listening.store(false, Ordering::Relaxed);
                                println!("--> Event stream printing disabled.");
                            }
                            _ => println!("Usage: events on|off"),
                        },
                        "help" => {
                            println!("Available commands:");
                            println!("  add <S> [LABEL]  - Schedules an event S seconds from now.");
                            println!("  cancel <H>       - Cancels a scheduled event by its handle.");
                            println!("  list             - Shows loop state and scheduled handles.");
                            println!("  start            - Starts dispatching events.");
                            println!("  stop             - Stops the loop and discards pending events.");
                            println!("  events on|off    - Toggles printing of the loop event stream.");
                            println!("  exit             - Quits the shell.");
                        }
                        "exit" => break,
                        "" => {}
                        _ => println!("Unknown command: '{}'. Type 'help'.", line),
                    }
                }
            }
            Err(_) => {
                println!("Exiting evshell...");
                break;
            }
        }
    }

    ev.stop();
    Ok(())
}
