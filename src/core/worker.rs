//! Worker runner
//!
//! Body of the background thread started by `Console::open`. It runs either
//! the configured main task or the default read loop, and closes its own
//! session when that returns (unless a newer session has replaced it).

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::PoisonError;
use std::thread::{self, Thread};

use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::dispatch::{panic_message, CallSite, CommandError};
use super::events::ConsoleEvent;
use super::session::{Console, MainTask, SharedInput, TaskContext};

/// Start the worker of session `generation`.
///
/// The thread is detached: nothing joins it and it never keeps the process
/// alive. It reads only from `input`, the input of its own session, and
/// does nothing until `ready` fires (or its sender is dropped).
pub(crate) fn spawn(
    console: Console,
    generation: u64,
    args: Vec<String>,
    cancel: CancellationToken,
    task: Option<MainTask>,
    input: SharedInput,
    ready: Receiver<()>,
) -> io::Result<Thread> {
    let handle = thread::Builder::new()
        .name(format!("attachcon-worker-{}", generation))
        .spawn(move || {
            let _ = ready.recv();
            run(console, generation, args, cancel, task, input)
        })?;
    Ok(handle.thread().clone())
}

fn run(
    console: Console,
    generation: u64,
    args: Vec<String>,
    cancel: CancellationToken,
    task: Option<MainTask>,
    input: SharedInput,
) {
    debug!("Worker {} started", generation);

    match task {
        Some(task) => run_task(&console, &task, args, cancel),
        None => read_loop(&console, generation, &input, &cancel),
    }

    if console.close_if_current(generation) {
        debug!("Worker {} closed its session", generation);
    } else {
        debug!("Worker {} finished", generation);
    }
}

fn run_task(console: &Console, task: &MainTask, args: Vec<String>, cancel: CancellationToken) {
    let context = TaskContext {
        console: console.clone(),
        args,
        cancel,
    };

    let error = match panic::catch_unwind(AssertUnwindSafe(|| task(context))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => CommandError::Task(e),
        Err(payload) => CommandError::Panicked(panic_message(payload.as_ref())),
    };
    console.report(CallSite::Task, &error);
}

/// Default interaction loop: one line at a time until end of input,
/// a read failure, or cancellation
fn read_loop(
    console: &Console,
    generation: u64,
    input: &SharedInput,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let read = input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_line();
        let line = match read {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Read loop stopped: {}", e);
                break;
            }
        };

        // Release ends a pending read; a line completed meanwhile is dropped
        if cancel.is_cancelled() {
            break;
        }

        console.raise(&ConsoleEvent::InputReceived(line.clone()));

        if line.to_lowercase() == console.exit_command().to_lowercase() {
            if console.close_if_current(generation) {
                break;
            }
            // Release failed, or the session is no longer ours; the
            // cancellation check above decides which
            warn!("Exit command could not close session {}", generation);
            continue;
        }

        debug!("Dispatching {:?}", line);
        if let Err(error) = console.invoke_handler(&line) {
            console.report(CallSite::Read, &error);
        }
    }
}
