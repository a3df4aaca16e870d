//! Command dispatcher
//!
//! Feeds a command line to the session handler, optionally echoing it
//! first. Three flavors:
//!
//! - [`Console::execute`] blocks the caller until the handler returns
//! - [`Console::execute_async`] returns a [`PendingExecution`] to wait on
//! - [`Console::execute_on`] marshals `execute` onto an [`ExecutionContext`]
//!
//! Handler failures never reach the caller. They are written in the error
//! color, tagged with the call site, and forwarded to the exception handler.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use super::session::Console;
use crate::config::ConsoleColor;

/// Failures reported through the error path
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0:#}")]
    Handler(anyhow::Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("No command handler is configured")]
    MissingHandler,

    #[error("{0:#}")]
    Task(anyhow::Error),
}

/// Failures of a marshalled `execute_on` call
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Execution context is no longer accepting work")]
    Rejected,

    #[error("Marshalled execute panicked: {0}")]
    Panicked(String),
}

/// Where a reported failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Sync,
    Async,
    Read,
    Task,
}

impl CallSite {
    /// Echo color, distinct per dispatcher flavor
    fn echo_color(self) -> ConsoleColor {
        match self {
            CallSite::Async => ConsoleColor::DarkGray,
            _ => ConsoleColor::Gray,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            CallSite::Sync => "[sync]",
            CallSite::Async => "[async]",
            CallSite::Read => "[read]",
            CallSite::Task => "[task]",
        };
        f.write_str(tag)
    }
}

/// A unit of work handed to an [`ExecutionContext`]
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Callback for failures of `execute_on`
pub type DispatchErrorHandler = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Somewhere to run work, e.g. a UI thread's message queue
pub trait ExecutionContext {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError>;
}

/// Channel-backed [`ExecutionContext`]. The thread owning the matching
/// [`JobQueue`] runs the jobs.
#[derive(Clone)]
pub struct QueueContext {
    tx: Sender<Job>,
}

/// Receiving side of a [`QueueContext`]
pub struct JobQueue {
    rx: Receiver<Job>,
}

impl QueueContext {
    pub fn new() -> (Self, JobQueue) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, JobQueue { rx })
    }
}

impl ExecutionContext for QueueContext {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        self.tx.send(job).map_err(|_| DispatchError::Rejected)
    }
}

impl JobQueue {
    /// Run every job queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one job and run it
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Handle to an `execute_async` call
#[must_use = "dropping a PendingExecution does not cancel it"]
pub struct PendingExecution {
    handle: Option<JoinHandle<()>>,
}

impl PendingExecution {
    /// Block until the command has been handled
    pub fn wait(self) {
        if let Some(handle) = self.handle {
            if handle.join().is_err() {
                warn!("Async command thread panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Console {
    /// Run `command` through the handler on a background thread and block
    /// until it is done. Never fails; errors are reported tagged `[sync]`.
    pub fn execute(&self, command: &str) {
        thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name("attachcon-exec".to_string())
                .spawn_scoped(scope, || self.run_command(command, CallSite::Sync));

            match spawned {
                Ok(handle) => {
                    if handle.join().is_err() {
                        warn!("Command thread panicked");
                    }
                }
                Err(e) => {
                    warn!("Failed to spawn command thread, running inline: {}", e);
                    self.run_command(command, CallSite::Sync);
                }
            }
        });
    }

    /// Run `command` through the handler on a background thread. Echo (if
    /// enabled) happens before the handler; errors are reported tagged
    /// `[async]` and the returned handle always completes normally.
    pub fn execute_async(&self, command: &str) -> PendingExecution {
        let console = self.clone();
        let owned = command.to_string();

        let spawned = thread::Builder::new()
            .name("attachcon-exec-async".to_string())
            .spawn(move || console.run_command(&owned, CallSite::Async));

        match spawned {
            Ok(handle) => PendingExecution {
                handle: Some(handle),
            },
            Err(e) => {
                warn!("Failed to spawn async command thread, running inline: {}", e);
                self.run_command(command, CallSite::Async);
                PendingExecution { handle: None }
            }
        }
    }

    /// Marshal a synchronous [`Console::execute`] onto `context`.
    ///
    /// Failures of the marshalled call itself go to `on_error` (or the log),
    /// never to the session exception handler.
    pub fn execute_on<C>(&self, context: &C, command: &str, on_error: Option<DispatchErrorHandler>)
    where
        C: ExecutionContext + ?Sized,
    {
        let console = self.clone();
        let command = command.to_string();
        let job_on_error = on_error.clone();

        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| console.execute(&command)));
            if let Err(payload) = result {
                let error = DispatchError::Panicked(panic_message(payload.as_ref()));
                notify(job_on_error.as_deref(), &error);
            }
        });

        if let Err(error) = context.dispatch(job) {
            notify(on_error.as_deref(), &error);
        }
    }

    /// Echo plus handler, with every failure captured and reported
    fn run_command(&self, command: &str, site: CallSite) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if self.write_executed() {
                self.write_line_colored(format!("> {}", command), site.echo_color());
            }
            self.call_handler(command)
        }));

        let error = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(payload) => CommandError::Panicked(panic_message(payload.as_ref())),
        };
        self.report(site, &error);
    }

    /// Handler call with panics captured, for the read loop
    pub(crate) fn invoke_handler(&self, command: &str) -> Result<(), CommandError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.call_handler(command)))
            .unwrap_or_else(|payload| Err(CommandError::Panicked(panic_message(payload.as_ref()))))
    }

    fn call_handler(&self, command: &str) -> Result<(), CommandError> {
        let handler = self.handler().ok_or(CommandError::MissingHandler)?;
        handler(self, command).map_err(CommandError::Handler)
    }

    /// Write `error` in the error color and hand it to the exception handler
    pub(crate) fn report(&self, site: CallSite, error: &CommandError) {
        warn!("{} {}", site, error);
        self.write_error(format!("{} {}", site, error));

        if let Some(handler) = self.exception_handler() {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(error))).is_err() {
                warn!("Exception handler panicked");
            }
        }
    }
}

fn notify(handler: Option<&(dyn Fn(&DispatchError) + Send + Sync)>, error: &DispatchError) {
    match handler {
        Some(handler) => handler(error),
        None => warn!("execute_on failed: {}", error),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
