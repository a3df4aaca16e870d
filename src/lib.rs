//! attachcon - a detachable console session for GUI and background processes
//!
//! A process that normally has no console (a GUI app, a service host) can
//! open one on demand, read commands from it on a background worker, write
//! colored output to it, and detach again without restarting. The console
//! can be opened and closed any number of times.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use attachcon::{Console, ConsoleConfig, ConsoleColor, NativeConsole};
//!
//! # fn main() -> anyhow::Result<()> {
//! let console = Console::new(Arc::new(NativeConsole::claim()?), ConsoleConfig::load());
//! console.set_handler(|console, line| {
//!     console.write_line_colored(format!("you said {}", line), ConsoleColor::Green);
//!     Ok(())
//! });
//! console.open()?;
//! # Ok(())
//! # }
//! ```
//!
//! Typing the exit command (`exit` by default) in the console window closes
//! the session; [`Console::close`] does the same from code.

pub mod config;
pub mod core;

pub use crate::config::{ConfigError, ConsoleColor, ConsoleConfig};
pub use crate::core::cancel::CancellationToken;
pub use crate::core::dispatch::{
    CallSite, CommandError, DispatchError, DispatchErrorHandler, ExecutionContext, Job, JobQueue,
    PendingExecution, QueueContext,
};
pub use crate::core::events::{ConsoleEvent, Subscription};
pub use crate::core::memory::MemoryPlatform;
pub use crate::core::native::NativeConsole;
pub use crate::core::platform::{
    ConsolePlatform, ConsoleStreams, LineSource, PlatformError, ReaderInput, StreamKind,
    StyleField, WindowHandle, WindowStyle,
};
pub use crate::core::session::{
    Console, ConsoleError, ExceptionHandler, Handler, MainTask, SessionStatus, TaskContext,
    STARTUP_COLOR,
};
pub use crate::core::writer::WriteOutcome;
