//! Console session core.
//!
//! This module contains everything behind the [`Console`](session::Console)
//! handle:
//!
//! - **platform**: OS services trait plus shared platform types
//! - **native**: Windows console implementation of the platform
//! - **memory**: in-memory platform for tests and the non-Windows demo
//! - **session**: lifecycle state machine (open, close, toggle, reopen)
//! - **worker**: background thread running the read loop or main task
//! - **dispatch**: command execution on the caller, a new thread or a context
//! - **writer**: serialized, color-aware output and line input
//! - **events**: Opened/Closed/InputReceived observers
//! - **cancel**: per-session cancellation signal
//!
//! # Architecture
//!
//! ```text
//! Console (Arc<Inner>)
//! ├── ConsolePlatform (NativeConsole | MemoryPlatform)
//! ├── SessionState (status, window, worker, cancel token, generation)
//! ├── WriteSerializer (output stream + current colors)
//! ├── input slot (LineSource of the open session)
//! └── EventHub
//! ```

pub mod cancel;
pub mod dispatch;
pub mod events;
pub mod memory;
pub mod native;
pub mod platform;
pub mod session;
mod worker;
pub mod writer;
