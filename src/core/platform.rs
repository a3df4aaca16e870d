//! Native console platform abstraction
//!
//! The session core never talks to the OS directly. Allocating a console,
//! swapping the process standard handles and touching the console window
//! all go through [`ConsolePlatform`], so the same lifecycle code runs
//! against the Windows console ([`super::native::NativeConsole`]) or an
//! in-memory stand-in ([`super::memory::MemoryPlatform`]).

use std::io::{self, BufRead, Write};

use bitflags::bitflags;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to allocate console: {0}")]
    Allocate(#[source] io::Error),

    #[error("Failed to release console: {0}")]
    Release(#[source] io::Error),

    #[error("Failed to redirect standard streams: {0}")]
    Redirect(#[source] io::Error),

    #[error("Console is already claimed by another session")]
    AlreadyClaimed,

    #[error("Native console is only supported on Windows")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Standard stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Input,
    Output,
    Error,
}

/// Window long field to read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleField {
    /// `GWL_STYLE`
    Style,
    /// `GWL_EXSTYLE`
    ExStyle,
}

/// Opaque console window reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

bitflags! {
    /// Window style bits the decoration policy touches.
    ///
    /// `SYSMENU` lives in the style field, the other two in the extended
    /// style field. Unknown bits are retained as-is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WindowStyle: u32 {
        const SYSMENU = 0x0008_0000;
        const APPWINDOW = 0x0004_0000;
        const TOOLWINDOW = 0x0000_0080;
    }
}

/// Line-oriented input attached to a session
pub trait LineSource: Send {
    /// Read one line without its terminator. `Ok(None)` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// [`LineSource`] over any buffered reader
pub struct ReaderInput<R>(pub R);

impl<R: BufRead + Send> LineSource for ReaderInput<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut bytes = Vec::new();
        if self.0.read_until(b'\n', &mut bytes)? == 0 {
            return Ok(None);
        }
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        // Console code pages do not always hand back valid UTF-8
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Streams of a freshly allocated console, owned by the session while open
pub struct ConsoleStreams {
    pub input: Box<dyn LineSource>,
    pub output: Box<dyn Write + Send>,
}

/// Services the session needs from the host OS.
///
/// All calls may fail; the core treats each one as atomic. Style and code
/// page calls are best-effort and their outcome is ignored.
pub trait ConsolePlatform: Send + Sync {
    /// Attach a new console to the process
    fn allocate(&self) -> Result<()>;

    /// Detach the console from the process
    fn release(&self) -> Result<()>;

    /// Point the process standard streams at the allocated console and
    /// return the session's own input and output
    fn redirect_streams(&self) -> Result<ConsoleStreams>;

    /// Reinstall the standard handles captured when the platform was created
    fn restore_streams(&self);

    /// Console window, if the platform has one
    fn window(&self) -> Option<WindowHandle>;

    fn window_style(&self, window: WindowHandle, field: StyleField) -> WindowStyle;

    fn set_window_style(&self, window: WindowHandle, field: StyleField, style: WindowStyle);

    fn set_codepage(&self, codepage: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_input_strips_terminators() {
        let mut input = ReaderInput(Cursor::new("first\r\nsecond\nlast"));
        assert_eq!(input.read_line().unwrap().as_deref(), Some("first"));
        assert_eq!(input.read_line().unwrap().as_deref(), Some("second"));
        assert_eq!(input.read_line().unwrap().as_deref(), Some("last"));
        assert_eq!(input.read_line().unwrap(), None);
    }

    #[test]
    fn test_reader_input_keeps_empty_lines() {
        let mut input = ReaderInput(Cursor::new("\n\nx\n"));
        assert_eq!(input.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(input.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(input.read_line().unwrap().as_deref(), Some("x"));
        assert_eq!(input.read_line().unwrap(), None);
    }

    #[test]
    fn test_reader_input_invalid_utf8() {
        let mut input = ReaderInput(Cursor::new(b"ok\xff\n".to_vec()));
        assert_eq!(input.read_line().unwrap().as_deref(), Some("ok\u{fffd}"));
    }

    #[test]
    fn test_window_style_retains_unknown_bits() {
        let style = WindowStyle::from_bits_retain(0x00CF_0000);
        assert!(style.contains(WindowStyle::SYSMENU));
        let cleared = style - WindowStyle::SYSMENU;
        assert_eq!(cleared.bits(), 0x00C7_0000);
    }
}
