//! In-memory console platform
//!
//! Stands in for the native console on hosts without one (non-Windows
//! builds, headless services) and in tests. Input is fed line by line
//! through a channel, output is captured in a shared buffer, and every
//! platform call is recorded so it can be inspected afterwards.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::platform::{
    ConsolePlatform, ConsoleStreams, LineSource, PlatformError, Result, StyleField, WindowHandle,
    WindowStyle,
};

/// `WS_OVERLAPPEDWINDOW`, the style of a freshly allocated console window
const DEFAULT_STYLE: u32 = 0x00CF_0000;

/// Recorded platform state
#[derive(Debug, Clone, Default)]
struct MemoryState {
    allocated: bool,
    fail_allocate: bool,
    fail_release: bool,
    window: Option<WindowHandle>,
    styles: HashMap<StyleField, WindowStyle>,
    codepage: Option<u32>,
    allocations: usize,
    releases: usize,
    restores: usize,
}

/// Console platform backed by a channel and a byte buffer
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
    input_tx: Mutex<Option<Sender<String>>>,
    output: SharedBuffer,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// Create a platform with a console window
    pub fn new() -> Self {
        let mut styles = HashMap::new();
        styles.insert(StyleField::Style, WindowStyle::from_bits_retain(DEFAULT_STYLE));
        styles.insert(StyleField::ExStyle, WindowStyle::APPWINDOW);

        Self {
            state: Mutex::new(MemoryState {
                window: Some(WindowHandle(0x1000)),
                styles,
                ..MemoryState::default()
            }),
            input_tx: Mutex::new(None),
            output: SharedBuffer::default(),
        }
    }

    /// Create a platform whose console has no window
    pub fn headless() -> Self {
        let platform = Self::new();
        platform.lock().window = None;
        platform
    }

    /// Make the next allocations fail (or succeed again)
    pub fn set_fail_allocate(&self, fail: bool) {
        self.lock().fail_allocate = fail;
    }

    /// Make the next releases fail (or succeed again)
    pub fn set_fail_release(&self, fail: bool) {
        self.lock().fail_release = fail;
    }

    /// Make writes to the console output fail, as a torn-down console would
    pub fn set_fail_writes(&self, fail: bool) {
        self.output.fail.store(fail, Ordering::SeqCst);
    }

    /// Send one line of input to the attached console.
    /// Returns `false` if no console is attached.
    pub fn feed_line(&self, line: &str) -> bool {
        match self.input().as_ref() {
            Some(tx) => tx.send(line.to_string()).is_ok(),
            None => false,
        }
    }

    /// Signal end of input to the attached console
    pub fn close_input(&self) {
        self.input().take();
    }

    /// Everything written so far, escape sequences included
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }

    /// Everything written so far with escape sequences removed
    pub fn plain_output(&self) -> String {
        strip_ansi(&self.output())
    }

    pub fn clear_output(&self) {
        self.output.lock().clear();
    }

    pub fn is_allocated(&self) -> bool {
        self.lock().allocated
    }

    pub fn allocations(&self) -> usize {
        self.lock().allocations
    }

    pub fn releases(&self) -> usize {
        self.lock().releases
    }

    /// Number of times the original standard streams were reinstalled
    pub fn restores(&self) -> usize {
        self.lock().restores
    }

    pub fn codepage(&self) -> Option<u32> {
        self.lock().codepage
    }

    /// Current value of a window style field
    pub fn style(&self, field: StyleField) -> WindowStyle {
        self.lock()
            .styles
            .get(&field)
            .copied()
            .unwrap_or_else(WindowStyle::empty)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn input(&self) -> MutexGuard<'_, Option<Sender<String>>> {
        self.input_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConsolePlatform for MemoryPlatform {
    fn allocate(&self) -> Result<()> {
        let mut state = self.lock();
        if state.fail_allocate {
            return Err(PlatformError::Allocate(io::Error::new(
                io::ErrorKind::Other,
                "allocation declined",
            )));
        }
        if state.allocated {
            return Err(PlatformError::Allocate(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a console is already attached",
            )));
        }
        state.allocated = true;
        state.allocations += 1;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut state = self.lock();
        if state.fail_release {
            return Err(PlatformError::Release(io::Error::new(
                io::ErrorKind::Other,
                "release declined",
            )));
        }
        if !state.allocated {
            return Err(PlatformError::Release(io::Error::new(
                io::ErrorKind::NotFound,
                "no console attached",
            )));
        }
        state.allocated = false;
        state.releases += 1;
        drop(state);

        // Disconnecting the channel unblocks a pending read
        self.input().take();
        Ok(())
    }

    fn redirect_streams(&self) -> Result<ConsoleStreams> {
        if !self.lock().allocated {
            return Err(PlatformError::Redirect(io::Error::new(
                io::ErrorKind::NotFound,
                "no console attached",
            )));
        }

        let (tx, rx) = mpsc::channel();
        *self.input() = Some(tx);

        Ok(ConsoleStreams {
            input: Box::new(ChannelInput(rx)),
            output: Box::new(self.output.clone()),
        })
    }

    fn restore_streams(&self) {
        self.lock().restores += 1;
    }

    fn window(&self) -> Option<WindowHandle> {
        self.lock().window
    }

    fn window_style(&self, _window: WindowHandle, field: StyleField) -> WindowStyle {
        self.style(field)
    }

    fn set_window_style(&self, _window: WindowHandle, field: StyleField, style: WindowStyle) {
        self.lock().styles.insert(field, style);
    }

    fn set_codepage(&self, codepage: u32) {
        self.lock().codepage = Some(codepage);
    }
}

/// Input side of the in-memory console
struct ChannelInput(Receiver<String>);

impl LineSource for ChannelInput {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        // A disconnected sender is end of input
        Ok(self.0.recv().ok())
    }
}

/// Output side of the in-memory console
#[derive(Clone, Default)]
struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    fail: Arc<AtomicBool>,
}

impl SharedBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console is gone"));
        }
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "console is gone"));
        }
        Ok(())
    }
}

/// Remove CSI and OSC escape sequences
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        match chars.next() {
            // CSI: parameters then a final byte in 0x40..=0x7E
            Some('[') => {
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: terminated by BEL or ST
            Some(']') => {
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    out
}
