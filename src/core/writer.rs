//! Write serializer
//!
//! Every write to the session output goes through one lock. Inside it the
//! current foreground is saved, the requested color applied, the text
//! written and the saved color restored, so concurrent writers never see
//! each other's colors or interleave their text.
//!
//! Writes while no console is attached are skipped. Failures from a console
//! that was torn down under us are never propagated; they come back as
//! [`WriteOutcome::Dropped`] and a debug log record.

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossterm::style::{SetBackgroundColor, SetForegroundColor};
use crossterm::Command;
use tracing::debug;

use super::events::ConsoleEvent;
use super::session::Console;
use crate::config::ConsoleColor;

/// Result of a best-effort write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The text reached the console
    Written,
    /// No console attached; nothing was attempted
    Skipped,
    /// The console rejected the write
    Dropped,
}

struct WriterState {
    output: Option<Box<dyn Write + Send>>,
    fore: ConsoleColor,
    back: ConsoleColor,
}

/// The write lock and the colors it guards
pub(crate) struct WriteSerializer {
    state: Mutex<WriterState>,
}

impl WriteSerializer {
    pub fn new(fore: ConsoleColor, back: ConsoleColor) -> Self {
        Self {
            state: Mutex::new(WriterState {
                output: None,
                fore,
                back,
            }),
        }
    }

    /// Install the output of a freshly allocated console and paint its colors
    pub fn attach(&self, output: Box<dyn Write + Send>, fore: ConsoleColor) -> WriteOutcome {
        let mut state = self.lock();
        state.output = Some(output);
        state.fore = fore;

        let (fore, back) = (state.fore, state.back);
        Self::run(&mut state, |w| {
            write_command(w, SetBackgroundColor(back.to_crossterm()))?;
            write_command(w, SetForegroundColor(fore.to_crossterm()))
        })
    }

    /// Remove the output stream; later writes are skipped
    pub fn detach(&self) -> Option<Box<dyn Write + Send>> {
        self.lock().output.take()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().output.is_some()
    }

    pub fn fore(&self) -> ConsoleColor {
        self.lock().fore
    }

    pub fn back(&self) -> ConsoleColor {
        self.lock().back
    }

    pub fn set_fore(&self, color: ConsoleColor) -> WriteOutcome {
        let mut state = self.lock();
        state.fore = color;
        Self::run(&mut state, |w| write_command(w, SetForegroundColor(color.to_crossterm())))
    }

    pub fn set_back(&self, color: ConsoleColor) -> WriteOutcome {
        let mut state = self.lock();
        state.back = color;
        Self::run(&mut state, |w| write_command(w, SetBackgroundColor(color.to_crossterm())))
    }

    /// Run `action` against the output without touching colors
    pub fn with_output<F>(&self, action: F) -> WriteOutcome
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        Self::run(&mut self.lock(), action)
    }

    /// Run `action` with the foreground set to `color` (current foreground if
    /// `None`), restoring the previous foreground afterwards
    pub fn write_with<F>(&self, color: Option<ConsoleColor>, action: F) -> WriteOutcome
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut state = self.lock();
        let saved = state.fore;
        let color = color.unwrap_or(saved);

        Self::run(&mut state, |w| {
            let written = write_command(w, SetForegroundColor(color.to_crossterm()))
                .and_then(|_| action(&mut *w));
            // Restore even if the write failed halfway
            let restored = write_command(w, SetForegroundColor(saved.to_crossterm()));
            written.and(restored)
        })
    }

    fn run<F>(state: &mut WriterState, action: F) -> WriteOutcome
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let Some(output) = state.output.as_mut() else {
            return WriteOutcome::Skipped;
        };

        match action(&mut **output).and_then(|_| output.flush()) {
            Ok(()) => WriteOutcome::Written,
            Err(e) => {
                debug!("Console write dropped: {}", e);
                WriteOutcome::Dropped
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write the ANSI form of a crossterm command.
///
/// Goes straight to the session stream instead of crossterm's queue, which
/// may fall back to WinAPI calls against the process stdout.
pub(crate) fn write_command(w: &mut dyn Write, command: impl Command) -> io::Result<()> {
    let mut ansi = String::new();
    command
        .write_ansi(&mut ansi)
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "failed to format escape sequence"))?;
    w.write_all(ansi.as_bytes())
}

impl Console {
    /// Write primitive: run `action` under the write lock with the foreground
    /// set to `color` (or the current foreground when `None`)
    pub fn write_with<F>(&self, color: Option<ConsoleColor>, action: F) -> WriteOutcome
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        self.inner.writer.write_with(color, action)
    }

    pub fn write(&self, value: impl Display) -> WriteOutcome {
        self.write_with(None, |w| write!(w, "{}", value))
    }

    pub fn write_colored(&self, value: impl Display, color: ConsoleColor) -> WriteOutcome {
        self.write_with(Some(color), |w| write!(w, "{}", value))
    }

    pub fn write_line(&self, value: impl Display) -> WriteOutcome {
        self.write_with(None, |w| writeln!(w, "{}", value))
    }

    pub fn write_line_colored(&self, value: impl Display, color: ConsoleColor) -> WriteOutcome {
        self.write_with(Some(color), |w| writeln!(w, "{}", value))
    }

    /// Write an empty line
    pub fn new_line(&self) -> WriteOutcome {
        self.write_with(None, |w| writeln!(w))
    }

    /// Write a line in the info color
    pub fn write_info(&self, message: impl Display) -> WriteOutcome {
        self.write_line_colored(message, self.info_color())
    }

    /// Write a line in the error color
    pub fn write_error(&self, message: impl Display) -> WriteOutcome {
        self.write_line_colored(message, self.error_color())
    }

    /// Block for one line of console input and raise `InputReceived` with it.
    ///
    /// Not serialized against writes. Returns `None` while closed or at end
    /// of input.
    pub fn read_line(&self) -> Option<String> {
        match self.read_raw() {
            Ok(Some(line)) => {
                self.inner
                    .events
                    .emit(&ConsoleEvent::InputReceived(line.clone()));
                Some(line)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Console read failed: {}", e);
                None
            }
        }
    }

    fn read_raw(&self) -> io::Result<Option<String>> {
        let Some(input) = self.inner.input_source() else {
            return Ok(None);
        };
        let mut input = input.lock().unwrap_or_else(PoisonError::into_inner);
        input.read_line()
    }

    pub fn fore_color(&self) -> ConsoleColor {
        self.inner.writer.fore()
    }

    /// Set the ambient foreground; applied immediately when open
    pub fn set_fore_color(&self, color: ConsoleColor) {
        self.inner.writer.set_fore(color);
    }

    pub fn back_color(&self) -> ConsoleColor {
        self.inner.writer.back()
    }

    /// Set the background; applied immediately when open
    pub fn set_back_color(&self, color: ConsoleColor) {
        self.inner.writer.set_back(color);
    }
}
