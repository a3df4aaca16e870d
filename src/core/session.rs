//! Session management
//!
//! [`Console`] owns the single console session of its platform: the
//! open/closed state, the worker thread hosting the interaction loop, the
//! cancellation token of the current session and the user callbacks.
//!
//! Open and close are serialized on the session lock and raise their events
//! only after releasing it, so observers may call back into the console.

use std::fmt;
use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::Thread;

use crossterm::terminal::SetTitle;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cancel::CancellationToken;
use super::dispatch::CommandError;
use super::events::{ConsoleEvent, EventHub, Subscription};
use super::platform::{ConsolePlatform, LineSource, PlatformError, StyleField, WindowHandle, WindowStyle};
use super::worker;
use super::writer::{write_command, WriteSerializer};
use crate::config::{ConsoleColor, ConsoleConfig};

/// Foreground painted on a fresh console so startup text is visible
pub const STARTUP_COLOR: ConsoleColor = ConsoleColor::Yellow;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Console is already open")]
    AlreadyOpen,

    #[error("Console is not open")]
    NotOpen,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Command handler, invoked with each command line
pub type Handler = Arc<dyn Fn(&Console, &str) -> anyhow::Result<()> + Send + Sync>;

/// Receives every failure reported by the dispatcher and the worker
pub type ExceptionHandler = Arc<dyn Fn(&CommandError) + Send + Sync>;

/// Custom worker body, replacing the default read loop
pub type MainTask = Arc<dyn Fn(TaskContext) -> anyhow::Result<()> + Send + Sync>;

/// Everything a custom main task gets from the session that started it
pub struct TaskContext {
    /// Handle to the owning console
    pub console: Console,
    /// Arguments passed to `open_with_args`
    pub args: Vec<String>,
    /// Triggered when the session closes
    pub cancel: CancellationToken,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Closed,
    Open,
}

struct SessionState {
    status: SessionStatus,
    window: Option<WindowHandle>,
    worker: Option<Thread>,
    cancel: Option<CancellationToken>,
    /// Bumped on every open; tags the worker of that session
    generation: u64,
}

/// Values consulted at open and execute time
struct Settings {
    title: String,
    exit_command: String,
    write_executed: bool,
    hide_buttons: bool,
    hide_from_taskbar: bool,
    codepage: Option<u32>,
    info_color: ConsoleColor,
    error_color: ConsoleColor,
}

#[derive(Default)]
struct Callbacks {
    handler: Option<Handler>,
    exception_handler: Option<ExceptionHandler>,
    main_task: Option<MainTask>,
}

pub(crate) type SharedInput = Arc<Mutex<Box<dyn LineSource>>>;

pub(crate) struct Inner {
    platform: Arc<dyn ConsolePlatform>,
    session: Mutex<SessionState>,
    pub(crate) writer: WriteSerializer,
    /// Input of the open console. Readers clone the `Arc` and lock it
    /// themselves so a blocked read never holds this slot.
    input: Mutex<Option<SharedInput>>,
    settings: RwLock<Settings>,
    callbacks: RwLock<Callbacks>,
    pub(crate) events: EventHub,
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn input(&self) -> MutexGuard<'_, Option<SharedInput>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn input_source(&self) -> Option<SharedInput> {
        self.input().clone()
    }

    fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings_mut(&self) -> RwLockWriteGuard<'_, Settings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> RwLockReadGuard<'_, Callbacks> {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks_mut(&self) -> RwLockWriteGuard<'_, Callbacks> {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a managed console session. Clones share the same session.
#[derive(Clone)]
pub struct Console {
    pub(crate) inner: Arc<Inner>,
}

impl Console {
    /// Create a closed console on top of `platform`
    pub fn new(platform: Arc<dyn ConsolePlatform>, config: ConsoleConfig) -> Self {
        let ConsoleConfig {
            title,
            exit_command,
            write_executed,
            hide_buttons,
            hide_from_taskbar,
            codepage,
            colors,
        } = config;

        Self {
            inner: Arc::new(Inner {
                platform,
                session: Mutex::new(SessionState {
                    status: SessionStatus::Closed,
                    window: None,
                    worker: None,
                    cancel: None,
                    generation: 0,
                }),
                writer: WriteSerializer::new(STARTUP_COLOR, colors.back),
                input: Mutex::new(None),
                settings: RwLock::new(Settings {
                    title,
                    exit_command,
                    write_executed,
                    hide_buttons,
                    hide_from_taskbar,
                    codepage,
                    info_color: colors.info,
                    error_color: colors.error,
                }),
                callbacks: RwLock::new(Callbacks::default()),
                events: EventHub::default(),
            }),
        }
    }

    /// Open a session with no arguments
    pub fn open(&self) -> Result<(), ConsoleError> {
        self.open_with_args(Vec::<String>::new())
    }

    /// Allocate a console, redirect the standard streams into it and start
    /// the worker. `args` are handed to the custom main task, if any.
    pub fn open_with_args<I, S>(&self, args: I) -> Result<(), ConsoleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let platform = self.inner.platform.as_ref();

        let mut session = self.inner.session();
        if session.status == SessionStatus::Open {
            debug!("Open ignored: console already open");
            return Err(ConsoleError::AlreadyOpen);
        }

        platform.allocate()?;

        let streams = match platform.redirect_streams() {
            Ok(streams) => streams,
            Err(e) => {
                let _ = platform.release();
                platform.restore_streams();
                return Err(e.into());
            }
        };

        let (title, hide_buttons, hide_from_taskbar, codepage) = {
            let settings = self.inner.settings();
            (
                settings.title.clone(),
                settings.hide_buttons,
                settings.hide_from_taskbar,
                settings.codepage,
            )
        };

        let input: SharedInput = Arc::new(Mutex::new(streams.input));
        self.inner.writer.attach(streams.output, STARTUP_COLOR);
        *self.inner.input() = Some(input.clone());
        self.inner
            .writer
            .with_output(|w| write_command(w, SetTitle(&title)));

        let window = platform.window();
        if let Some(window) = window {
            apply_decorations(platform, window, hide_buttons, hide_from_taskbar);
        }
        if let Some(codepage) = codepage {
            platform.set_codepage(codepage);
        }

        let cancel = CancellationToken::new();
        let generation = session.generation + 1;
        let main_task = self.inner.callbacks().main_task.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = match worker::spawn(
            self.clone(),
            generation,
            args,
            cancel.clone(),
            main_task,
            input,
            ready_rx,
        ) {
            Ok(thread) => thread,
            Err(e) => {
                self.inner.writer.detach();
                self.inner.input().take();
                let _ = platform.release();
                platform.restore_streams();
                return Err(ConsoleError::Spawn(e));
            }
        };

        session.status = SessionStatus::Open;
        session.generation = generation;
        session.window = window;
        session.worker = Some(thread);
        session.cancel = Some(cancel);
        drop(session);

        info!("Console opened (session {}, window {:?})", generation, window);
        self.inner.events.emit(&ConsoleEvent::Opened);
        // The worker waits for this, so nothing it raises can precede Opened
        let _ = ready_tx.send(());
        Ok(())
    }

    /// Release the console and restore the original standard streams
    pub fn close(&self) -> Result<(), ConsoleError> {
        self.close_session(None)
    }

    /// Close on behalf of the worker of session `generation`.
    /// A worker from a superseded session cannot close a newer one.
    pub(crate) fn close_if_current(&self, generation: u64) -> bool {
        self.close_session(Some(generation)).is_ok()
    }

    fn close_session(&self, owner: Option<u64>) -> Result<(), ConsoleError> {
        let platform = self.inner.platform.as_ref();

        let mut session = self.inner.session();
        if session.status == SessionStatus::Closed {
            return Err(ConsoleError::NotOpen);
        }
        if let Some(generation) = owner {
            if generation != session.generation {
                debug!(
                    "Stale worker {} ignored, session {} is current",
                    generation, session.generation
                );
                return Err(ConsoleError::NotOpen);
            }
        }

        platform.release()?;

        if let Some(cancel) = session.cancel.take() {
            cancel.cancel();
        }
        session.status = SessionStatus::Closed;
        self.inner.writer.detach();
        self.inner.input().take();
        platform.restore_streams();
        session.worker = None;
        session.window = None;
        let generation = session.generation;
        drop(session);

        info!("Console closed (session {})", generation);
        self.inner.events.emit(&ConsoleEvent::Closed);
        Ok(())
    }

    /// Close if open, otherwise open
    pub fn toggle(&self) -> Result<(), ConsoleError> {
        if self.is_opened() {
            self.close()
        } else {
            self.open()
        }
    }

    /// Close if open, then open a fresh session
    pub fn reopen(&self) -> Result<(), ConsoleError> {
        self.reopen_with_args(Vec::<String>::new())
    }

    pub fn reopen_with_args<I, S>(&self, args: I) -> Result<(), ConsoleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.is_opened() {
            if let Err(e) = self.close() {
                warn!("Close before reopen failed: {}", e);
            }
        }
        self.open_with_args(args)
    }

    pub fn is_opened(&self) -> bool {
        self.inner.session().status == SessionStatus::Open
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.session().status
    }

    /// Worker thread of the open session
    pub fn working_thread(&self) -> Option<Thread> {
        self.inner.session().worker.clone()
    }

    /// Console window of the open session
    pub fn window_handle(&self) -> Option<WindowHandle> {
        self.inner.session().window
    }

    /// Register an observer for `Opened`, `Closed` and `InputReceived`
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConsoleEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub(crate) fn raise(&self, event: &ConsoleEvent) {
        self.inner.events.emit(event);
    }

    // Settings

    pub fn title(&self) -> String {
        self.inner.settings().title.clone()
    }

    /// Title applied at the next open
    pub fn set_title(&self, title: impl Into<String>) {
        self.inner.settings_mut().title = title.into();
    }

    pub fn exit_command(&self) -> String {
        self.inner.settings().exit_command.clone()
    }

    pub fn set_exit_command(&self, command: impl Into<String>) {
        self.inner.settings_mut().exit_command = command.into();
    }

    pub fn write_executed(&self) -> bool {
        self.inner.settings().write_executed
    }

    pub fn set_write_executed(&self, enabled: bool) {
        self.inner.settings_mut().write_executed = enabled;
    }

    pub fn hide_buttons(&self) -> bool {
        self.inner.settings().hide_buttons
    }

    pub fn set_hide_buttons(&self, hide: bool) {
        self.inner.settings_mut().hide_buttons = hide;
    }

    pub fn hide_from_taskbar(&self) -> bool {
        self.inner.settings().hide_from_taskbar
    }

    pub fn set_hide_from_taskbar(&self, hide: bool) {
        self.inner.settings_mut().hide_from_taskbar = hide;
    }

    pub fn codepage(&self) -> Option<u32> {
        self.inner.settings().codepage
    }

    pub fn set_codepage(&self, codepage: Option<u32>) {
        self.inner.settings_mut().codepage = codepage;
    }

    pub fn info_color(&self) -> ConsoleColor {
        self.inner.settings().info_color
    }

    pub fn set_info_color(&self, color: ConsoleColor) {
        self.inner.settings_mut().info_color = color;
    }

    pub fn error_color(&self) -> ConsoleColor {
        self.inner.settings().error_color
    }

    pub fn set_error_color(&self, color: ConsoleColor) {
        self.inner.settings_mut().error_color = color;
    }

    // Callbacks

    pub fn handler(&self) -> Option<Handler> {
        self.inner.callbacks().handler.clone()
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Console, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.callbacks_mut().handler = Some(Arc::new(handler));
    }

    pub fn clear_handler(&self) {
        self.inner.callbacks_mut().handler = None;
    }

    pub fn exception_handler(&self) -> Option<ExceptionHandler> {
        self.inner.callbacks().exception_handler.clone()
    }

    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&CommandError) + Send + Sync + 'static,
    {
        self.inner.callbacks_mut().exception_handler = Some(Arc::new(handler));
    }

    pub fn clear_exception_handler(&self) {
        self.inner.callbacks_mut().exception_handler = None;
    }

    pub fn main_task(&self) -> Option<MainTask> {
        self.inner.callbacks().main_task.clone()
    }

    /// Replace the default read loop from the next open on
    pub fn set_main_task<F>(&self, task: F)
    where
        F: Fn(TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.callbacks_mut().main_task = Some(Arc::new(task));
    }

    pub fn clear_main_task(&self) {
        self.inner.callbacks_mut().main_task = None;
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session();
        f.debug_struct("Console")
            .field("status", &session.status)
            .field("generation", &session.generation)
            .field("window", &session.window)
            .field("observers", &self.inner.events.len())
            .finish()
    }
}

/// Best-effort window decoration policy
fn apply_decorations(
    platform: &dyn ConsolePlatform,
    window: WindowHandle,
    hide_buttons: bool,
    hide_from_taskbar: bool,
) {
    if hide_buttons {
        let style = platform.window_style(window, StyleField::Style);
        platform.set_window_style(window, StyleField::Style, style - WindowStyle::SYSMENU);
    }
    if hide_from_taskbar {
        let style = platform.window_style(window, StyleField::ExStyle);
        platform.set_window_style(
            window,
            StyleField::ExStyle,
            (style - WindowStyle::APPWINDOW) | WindowStyle::TOOLWINDOW,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryPlatform;
    use crossterm::style::SetForegroundColor;
    use crossterm::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn console() -> (Console, Arc<MemoryPlatform>) {
        let platform = Arc::new(MemoryPlatform::new());
        let console = Console::new(platform.clone(), ConsoleConfig::default());
        (console, platform)
    }

    /// Counts events of one kind and forwards them to a channel
    fn watch(console: &Console, kind: ConsoleEvent) -> (Arc<AtomicUsize>, mpsc::Receiver<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = count.clone();
        let tx = Mutex::new(tx);
        console.subscribe(move |event| {
            if *event == kind {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.lock().unwrap().send(());
            }
        });
        (count, rx)
    }

    /// Forwards every event to a channel
    fn events(console: &Console) -> mpsc::Receiver<ConsoleEvent> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        console.subscribe(move |event| {
            let _ = tx.lock().unwrap().send(event.clone());
        });
        rx
    }

    fn fore_ansi(color: ConsoleColor) -> String {
        let mut ansi = String::new();
        SetForegroundColor(color.to_crossterm())
            .write_ansi(&mut ansi)
            .unwrap();
        ansi
    }

    /// Keeps the worker parked until the session is cancelled
    fn park_until_cancelled(console: &Console) {
        console.set_main_task(|ctx| {
            ctx.cancel.wait();
            Ok(())
        });
    }

    #[test]
    fn test_open_close() {
        let (console, platform) = console();
        park_until_cancelled(&console);
        let (opened, _) = watch(&console, ConsoleEvent::Opened);
        let (closed, _) = watch(&console, ConsoleEvent::Closed);

        assert!(!console.is_opened());
        console.open().unwrap();
        assert!(console.is_opened());
        assert!(console.working_thread().is_some());
        assert!(console.window_handle().is_some());
        assert!(platform.is_allocated());

        console.close().unwrap();
        assert!(!console.is_opened());
        assert!(console.working_thread().is_none());
        assert!(console.window_handle().is_none());
        assert!(!platform.is_allocated());
        assert_eq!(platform.restores(), 1);

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_open_has_no_side_effects() {
        let (console, platform) = console();
        park_until_cancelled(&console);
        let (opened, _) = watch(&console, ConsoleEvent::Opened);

        console.open().unwrap();
        let worker = console.working_thread().unwrap().id();

        assert!(matches!(console.open(), Err(ConsoleError::AlreadyOpen)));
        assert_eq!(console.working_thread().unwrap().id(), worker);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(platform.allocations(), 1);

        console.close().unwrap();
    }

    #[test]
    fn test_close_when_closed() {
        let (console, platform) = console();
        let (closed, _) = watch(&console, ConsoleEvent::Closed);

        assert!(matches!(console.close(), Err(ConsoleError::NotOpen)));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(platform.releases(), 0);
    }

    #[test]
    fn test_failed_allocate_leaves_state() {
        let (console, platform) = console();
        let (opened, _) = watch(&console, ConsoleEvent::Opened);
        platform.set_fail_allocate(true);

        assert!(matches!(
            console.open(),
            Err(ConsoleError::Platform(PlatformError::Allocate(_)))
        ));
        assert!(!console.is_opened());
        assert!(console.working_thread().is_none());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_release_keeps_session_open() {
        let (console, platform) = console();
        park_until_cancelled(&console);
        let (closed, _) = watch(&console, ConsoleEvent::Closed);

        console.open().unwrap();
        platform.set_fail_release(true);
        assert!(matches!(
            console.close(),
            Err(ConsoleError::Platform(PlatformError::Release(_)))
        ));
        assert!(console.is_opened());
        assert!(console.working_thread().is_some());
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        platform.set_fail_release(false);
        console.close().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_toggle_twice() {
        let (console, _platform) = console();
        park_until_cancelled(&console);

        console.toggle().unwrap();
        assert!(console.is_opened());
        console.toggle().unwrap();
        assert!(!console.is_opened());
    }

    #[test]
    fn test_reopen_starts_new_worker() {
        let (console, platform) = console();
        park_until_cancelled(&console);

        console.reopen().unwrap();
        let first = console.working_thread().unwrap().id();

        console.reopen().unwrap();
        let second = console.working_thread().unwrap().id();

        assert_ne!(first, second);
        assert_eq!(platform.allocations(), 2);
        assert_eq!(platform.releases(), 1);
        console.close().unwrap();
    }

    #[test]
    fn test_close_cancels_token() {
        let (console, _platform) = console();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        console.set_main_task(move |ctx| {
            let _ = tx.lock().unwrap().send(ctx.cancel.clone());
            ctx.cancel.wait();
            Ok(())
        });

        console.open().unwrap();
        let token = rx.recv_timeout(TIMEOUT).unwrap();
        assert!(!token.is_cancelled());

        console.close().unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_task_returning_closes_session_once() {
        let (console, platform) = console();
        console.set_main_task(|_| Ok(()));
        let (closed, closed_rx) = watch(&console, ConsoleEvent::Closed);

        console.open().unwrap();
        closed_rx.recv_timeout(TIMEOUT).unwrap();

        assert!(!console.is_opened());
        assert!(closed_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(platform.releases(), 1);
    }

    #[test]
    fn test_task_receives_args_and_writes_before_reading() {
        let (console, platform) = console();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        console.set_main_task(move |ctx| {
            if let Some(first) = ctx.args.first() {
                ctx.console.write_line(first);
            }
            let _ = tx.lock().unwrap().send(());
            while let Some(line) = ctx.console.read_line() {
                ctx.console.write_line(format!("read {}", line));
            }
            Ok(())
        });
        let (_, closed_rx) = watch(&console, ConsoleEvent::Closed);

        console.open_with_args(["first", "second"]).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
        assert!(platform.plain_output().contains("first\n"));
        assert!(!platform.plain_output().contains("second"));

        platform.close_input();
        closed_rx.recv_timeout(TIMEOUT).unwrap();
        assert!(!console.is_opened());
    }

    #[test]
    fn test_opened_precedes_closed_for_instant_task() {
        let (console, _platform) = console();
        console.set_main_task(|_| Ok(()));
        let rx = events(&console);

        for _ in 0..50 {
            console.open().unwrap();
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ConsoleEvent::Opened);
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ConsoleEvent::Closed);
        }
    }

    #[test]
    fn test_stale_worker_cannot_close_new_session() {
        let (console, _platform) = console();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);

        // Ignores cancellation and only returns when told to
        console.set_main_task(move |_| {
            let _ = started_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv_timeout(TIMEOUT);
            Ok(())
        });

        console.open().unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();
        console.close().unwrap();

        park_until_cancelled(&console);
        console.open().unwrap();

        // Let the first worker finish; its self-close must be ignored
        release_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(console.is_opened());

        console.close().unwrap();
    }

    #[test]
    fn test_window_decorations() {
        let (console, platform) = console();
        park_until_cancelled(&console);
        console.set_hide_buttons(true);
        console.set_hide_from_taskbar(true);

        console.open().unwrap();
        let style = platform.style(StyleField::Style);
        let ex_style = platform.style(StyleField::ExStyle);
        assert!(!style.contains(WindowStyle::SYSMENU));
        assert!(!ex_style.contains(WindowStyle::APPWINDOW));
        assert!(ex_style.contains(WindowStyle::TOOLWINDOW));
        console.close().unwrap();
    }

    #[test]
    fn test_decorations_untouched_by_default() {
        let (console, platform) = console();
        park_until_cancelled(&console);

        console.open().unwrap();
        assert!(platform.style(StyleField::Style).contains(WindowStyle::SYSMENU));
        assert_eq!(platform.style(StyleField::ExStyle), WindowStyle::APPWINDOW);
        console.close().unwrap();
    }

    #[test]
    fn test_headless_platform_opens_without_window() {
        let platform = Arc::new(MemoryPlatform::headless());
        let console = Console::new(platform.clone(), ConsoleConfig::default());
        park_until_cancelled(&console);
        console.set_hide_buttons(true);

        console.open().unwrap();
        assert!(console.is_opened());
        assert!(console.window_handle().is_none());
        console.close().unwrap();
    }

    #[test]
    fn test_open_paints_title_color_and_codepage() {
        let (console, platform) = console();
        park_until_cancelled(&console);
        console.set_title("Diagnostics");

        console.open().unwrap();
        assert!(platform.output().contains("\x1b]0;Diagnostics\x07"));
        assert_eq!(console.fore_color(), STARTUP_COLOR);
        assert_eq!(platform.codepage(), Some(crate::config::CP_UTF8));
        console.close().unwrap();
    }

    #[test]
    fn test_startup_color_ignores_configured_foreground() {
        let platform = Arc::new(MemoryPlatform::new());
        let config = ConsoleConfig::from_toml_str("[colors]\nfore = \"white\"").unwrap();
        let console = Console::new(platform.clone(), config);
        park_until_cancelled(&console);

        assert_eq!(console.fore_color(), STARTUP_COLOR);
        console.open().unwrap();
        assert_eq!(console.fore_color(), STARTUP_COLOR);
        assert!(platform.output().contains(&fore_ansi(STARTUP_COLOR)));
        assert!(!platform.output().contains(&fore_ansi(ConsoleColor::White)));
        console.close().unwrap();
    }

    #[test]
    fn test_writes_skipped_while_closed() {
        let (console, platform) = console();
        park_until_cancelled(&console);

        assert_eq!(console.write_line("nobody"), crate::core::writer::WriteOutcome::Skipped);
        console.open().unwrap();
        console.close().unwrap();
        assert_eq!(console.write_line("late"), crate::core::writer::WriteOutcome::Skipped);
        assert!(!platform.plain_output().contains("nobody"));
        assert!(!platform.plain_output().contains("late"));
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let (console, platform) = console();
        park_until_cancelled(&console);
        console.open().unwrap();
        platform.clear_output();

        let ambient = console.fore_color();
        let bystander = {
            let console = console.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(console.fore_color(), ambient);
                    console.write_line("D".repeat(40));
                }
            })
        };
        let writers: Vec<_> = [
            ("A", ConsoleColor::Red),
            ("B", ConsoleColor::Green),
            ("C", ConsoleColor::Blue),
        ]
        .into_iter()
        .map(|(text, color)| {
            let console = console.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    console.write_line_colored(text.repeat(40), color);
                }
            })
        })
        .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        bystander.join().unwrap();

        let plain = platform.plain_output();
        let lines: Vec<&str> = plain.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            assert!(
                ["A", "B", "C", "D"].iter().any(|c| line == c.repeat(40)),
                "interleaved line: {}",
                line
            );
        }

        // Plain writes always went out in the ambient color
        let plain_write = format!("{}{}\n", fore_ansi(ambient), "D".repeat(40));
        assert_eq!(platform.output().matches(&plain_write).count(), 50);
        assert_eq!(console.fore_color(), ambient);
        console.close().unwrap();
    }

    #[test]
    fn test_observer_can_call_back_into_console() {
        let (console, _platform) = console();
        park_until_cancelled(&console);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);

        let observer = console.clone();
        console.subscribe(move |event| {
            if *event == ConsoleEvent::Opened {
                let _ = tx.lock().unwrap().send(observer.is_opened());
            }
        });

        console.open().unwrap();
        assert!(rx.recv_timeout(TIMEOUT).unwrap());
        console.close().unwrap();
    }
}
