//! Windows console platform
//!
//! Wraps `AllocConsole`/`FreeConsole`, standard handle redirection and the
//! console window styles. A process owns at most one console, so only one
//! [`NativeConsole`] may exist at a time; [`NativeConsole::claim`] enforces it.

use super::platform::{
    ConsolePlatform, ConsoleStreams, PlatformError, Result, StyleField, WindowHandle, WindowStyle,
};

#[cfg(windows)]
pub use self::imp::NativeConsole;

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::fs::{File, OpenOptions};
    use std::io::{self, BufReader};
    use std::os::windows::io::AsRawHandle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use tracing::{debug, warn};
    use windows::Win32::Foundation::{HANDLE, HWND};
    use windows::Win32::System::Console::{
        AllocConsole, FreeConsole, GetConsoleMode, GetConsoleWindow, GetStdHandle, SetConsoleCP,
        SetConsoleMode, SetConsoleOutputCP, SetStdHandle, CONSOLE_MODE,
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE,
        STD_OUTPUT_HANDLE,
    };
    use windows::Win32::System::IO::CancelIoEx;
    use windows::Win32::UI::WindowsAndMessaging::{GWL_EXSTYLE, GWL_STYLE, WINDOW_LONG_PTR_INDEX};

    use super::*;
    use crate::core::platform::{ReaderInput, StreamKind};

    /// Set while a `NativeConsole` exists
    static CLAIMED: AtomicBool = AtomicBool::new(false);

    const STREAMS: [StreamKind; 3] = [StreamKind::Input, StreamKind::Output, StreamKind::Error];

    /// Console handles installed as the process standard streams
    struct Redirected {
        /// Handle the session reader blocks on
        reader: isize,
        _conin: File,
        _conout: File,
        _conerr: File,
    }

    /// The process console
    pub struct NativeConsole {
        /// Standard handles at claim time, indexed like `STREAMS`
        saved: [HANDLE; 3],
        redirected: Mutex<Option<Redirected>>,
    }

    // Safety: the saved handles are only passed back to SetStdHandle, which
    // may be called from any thread
    unsafe impl Send for NativeConsole {}
    unsafe impl Sync for NativeConsole {}

    impl NativeConsole {
        /// Take ownership of the process console, capturing the current
        /// standard handles for later restoration
        pub fn claim() -> Result<Self> {
            if CLAIMED
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(PlatformError::AlreadyClaimed);
            }

            let saved =
                STREAMS.map(|kind| unsafe { GetStdHandle(std_handle(kind)).unwrap_or_default() });
            debug!("Saved standard handles: {:?}", saved);

            Ok(Self {
                saved,
                redirected: Mutex::new(None),
            })
        }

        fn lock(&self) -> MutexGuard<'_, Option<Redirected>> {
            self.redirected.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Drop for NativeConsole {
        fn drop(&mut self) {
            CLAIMED.store(false, Ordering::SeqCst);
        }
    }

    impl ConsolePlatform for NativeConsole {
        fn allocate(&self) -> Result<()> {
            unsafe { AllocConsole() }.map_err(|_| PlatformError::Allocate(io::Error::last_os_error()))
        }

        fn release(&self) -> Result<()> {
            // Unblock a reader parked on the console input before it goes away
            if let Some(redirected) = self.lock().as_ref() {
                unsafe {
                    let _ = CancelIoEx(HANDLE(redirected.reader as *mut c_void), None);
                }
            }

            unsafe { FreeConsole() }.map_err(|_| PlatformError::Release(io::Error::last_os_error()))
        }

        fn redirect_streams(&self) -> Result<ConsoleStreams> {
            let open = |name: &str| {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(name)
                    .map_err(PlatformError::Redirect)
            };

            let conin = open("CONIN$")?;
            let conout = open("CONOUT$")?;
            let conerr = open("CONOUT$")?;
            enable_virtual_terminal(&conout);

            for (kind, file) in STREAMS.iter().zip([&conin, &conout, &conerr]) {
                unsafe { SetStdHandle(std_handle(*kind), raw(file)) }
                    .map_err(|_| PlatformError::Redirect(io::Error::last_os_error()))?;
            }

            let input = conin.try_clone().map_err(PlatformError::Redirect)?;
            let output = conout.try_clone().map_err(PlatformError::Redirect)?;

            *self.lock() = Some(Redirected {
                reader: raw(&input).0 as isize,
                _conin: conin,
                _conout: conout,
                _conerr: conerr,
            });

            Ok(ConsoleStreams {
                input: Box::new(ReaderInput(BufReader::new(input))),
                output: Box::new(output),
            })
        }

        fn restore_streams(&self) {
            for (kind, handle) in STREAMS.iter().zip(self.saved) {
                if let Err(e) = unsafe { SetStdHandle(std_handle(*kind), handle) } {
                    warn!("Failed to restore {:?} handle: {}", kind, e);
                }
            }
            // Closes our console handles
            self.lock().take();
        }

        fn window(&self) -> Option<WindowHandle> {
            let hwnd = unsafe { GetConsoleWindow() };
            if hwnd.0.is_null() {
                None
            } else {
                Some(WindowHandle(hwnd.0 as isize))
            }
        }

        fn window_style(&self, window: WindowHandle, field: StyleField) -> WindowStyle {
            let value = unsafe { get_window_long(hwnd(window), style_index(field)) };
            WindowStyle::from_bits_retain(value as u32)
        }

        fn set_window_style(&self, window: WindowHandle, field: StyleField, style: WindowStyle) {
            unsafe {
                set_window_long(hwnd(window), style_index(field), style.bits() as isize);
            }
        }

        fn set_codepage(&self, codepage: u32) {
            unsafe {
                let _ = SetConsoleOutputCP(codepage);
                let _ = SetConsoleCP(codepage);
            }
        }
    }

    fn std_handle(kind: StreamKind) -> STD_HANDLE {
        match kind {
            StreamKind::Input => STD_INPUT_HANDLE,
            StreamKind::Output => STD_OUTPUT_HANDLE,
            StreamKind::Error => STD_ERROR_HANDLE,
        }
    }

    fn style_index(field: StyleField) -> WINDOW_LONG_PTR_INDEX {
        match field {
            StyleField::Style => GWL_STYLE,
            StyleField::ExStyle => GWL_EXSTYLE,
        }
    }

    fn raw(file: &File) -> HANDLE {
        HANDLE(file.as_raw_handle())
    }

    fn hwnd(window: WindowHandle) -> HWND {
        HWND(window.0 as *mut c_void)
    }

    /// Let the console interpret the color and title escape sequences we write
    fn enable_virtual_terminal(conout: &File) {
        let handle = raw(conout);
        let mut mode = CONSOLE_MODE(0);
        unsafe {
            if GetConsoleMode(handle, &mut mode).is_ok() {
                let _ = SetConsoleMode(
                    handle,
                    CONSOLE_MODE(mode.0 | ENABLE_VIRTUAL_TERMINAL_PROCESSING.0),
                );
            }
        }
    }

    #[cfg(target_pointer_width = "64")]
    unsafe fn get_window_long(hwnd: HWND, index: WINDOW_LONG_PTR_INDEX) -> isize {
        windows::Win32::UI::WindowsAndMessaging::GetWindowLongPtrW(hwnd, index)
    }

    #[cfg(target_pointer_width = "64")]
    unsafe fn set_window_long(hwnd: HWND, index: WINDOW_LONG_PTR_INDEX, value: isize) {
        windows::Win32::UI::WindowsAndMessaging::SetWindowLongPtrW(hwnd, index, value);
    }

    #[cfg(target_pointer_width = "32")]
    unsafe fn get_window_long(hwnd: HWND, index: WINDOW_LONG_PTR_INDEX) -> isize {
        windows::Win32::UI::WindowsAndMessaging::GetWindowLongW(hwnd, index) as isize
    }

    #[cfg(target_pointer_width = "32")]
    unsafe fn set_window_long(hwnd: HWND, index: WINDOW_LONG_PTR_INDEX, value: isize) {
        windows::Win32::UI::WindowsAndMessaging::SetWindowLongW(hwnd, index, value as i32);
    }
}

/// The process console. Only available on Windows; elsewhere this type has
/// no values and [`NativeConsole::claim`] always fails.
#[cfg(not(windows))]
pub enum NativeConsole {}

#[cfg(not(windows))]
impl NativeConsole {
    pub fn claim() -> Result<Self> {
        Err(PlatformError::Unsupported)
    }
}

#[cfg(not(windows))]
impl ConsolePlatform for NativeConsole {
    fn allocate(&self) -> Result<()> {
        match *self {}
    }

    fn release(&self) -> Result<()> {
        match *self {}
    }

    fn redirect_streams(&self) -> Result<ConsoleStreams> {
        match *self {}
    }

    fn restore_streams(&self) {
        match *self {}
    }

    fn window(&self) -> Option<WindowHandle> {
        match *self {}
    }

    fn window_style(&self, _window: WindowHandle, _field: StyleField) -> WindowStyle {
        match *self {}
    }

    fn set_window_style(&self, _window: WindowHandle, _field: StyleField, _style: WindowStyle) {
        match *self {}
    }

    fn set_codepage(&self, _codepage: u32) {
        match *self {}
    }
}
