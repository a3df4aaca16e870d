//! Cancellation signal
//!
//! One token per open session. `Console::close` triggers it; the worker
//! (or a custom main task) observes it cooperatively.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One-shot cancellation token, cheap to clone
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Signal>,
}

#[derive(Default)]
struct Signal {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the session owning this token has been closed
    pub fn is_cancelled(&self) -> bool {
        *self.lock()
    }

    /// Trigger the token. Returns `false` if it was already triggered.
    pub(crate) fn cancel(&self) -> bool {
        let mut cancelled = self.lock();
        if *cancelled {
            return false;
        }
        *cancelled = true;
        self.inner.cond.notify_all();
        true
    }

    /// Block until cancelled
    pub fn wait(&self) {
        let mut cancelled = self.lock();
        while !*cancelled {
            cancelled = self
                .inner
                .cond
                .wait(cancelled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until cancelled or the timeout elapses. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (cancelled, _) = self
            .inner
            .cond
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn test_wait_wakes_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait());

        token.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
        token.cancel();
        assert!(token.wait_timeout(Duration::from_millis(10)));
    }
}
