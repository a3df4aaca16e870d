//! Session events
//!
//! Observers register a callback and get back a [`Subscription`] they can
//! cancel. Delivery is fire-and-forget on the thread that raised the event;
//! a panicking observer is logged and skipped, the rest still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

/// Session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// A console was allocated and the worker started
    Opened,
    /// The console was released
    Closed,
    /// A line was read from the console input
    InputReceived(String),
}

type Listener = Arc<dyn Fn(&ConsoleEvent) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, Listener)>>;

/// Registered observers
#[derive(Default)]
pub(crate) struct EventHub {
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConsoleEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn emit(&self, event: &ConsoleEvent) {
        // Snapshot so observers may subscribe or cancel from inside a callback
        let snapshot: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("Event observer panicked while handling {:?}", event);
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }
}

/// Registration handle returned by `Console::subscribe`.
///
/// Dropping it keeps the observer registered; call [`Subscription::cancel`]
/// to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the observer. Returns `false` if it was already gone.
    pub fn cancel(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = lock(&listeners);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

fn lock(listeners: &Listeners) -> MutexGuard<'_, Vec<(u64, Listener)>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_all_observers_notified() {
        let hub = EventHub::default();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            hub.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        hub.emit(&ConsoleEvent::Opened);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_panicking_observer_does_not_block_others() {
        let hub = EventHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        hub.subscribe(|_| panic!("observer failure"));
        let sink = seen.clone();
        hub.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        hub.emit(&ConsoleEvent::InputReceived("hello".to_string()));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConsoleEvent::InputReceived("hello".to_string())]
        );
    }

    #[test]
    fn test_cancel_subscription() {
        let hub = EventHub::default();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let subscription = hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hub.emit(&ConsoleEvent::Opened);

        assert!(subscription.cancel());
        assert_eq!(hub.len(), 0);
        hub.emit(&ConsoleEvent::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_after_hub_dropped() {
        let hub = EventHub::default();
        let subscription = hub.subscribe(|_| {});
        drop(hub);
        assert!(!subscription.cancel());
    }
}
