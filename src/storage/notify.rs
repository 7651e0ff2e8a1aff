//! "Store changed" notification for the editing surface.
//!
//! Consumers either poll `generation()` and refresh when it moves, or hold a
//! receiver from `subscribe()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Emitted after an import applied at least one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChanged {
    pub generation: u64,
    pub source_device: String,
    pub applied: usize,
}

/// Broadcasts `StoreChanged` to every live subscriber.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    generation: AtomicU64,
    subscribers: Mutex<Vec<Sender<StoreChanged>>>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications emitted so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<StoreChanged> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Emit an event. Subscribers whose receiver was dropped are forgotten.
    pub fn notify(&self, source_device: &str, applied: usize) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let event = StoreChanged {
            generation,
            source_device: source_device.to_string(),
            applied,
        };

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::debug!(generation, subscribers = subscribers.len(), "Store changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_advances() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.generation(), 0);
        notifier.notify("dev-b", 3);
        notifier.notify("dev-b", 1);
        assert_eq!(notifier.generation(), 2);
    }

    #[test]
    fn test_subscribers_receive_events() {
        let notifier = ChangeNotifier::new();
        let rx = notifier.subscribe();
        let dropped = notifier.subscribe();
        drop(dropped);

        notifier.notify("dev-b", 2);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation, 1);
        assert_eq!(event.source_device, "dev-b");
        assert_eq!(event.applied, 2);
        assert_eq!(notifier.subscribers.lock().unwrap().len(), 1);
    }
}
