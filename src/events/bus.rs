//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: publishing never blocks, slow receivers
//! observe `RecvError::Lagged(n)` and skip the `n` oldest events, and events sent
//! while nobody listens are dropped.
//!
//! ```text
//! Publishers (many):                      Receivers:
//!   Supervisor ─┐
//!   Instance  ──┼──► Bus ──┬──► subscriber listener ──► SubscriberSet
//!   Watcher   ──┘          └──► Supervisor::subscribe() (callers, tests)
//! ```

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` (min 1) undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes to every current receiver; returns immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// New receiver observing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
