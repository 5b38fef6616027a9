//! Runtime events: types and broadcast bus.
//!
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! **Publishers**: `Supervisor`, instance lifecycle tasks, crash watchers and
//! `SubscriberSet` workers. **Consumers**: the subscriber listener (fans out to
//! `SubscriberSet`) and anyone holding a receiver from `Supervisor::subscribe`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
