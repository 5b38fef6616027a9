//! # Event subscribers.
//!
//! ```text
//! Instance / Watcher ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                               ┌─────────┼─────────┐
//!                                                               ▼         ▼         ▼
//!                                                          LogWriter   Alerts    Custom
//! ```
//!
//! - [`Subscribe`] the extension trait
//! - [`SubscriberSet`] bounded, panic-isolated fan-out
//! - `LogWriter` (feature `logging`) renders events through `tracing`

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
