//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom event handlers (audit
//! trails, alerting, admin UI push) into the runtime. Each subscriber is driven by
//! its own worker fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they never block publishers or other subscribers.
//! - On queue overflow, events for that subscriber are **dropped**.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use tenantvisor::{Event, EventKind, Subscribe};
//!
//! struct CrashAlerts;
//!
//! #[async_trait]
//! impl Subscribe for CrashAlerts {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::RestartLimitExceeded {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "crash-alerts" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
