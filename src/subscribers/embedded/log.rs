//! # LogWriter: events rendered through `tracing`
//!
//! A subscriber that turns every runtime event into one `tracing` record, so hosts
//! that already install a `tracing` subscriber get supervisor activity for free.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  tenantvisor: instance started tenant="shop" attempt=None
//! ERROR tenantvisor: instance faulted tenant="shop" reason="evaluation failed: x"
//! WARN  tenantvisor: restart scheduled tenant="shop" attempt=1 delay_ms=1000
//! ERROR tenantvisor: restart limit exceeded tenant="shop" failures=6
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let tenant = e.tenant.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::InstanceStarting => {
                tracing::debug!(target: "tenantvisor", tenant, attempt = ?e.attempt, "instance starting")
            }
            EventKind::InstanceStarted => {
                tracing::info!(target: "tenantvisor", tenant, attempt = ?e.attempt, "instance started")
            }
            EventKind::InstanceStopped => {
                tracing::info!(target: "tenantvisor", tenant, "instance stopped")
            }
            EventKind::InstanceFinished => {
                tracing::info!(target: "tenantvisor", tenant, reason, "instance finished")
            }
            EventKind::InstanceFaulted => {
                tracing::error!(target: "tenantvisor", tenant, reason, "instance faulted")
            }
            EventKind::HookFailed => {
                tracing::warn!(target: "tenantvisor", tenant, reason, "hook failed")
            }
            EventKind::HookTimedOut => {
                tracing::warn!(target: "tenantvisor", tenant, reason, timeout_ms = ?e.timeout_ms, "hook timed out")
            }
            EventKind::RestartScheduled => tracing::warn!(
                target: "tenantvisor",
                tenant,
                attempt = ?e.attempt,
                delay_ms = ?e.delay_ms,
                reason,
                "restart scheduled"
            ),
            EventKind::RestartLimitExceeded => {
                tracing::error!(target: "tenantvisor", tenant, failures = ?e.attempt, "restart limit exceeded")
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "tenantvisor", "shutdown requested")
            }
            EventKind::AllStoppedWithin => {
                tracing::info!(target: "tenantvisor", "all instances stopped within grace")
            }
            EventKind::GraceExceeded => {
                tracing::error!(target: "tenantvisor", stuck = reason, "grace exceeded")
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "tenantvisor", subscriber = tenant, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: "tenantvisor", subscriber = tenant, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
