//! # Runtime events emitted by the supervisor, instances and crash watchers.
//!
//! [`EventKind`] classifies events in four groups:
//! - **Instance lifecycle**: starting, started, stopped, finished, faulted
//! - **Hooks**: a boot/start/shutdown hook or job failed or timed out
//! - **Restarts**: backoff scheduled, restart limit exceeded
//! - **Shutdown / subscribers**: process shutdown and subscriber health
//!
//! ## Ordering guarantees
//! Each event has a globally unique, monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tenantvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_tenant("shop")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(2))
//!     .with_reason("evaluation failed: x");
//!
//! assert_eq!(ev.tenant.as_deref(), Some("shop"));
//! assert_eq!(ev.delay_ms, Some(2_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event.
    ///
    /// Sets: `tenant` (subscriber name), `reason` (panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `tenant` (subscriber name), `reason`.
    SubscriberOverflow,

    // === Shutdown events ===
    /// Process shutdown requested (OS signal observed).
    ShutdownRequested,

    /// Every instance stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; stuck instances were aborted.
    ///
    /// Sets: `reason` (stuck tenants).
    GraceExceeded,

    // === Instance lifecycle ===
    /// Setup for a new instance begins.
    ///
    /// Sets: `tenant`, `attempt` (restart attempt; absent for explicit starts).
    InstanceStarting,

    /// Instance registered and its lifecycle task spawned.
    ///
    /// Sets: `tenant`, `attempt` (restart attempt; absent for explicit starts).
    InstanceStarted,

    /// Instance ended because it was cancelled (stop, stop-all, replacement).
    ///
    /// Sets: `tenant`.
    InstanceStopped,

    /// Script ended its run on purpose.
    ///
    /// Sets: `tenant`, `reason`.
    InstanceFinished,

    /// Unhandled fault ended the instance.
    ///
    /// Sets: `tenant`, `reason` (fault message).
    InstanceFaulted,

    // === Hooks ===
    /// Hook or job returned an error (logged, not a fault).
    ///
    /// Sets: `tenant`, `reason`.
    HookFailed,

    /// Hook or job exceeded its timeout.
    ///
    /// Sets: `tenant`, `timeout_ms`, `reason` (hook name).
    HookTimedOut,

    // === Restarts ===
    /// Automatic restart scheduled after a fault.
    ///
    /// Sets: `tenant`, `attempt`, `delay_ms`, `reason` (last fault).
    RestartScheduled,

    /// Restart limit exceeded; tenant stays down until started explicitly.
    ///
    /// Sets: `tenant`, `attempt` (consecutive faults), `reason`.
    RestartLimitExceeded,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Tenant (or subscriber name for subscriber events).
    pub tenant: Option<Arc<str>>,
    /// Restart attempt / consecutive fault count.
    pub attempt: Option<u32>,
    /// Backoff delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of `kind` stamped now with the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            tenant: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
        }
    }

    /// Attaches a tenant.
    #[inline]
    pub fn with_tenant(mut self, tenant: impl Into<Arc<str>>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(saturating_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds, saturating).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(saturating_ms(d));
        self
    }

    /// Attaches a reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_tenant(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_tenant(subscriber)
            .with_reason(info)
    }

    /// True for events produced by subscriber workers themselves.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn saturating_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::InstanceStarting);
        let b = Event::new(EventKind::InstanceStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn huge_durations_saturate() {
        let ev = Event::new(EventKind::HookTimedOut).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
