//! # Crash restart state machine.
//!
//! [`RestartPolicy`] is the static configuration; [`RestartState`] is the
//! per-tenant mutable part owned by the supervisor. The state outlives every
//! single instance: it survives automatic restarts and is only reset by an
//! explicit `start`.
//!
//! ```text
//!            fault                      failures <= max_failures
//! Running ──────────► Faulted ─────────────────────────────────► BackingOff ──(delay)──► Running
//!                        │
//!                        │ failures > max_failures
//!                        ▼
//!                      GivenUp (stays absent until an explicit start)
//! ```
//!
//! ## Rules
//! - `stopped_explicitly` suppresses every decision (always [`RestartDecision::Suppressed`]).
//! - An instance that ran for at least `healthy_after` before faulting counts as a fresh
//!   failure streak (the counter restarts at 1).
//! - The decision is pure: no clocks, no I/O. Callers pass the uptime in.

use std::time::Duration;

use crate::policies::backoff::BackoffPolicy;

/// Static restart configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestartPolicy {
    /// Delay computation between attempts.
    pub backoff: BackoffPolicy,
    /// Give up once the consecutive fault count exceeds this value (`0` disables restarts).
    pub max_failures: u32,
    /// Uptime after which an instance is considered healthy and the streak resets.
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    /// Backoff 1s ×2 up to 30s, give up after the 6th consecutive fault, healthy after 1s.
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_failures: 5,
            healthy_after: Duration::from_secs(1),
        }
    }
}

impl RestartPolicy {
    /// A policy that never restarts.
    pub fn never() -> Self {
        Self {
            max_failures: 0,
            ..Self::default()
        }
    }
}

/// What the crash watcher should do after a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartDecision {
    /// Wait `delay`, then start again. `attempt` is the 1-based restart number in this streak.
    Retry {
        /// Restart attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// Restart limit exceeded; the tenant stays down until an explicit start.
    GiveUp {
        /// Consecutive faults observed.
        failures: u32,
    },
    /// The tenant was stopped explicitly; do nothing.
    Suppressed,
}

/// Per-tenant restart bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestartState {
    /// Faults since the last healthy run or explicit start.
    pub consecutive_failures: u32,
    /// Delay chosen by the last `Retry` decision.
    pub next_delay: Option<Duration>,
    /// Set by an explicit stop; cleared only by an explicit start.
    pub stopped_explicitly: bool,
}

impl RestartState {
    /// Resets everything; used by an explicit start.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Marks an explicit stop. Permanently suppresses restarts until [`reset`](Self::reset).
    pub fn mark_stopped(&mut self) {
        self.stopped_explicitly = true;
        self.next_delay = None;
    }

    /// The streak as seen while the current run has been up for `uptime`: a run
    /// past `healthy_after` already counts as a reset, even before its next fault.
    pub fn streak(&self, policy: &RestartPolicy, uptime: Duration) -> u32 {
        if uptime >= policy.healthy_after {
            0
        } else {
            self.consecutive_failures
        }
    }

    /// Records a fault of an instance that ran for `uptime` and decides what to do.
    pub fn on_fault(&mut self, policy: &RestartPolicy, uptime: Duration) -> RestartDecision {
        if self.stopped_explicitly {
            return RestartDecision::Suppressed;
        }
        if uptime >= policy.healthy_after {
            self.consecutive_failures = 0;
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures > policy.max_failures {
            self.next_delay = None;
            return RestartDecision::GiveUp {
                failures: self.consecutive_failures,
            };
        }

        let delay = policy.backoff.delay_for(self.consecutive_failures);
        self.next_delay = Some(delay);
        RestartDecision::Retry {
            attempt: self.consecutive_failures,
            delay,
        }
    }
}
