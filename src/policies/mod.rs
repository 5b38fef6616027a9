//! Restart policies.
//!
//! This module groups the knobs that decide **whether** a faulted tenant is
//! restarted and **how long** to wait first.
//!
//! ## Contents
//! - [`RestartPolicy`], [`RestartState`], [`RestartDecision`] the crash state machine
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomisation to avoid synchronized restarts
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { restart: RestartPolicy { backoff, max_failures, healthy_after } }
//!      └─► core::watcher (one per instance):
//!           - RestartState::on_fault(policy, uptime) → Retry / GiveUp / Suppressed
//!           - sleep(delay), cancellable by stop
//! ```
//!
//! ## Defaults
//! - backoff 1s, ×2, capped at 30s, no jitter → 1s, 2s, 4s, 8s, 16s
//! - give up when the 6th consecutive fault arrives
//! - a run that survives 1s resets the streak

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::{RestartDecision, RestartPolicy, RestartState};
