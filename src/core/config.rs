//! # Runtime configuration.
//!
//! [`SupervisorConfig`] centralises every timeout, capacity and policy the
//! supervisor uses; [`MetricsConfig`] covers per-instance sampling.
//!
//! ## Sentinel values
//! - `hook_timeout = 0s` → hooks and jobs run unbounded
//! - `shutdown_timeout = 0s` → shutdown hook unbounded; `stop` never force-releases
//! - `route_timeout = 0s` → route dispatch unbounded
//! - `grace = 0s` → `stop_all` does not wait, stuck instances are aborted immediately
//! - `sample_every = 0s` → metrics sampling disabled

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::RestartPolicy;

/// Extra time granted to a stopping instance on top of its shutdown hook budget.
const RELEASE_MARGIN: Duration = Duration::from_secs(1);

/// Global configuration for the supervisor runtime.
///
/// All fields are public. Prefer the helper accessors over sprinkling
/// sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Budget of a boot/start hook or one job run.
    pub hook_timeout: Duration,

    /// Budget of the shutdown hook.
    ///
    /// `stop` waits this long (plus a small margin) for the lifecycle task to
    /// exit before aborting it and force-releasing the log sink.
    pub shutdown_timeout: Duration,

    /// How long `handle_route` waits for the script to answer.
    pub route_timeout: Duration,

    /// Maximum time `stop_all` waits for every instance to stop.
    pub grace: Duration,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,

    /// Capacity of each instance mailbox (min 1).
    pub mailbox_capacity: usize,

    /// Crash restart policy shared by every tenant.
    pub restart: RestartPolicy,

    /// Per-instance metrics.
    pub metrics: MetricsConfig,

    /// Directory used by the default file log sinks.
    pub log_dir: PathBuf,
}

impl SupervisorConfig {
    /// Hook/job budget as an `Option` (`None` = unbounded).
    #[inline]
    pub fn hook_limit(&self) -> Option<Duration> {
        non_zero(self.hook_timeout)
    }

    /// Shutdown hook budget as an `Option` (`None` = unbounded).
    #[inline]
    pub fn shutdown_limit(&self) -> Option<Duration> {
        non_zero(self.shutdown_timeout)
    }

    /// Route budget as an `Option` (`None` = unbounded).
    #[inline]
    pub fn route_limit(&self) -> Option<Duration> {
        non_zero(self.route_timeout)
    }

    /// How long `stop` waits before force-releasing an instance.
    #[inline]
    pub fn release_limit(&self) -> Option<Duration> {
        self.shutdown_limit().map(|d| d + RELEASE_MARGIN)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Mailbox capacity clamped to a minimum of 1.
    #[inline]
    pub fn mailbox_capacity_clamped(&self) -> usize {
        self.mailbox_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// - `hook_timeout = 5s`, `shutdown_timeout = 5s`, `route_timeout = 30s`
    /// - `grace = 10s`
    /// - `bus_capacity = 1024`, `mailbox_capacity = 256`
    /// - `restart = RestartPolicy::default()` (1s ×2 up to 30s, give up after 5 restarts)
    /// - `log_dir = "logs"`
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            route_timeout: Duration::from_secs(30),
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
            mailbox_capacity: 256,
            restart: RestartPolicy::default(),
            metrics: MetricsConfig::default(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Per-instance metrics sampling and retention.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsConfig {
    /// Sampler tick (first tick fires immediately).
    pub sample_every: Duration,
    /// Width of one aggregated interval.
    pub bucket_interval: Duration,
    /// Finalized intervals kept per metric.
    pub bucket_capacity: usize,
    /// Points per metric returned in a stats snapshot.
    pub history_points: usize,
    /// Keep history when a tenant's instance is replaced (crash restart or new start).
    pub keep_history_across_restarts: bool,
}

impl MetricsConfig {
    /// Sampler tick as an `Option` (`None` = sampling disabled).
    #[inline]
    pub fn sample_limit(&self) -> Option<Duration> {
        non_zero(self.sample_every)
    }
}

impl Default for MetricsConfig {
    /// One sample per minute, 5 minute buckets, 288 buckets (24h), 20 points per snapshot.
    fn default() -> Self {
        Self {
            sample_every: Duration::from_secs(60),
            bucket_interval: Duration::from_secs(300),
            bucket_capacity: 288,
            history_points: 20,
            keep_history_across_restarts: false,
        }
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() { None } else { Some(d) }
}
