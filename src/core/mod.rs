//! Runtime core: per-tenant orchestration and instance lifecycle.
//!
//! The public surface of this module is [`Supervisor`] (plus its builder,
//! configuration and read-only projections).
//!
//! Internal modules:
//! - [`supervisor`]: start/stop/restart, routing, stats, process shutdown;
//! - [`registry`]: tenant slots behind one `RwLock`;
//! - [`instance`]: one run of a script on its lifecycle task;
//! - [`watcher`]: crash classification and restart with backoff;
//! - [`scheduler`], [`sampler`]: job tickers and metrics sampling per run;
//! - [`shutdown`]: OS signal handling.

mod builder;
mod config;
mod instance;
mod registry;
mod sampler;
mod scheduler;
mod shutdown;
mod stats;
mod supervisor;
mod watcher;

pub use builder::SupervisorBuilder;
pub use config::{MetricsConfig, SupervisorConfig};
pub use instance::InstanceStatus;
pub use stats::{AutoStartFailure, AutoStartReport, MemoryStats, Snapshot};
pub use supervisor::Supervisor;
