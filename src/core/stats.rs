//! Read-only projections served to the admin layer.

use serde::Serialize;

use chrono::{DateTime, Utc};

use crate::core::instance::InstanceStatus;
use crate::metrics::History;
use crate::tenant::TenantId;

/// Point-in-time view of a running instance.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Tenant the instance belongs to.
    pub tenant: TenantId,
    /// Lifecycle phase.
    pub status: InstanceStatus,
    /// Wall-clock start of this run.
    pub started_at: DateTime<Utc>,
    /// Whole seconds since the run started.
    pub uptime_seconds: u64,
    /// Routes the script declared.
    pub routes_count: usize,
    /// Jobs the script declared.
    pub scheduled_jobs: usize,
    /// Faults since the last healthy run or explicit start; `0` once this run
    /// has been up for the policy's `healthy_after`.
    pub consecutive_failures: u32,
    /// Current engine memory.
    pub memory: MemoryStats,
    /// Route requests dispatched by this run.
    pub requests_total: u64,
    /// Jobs executed by this run.
    pub jobs_total: u64,
    /// Most recent points per metric.
    pub history: History,
}

/// Memory part of a [`Snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Engine heap usage in bytes, as last reported.
    pub current_bytes: u64,
}

/// Outcome of [`Supervisor::auto_start_all`](crate::Supervisor::auto_start_all).
#[derive(Clone, Debug, Default, Serialize)]
pub struct AutoStartReport {
    /// Tenants started successfully.
    pub started: Vec<TenantId>,
    /// Tenants that failed, with the error text.
    pub failed: Vec<AutoStartFailure>,
}

/// One failed auto-start.
#[derive(Clone, Debug, Serialize)]
pub struct AutoStartFailure {
    /// Tenant that failed.
    pub tenant: TenantId,
    /// Error label, see [`RuntimeError::as_label`](crate::RuntimeError::as_label).
    pub label: &'static str,
    /// Rendered error.
    pub error: String,
}
