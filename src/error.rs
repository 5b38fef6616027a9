//! Error types used by the tenantvisor runtime and script instances.
//!
//! - [`RuntimeError`]: returned by every [`Supervisor`](crate::Supervisor) operation.
//! - [`SetupError`]: synchronous `start` failures; the instance is never registered.
//! - [`EngineError`]: failures reported by a [`ScriptEngine`](crate::ScriptEngine).
//! - [`Fault`]: an unhandled error or panic that ended an instance. Faults are
//!   never returned from the API; they drive the crash watcher.
//! - [`StoreError`], [`ModuleError`]: collaborator failures.
//!
//! Every enum provides `as_label` (stable snake_case, for logs/metrics).

use std::time::Duration;

use thiserror::Error;

use crate::tenant::TenantId;

/// # Errors produced by the supervisor API.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// `start` was called with an empty (or whitespace-only) source.
    #[error("tenant {tenant}: source must not be empty")]
    EmptySource {
        /// Tenant the call was made for.
        tenant: TenantId,
    },

    /// Synchronous setup failed; nothing was registered.
    #[error("tenant {tenant}: setup failed: {source}")]
    Setup {
        /// Tenant the call was made for.
        tenant: TenantId,
        /// What failed.
        #[source]
        source: SetupError,
    },

    /// No instance (and no pending restart) exists for the tenant.
    #[error("tenant {tenant} is not running")]
    NotRunning {
        /// Tenant the call was made for.
        tenant: TenantId,
    },

    /// `restart` found neither a cached nor a persisted source.
    #[error("tenant {tenant}: no source available to restart from")]
    NoSource {
        /// Tenant the call was made for.
        tenant: TenantId,
    },

    /// The script has no route for the request.
    #[error("tenant {tenant}: no route for {method} {path}")]
    NoRoute {
        /// Tenant the call was made for.
        tenant: TenantId,
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// The route handler raised an error.
    #[error("tenant {tenant}: route handler failed: {source}")]
    RouteFailed {
        /// Tenant the call was made for.
        tenant: TenantId,
        /// Engine-side error.
        #[source]
        source: EngineError,
    },

    /// The route handler did not answer in time.
    #[error("tenant {tenant}: route handler timed out after {timeout:?}")]
    RouteTimedOut {
        /// Tenant the call was made for.
        tenant: TenantId,
        /// Configured route timeout.
        timeout: Duration,
    },

    /// `stop_all` did not finish within the grace period; stuck instances were aborted.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Tenants whose instances did not stop in time.
        stuck: Vec<TenantId>,
    },

    /// Persistent store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// OS signal listeners could not be installed.
    #[error("signal handler registration failed: {0}")]
    Signal(#[source] std::io::Error),

    /// Tenant id failed validation.
    #[error("invalid tenant id {id:?}: {reason}")]
    InvalidTenant {
        /// Rejected input.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tenantvisor::{RuntimeError, TenantId};
    ///
    /// let err = RuntimeError::NotRunning { tenant: TenantId::new("shop").unwrap() };
    /// assert_eq!(err.as_label(), "runtime_not_running");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::EmptySource { .. } => "runtime_empty_source",
            RuntimeError::Setup { .. } => "runtime_setup_failed",
            RuntimeError::NotRunning { .. } => "runtime_not_running",
            RuntimeError::NoSource { .. } => "runtime_no_source",
            RuntimeError::NoRoute { .. } => "runtime_no_route",
            RuntimeError::RouteFailed { .. } => "runtime_route_failed",
            RuntimeError::RouteTimedOut { .. } => "runtime_route_timeout",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Store(_) => "runtime_store",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::InvalidTenant { .. } => "runtime_invalid_tenant",
        }
    }

    /// True for errors an admin layer should report as "the tenant is not running".
    pub fn is_not_running(&self) -> bool {
        matches!(self, RuntimeError::NotRunning { .. })
    }
}

/// # Synchronous setup failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SetupError {
    /// The engine factory could not construct an engine.
    #[error("engine construction failed: {0}")]
    Engine(#[source] EngineError),

    /// Binding a native module into the engine failed.
    #[error("binding module '{module}' failed: {source}")]
    Module {
        /// Module name.
        module: String,
        /// Engine-side error.
        #[source]
        source: EngineError,
    },

    /// The per-run log sink could not be created.
    #[error("log sink creation failed: {0}")]
    LogSink(#[from] std::io::Error),
}

impl SetupError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SetupError::Engine(_) => "setup_engine",
            SetupError::Module { .. } => "setup_module",
            SetupError::LogSink(_) => "setup_log_sink",
        }
    }
}

/// # Errors reported by a script engine.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Script-level error (thrown exception, syntax error, rejected promise).
    #[error("script error: {0}")]
    Script(String),

    /// The engine refused a global binding.
    #[error("cannot bind '{name}': {reason}")]
    Bind {
        /// Global name.
        name: String,
        /// Engine message.
        reason: String,
    },

    /// Engine could not be constructed or is unusable.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::Script(_) => "engine_script",
            EngineError::Bind { .. } => "engine_bind",
            EngineError::Unavailable(_) => "engine_unavailable",
        }
    }
}

/// # Unhandled fault that ended an instance.
///
/// Only these drive the restart state machine. Hook errors and hook timeouts are
/// logged and never become a `Fault`.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Top-level evaluation of the source failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// A panic escaped the engine; recovered at the instance boundary.
    #[error("panicked: {0}")]
    Panic(String),

    /// The engine reported an unhandled asynchronous error through its control handle.
    #[error("unhandled error: {0}")]
    Reported(String),
}

impl Fault {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Fault::Evaluation(_) => "fault_evaluation",
            Fault::Panic(_) => "fault_panic",
            Fault::Reported(_) => "fault_reported",
        }
    }
}

/// # Persistent store failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// No source is stored for the tenant.
    #[error("no stored source for tenant {0}")]
    NotFound(TenantId),

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// # Native module initialisation failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ModuleError {
    /// Two providers registered under one name.
    #[error("module '{0}' registered twice")]
    Duplicate(String),

    /// `init` rejected its configuration.
    #[error("module '{module}' failed to initialise: {reason}")]
    Init {
        /// Module name.
        module: String,
        /// Provider message.
        reason: String,
    },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "store_not_found",
            StoreError::Backend(_) => "store_backend",
        }
    }
}

impl ModuleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Duplicate(_) => "module_duplicate",
            ModuleError::Init { .. } => "module_init",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_error_wraps_source() {
        let tenant = TenantId::new("shop").unwrap();
        let err = RuntimeError::Setup {
            tenant,
            source: SetupError::Module {
                module: "kv".into(),
                source: EngineError::Bind {
                    name: "kv".into(),
                    reason: "taken".into(),
                },
            },
        };
        assert_eq!(err.as_label(), "runtime_setup_failed");
        let text = err.to_string();
        assert!(text.contains("shop") && text.contains("'kv'"), "{text}");
    }

    #[test]
    fn fault_labels_are_stable() {
        assert_eq!(Fault::Evaluation("x".into()).as_label(), "fault_evaluation");
        assert_eq!(Fault::Panic("x".into()).as_label(), "fault_panic");
        assert_eq!(Fault::Reported("x".into()).as_label(), "fault_reported");
    }
}
