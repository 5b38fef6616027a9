//! # Script engine capability set.
//!
//! The supervisor never depends on a concrete embedding. Anything that can
//! evaluate source, call registered functions and accept native bindings
//! (interpreter, bytecode VM, out-of-process engine) plugs in through
//! [`ScriptEngine`] + [`EngineFactory`].
//!
//! ## Threading
//! An engine is owned by exactly one lifecycle task and only ever called from it.
//! It must be `Send` (the task may migrate between worker threads) but never needs
//! to be `Sync`. Native code that finishes work elsewhere marshals back through
//! [`InstanceControl::post`](crate::InstanceControl::post).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::control::InstanceControl;
use crate::engine::modules::ModuleSurface;
use crate::error::EngineError;
use crate::tenant::TenantId;

/// Lifecycle hooks a script may register while its source is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Runs once after evaluation.
    Boot,
    /// Runs after boot; the service is live afterwards.
    Start,
    /// Runs when the instance is stopped.
    Shutdown,
}

impl Hook {
    /// Lower-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::Boot => "boot",
            Hook::Start => "start",
            Hook::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the lifecycle task asks the engine to call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callable<'a> {
    /// A registered lifecycle hook.
    Hook(Hook),
    /// A scheduled job declared by the script.
    Job(&'a str),
}

/// A job the script declared; fired every `every` once the instance is started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Job name, passed back to [`ScriptEngine::call`] as [`Callable::Job`].
    pub name: String,
    /// Firing period.
    pub every: Duration,
}

/// An HTTP-like request routed to a tenant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Upper-case method.
    pub method: String,
    /// Path relative to the tenant's mount point.
    pub path: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw body.
    #[serde(default)]
    pub body: Vec<u8>,
}

impl RouteRequest {
    /// Request without headers or body.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Response produced by a route handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Raw body.
    #[serde(default)]
    pub body: Vec<u8>,
}

impl RouteResponse {
    /// Response with a status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }
}

/// Capability set of an embedded engine.
#[async_trait]
pub trait ScriptEngine: Send + 'static {
    /// Installs a native module surface under `name` in the global namespace.
    fn bind(&mut self, name: &str, surface: ModuleSurface) -> Result<(), EngineError>;

    /// Evaluates the top-level source. Registers hooks, routes and jobs as side
    /// effects but does not invoke them.
    async fn evaluate(&mut self, source: &str) -> Result<(), EngineError>;

    /// True if the script registered `hook`.
    fn has_hook(&self, hook: Hook) -> bool;

    /// Calls a hook or job with `args`.
    async fn call(&mut self, target: Callable<'_>, args: Vec<Value>) -> Result<Value, EngineError>;

    /// Number of routes the script declared.
    fn route_count(&self) -> usize {
        0
    }

    /// Dispatches a request; `Ok(None)` when no route matches.
    async fn dispatch_route(
        &mut self,
        request: RouteRequest,
    ) -> Result<Option<RouteResponse>, EngineError>;

    /// Jobs the script declared.
    fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        Vec::new()
    }

    /// Current heap usage in bytes, if the engine can tell.
    fn memory_bytes(&self) -> u64 {
        0
    }
}

/// Builds one engine per run.
pub trait EngineFactory: Send + Sync + 'static {
    /// Constructs an engine for `tenant`. `control` is the instance's mailbox handle;
    /// engines keep it if native code needs to call back into the lifecycle task.
    fn create(
        &self,
        tenant: &TenantId,
        control: InstanceControl,
    ) -> Result<Box<dyn ScriptEngine>, EngineError>;
}
