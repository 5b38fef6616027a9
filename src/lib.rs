//! # tenantvisor
//!
//! **Tenantvisor** supervises small script-defined services, one embedded engine
//! instance per tenant. It starts and gracefully stops instances, isolates their
//! crashes, restarts faulted instances with bounded exponential backoff and keeps
//! bounded-memory metrics history per tenant.
//!
//! The engine itself is a collaborator: anything implementing [`ScriptEngine`]
//! plugs in through an [`EngineFactory`], and native capability modules are
//! bound into it through [`NativeModule`] providers.
//!
//! ## Architecture
//! ```text
//!   admin layer ── start / stop / restart / stats / handle_route ──┐
//!                                                                   ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                           │
//! │  - Registry (RwLock<HashMap<TenantId, TenantSlot>>)                   │
//! │      TenantSlot: instance, RestartState, cached source, generation,   │
//! │                  pending restart, MetricsAggregator                   │
//! │  - EngineFactory + ModuleRegistry + LogSinkFactory + SourceStore      │
//! │  - Bus (broadcast events) ──► SubscriberSet (per-subscriber queues)   │
//! └──────┬────────────────────────────┬─────────────────────────┬─────────┘
//!        ▼                            ▼                         ▼
//!   ScriptInstance (tenant a)    ScriptInstance (b)        ScriptInstance (c)
//!   ├─ lifecycle task: evaluate → boot → start → mailbox loop → shutdown
//!   ├─ scheduler tickers ──► mailbox (Job)
//!   ├─ sampler ──► MetricsAggregator (memory, requests, jobs, cpu)
//!   └─ crash watcher: done ──► RestartPolicy ──► backoff ──► reinstall
//! ```
//!
//! ### Crash restart
//! ```text
//! Running ── fault ──► Faulted ──┬─ stopped explicitly ─► nothing
//!                                ├─ failures ≤ max ─────► BackingOff(1s, 2s, 4s, 8s, 16s) ─► Running
//!                                └─ failures > max ─────► GivenUp (until an explicit start)
//! ```
//!
//! ## Features
//! | Area              | Description                                                | Key types / traits                           |
//! |-------------------|------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Per-tenant lifecycle, routing, stats, process shutdown.    | [`Supervisor`], [`Snapshot`]                 |
//! | **Engine seam**   | Pluggable engine, mailbox back onto the lifecycle task.    | [`ScriptEngine`], [`InstanceControl`]        |
//! | **Native modules**| Providers discovered at process start, bound per run.      | [`NativeModule`], [`ModuleRegistry`]         |
//! | **Policies**      | Crash restart state machine with backoff and jitter.       | [`RestartPolicy`], [`BackoffPolicy`]         |
//! | **Metrics**       | Ring-buffered interval aggregates with a live tail.        | [`MetricsAggregator`], [`MetricBucket`]      |
//! | **Tenant logs**   | One sink per run, ISO-8601 stamped lines.                  | [`LogSink`], [`FileLogSinkFactory`]          |
//! | **Events**        | Runtime events for logging, alerting and tests.            | [`Event`], [`Subscribe`]                     |
//! | **Errors**        | Typed errors with stable labels.                           | [`RuntimeError`], [`SetupError`], [`Fault`]  |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a subscriber rendering events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use tenantvisor::{
//!     Bindings, Callable, EngineError, EngineFactory, Hook, InstanceControl,
//!     MemoryLogSinkFactory, ModuleSurface, RouteRequest, RouteResponse, ScriptEngine,
//!     Supervisor, SupervisorConfig, TenantId,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ScriptEngine for Echo {
//!     fn bind(&mut self, _name: &str, _surface: ModuleSurface) -> Result<(), EngineError> {
//!         Ok(())
//!     }
//!     async fn evaluate(&mut self, _source: &str) -> Result<(), EngineError> {
//!         Ok(())
//!     }
//!     fn has_hook(&self, _hook: Hook) -> bool {
//!         false
//!     }
//!     async fn call(&mut self, _target: Callable<'_>, _args: Vec<Value>) -> Result<Value, EngineError> {
//!         Ok(Value::Null)
//!     }
//!     async fn dispatch_route(
//!         &mut self,
//!         request: RouteRequest,
//!     ) -> Result<Option<RouteResponse>, EngineError> {
//!         Ok(Some(RouteResponse::new(200, request.path.into_bytes())))
//!     }
//! }
//!
//! struct EchoFactory;
//!
//! impl EngineFactory for EchoFactory {
//!     fn create(
//!         &self,
//!         _tenant: &TenantId,
//!         _control: InstanceControl,
//!     ) -> Result<Box<dyn ScriptEngine>, EngineError> {
//!         Ok(Box::new(Echo))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(SupervisorConfig::default(), Arc::new(EchoFactory))
//!         .with_log_sinks(Arc::new(MemoryLogSinkFactory::new()))
//!         .build();
//!
//!     let shop = TenantId::new("shop")?;
//!     sup.start(&shop, "service.start(() => {})", Bindings::none()).await?;
//!
//!     let res = sup.handle_route(&shop, RouteRequest::new("get", "/hello")).await?;
//!     assert_eq!(res.body, b"/hello");
//!
//!     sup.stop(&shop).await?;
//!     assert!(!sup.is_running(&shop).await);
//!     Ok(())
//! }
//! ```

mod core;
mod engine;
mod error;
mod events;
mod logs;
mod metrics;
mod policies;
mod store;
mod subscribers;
mod tenant;

// ---- Public re-exports ----

pub use core::{
    AutoStartFailure, AutoStartReport, InstanceStatus, MemoryStats, MetricsConfig, Snapshot,
    Supervisor, SupervisorBuilder, SupervisorConfig,
};
pub use engine::{
    Bindings, Callable, EngineCallback, EngineFactory, FunctionSchema, Hook, InstanceControl,
    InstanceGone, ModuleRegistry, ModuleSchema, ModuleSurface, NativeFn, NativeModule,
    RouteRequest, RouteResponse, ScheduledJob, ScriptEngine,
};
pub use error::{EngineError, Fault, ModuleError, RuntimeError, SetupError, StoreError};
pub use events::{Bus, Event, EventKind};
pub use logs::{
    FileLogSink, FileLogSinkFactory, LogSink, LogSinkFactory, MemoryLogSinkFactory, Severity,
    format_line,
};
pub use metrics::{
    Aggregation, History, Metric, MetricBucket, MetricPoint, MetricSample, MetricsAggregator,
};
pub use policies::{BackoffPolicy, JitterPolicy, RestartDecision, RestartPolicy, RestartState};
pub use store::{MemorySourceStore, SourceStore, TenantStatus};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tenant::TenantId;

// Optional: a built-in subscriber rendering events through `tracing`.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
