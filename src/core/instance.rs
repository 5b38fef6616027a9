//! # ScriptInstance: one live run of a tenant's script.
//!
//! An instance owns exactly one engine and drives it on a single lifecycle task:
//!
//! ```text
//! spawn()
//!   └─► lifecycle task (catch_unwind boundary)
//!         evaluate(source) ──Err──────────────────────────────► Faulted(Evaluation)
//!         boot hook   (hook_timeout, error/timeout logged)
//!         start hook  (hook_timeout, error/timeout logged)
//!         scheduler::start(jobs)
//!         Running: select! {
//!             token.cancelled()       ──────────────────────────► Stopped
//!             mailbox: Route (route_timeout) | Job (hook_timeout) | Post
//!             mailbox: Finish         ──────────────────────────► Finished
//!             mailbox: Fault          ──────────────────────────► Faulted(Reported)
//!         }
//!         Stopped/Finished: shutdown hook (shutdown_timeout), scheduler stop, sink close
//!         Faulted:          scheduler stop (sink left open for the crash watcher)
//!   panic anywhere ─────────────────────────────────────────────► Faulted(Panic)
//!   exit ──► done: watch<Option<InstanceExit>>
//! ```
//!
//! ## Rules
//! - The cancellation token is created by the supervisor for this run only; it is
//!   never derived from anything a caller passed in.
//! - The engine is touched only by the lifecycle task.
//! - Counters used by the sampler and stats live in [`InstanceShared`] atomics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::{sampler, scheduler::Scheduler};
use crate::engine::{Callable, Command, Hook, InstanceControl, RouteOutcome, ScriptEngine};
use crate::error::{EngineError, Fault};
use crate::events::{Bus, Event, EventKind};
use crate::logs::{LogSink, Severity};
use crate::metrics::MetricsAggregator;
use crate::subscribers::panic_message;
use crate::tenant::TenantId;

/// Lifecycle phase of a registered instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Evaluating source or running boot/start hooks.
    Starting,
    /// Serving routes and jobs.
    Running,
    /// Running the shutdown hook.
    Stopping,
}

impl InstanceStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => InstanceStatus::Running,
            2 => InstanceStatus::Stopping,
            _ => InstanceStatus::Starting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            InstanceStatus::Starting => 0,
            InstanceStatus::Running => 1,
            InstanceStatus::Stopping => 2,
        }
    }
}

/// How a lifecycle task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum InstanceExit {
    /// Cancelled by the supervisor (stop, stop-all, replacement) or aborted.
    Stopped,
    /// The script ended its run on purpose.
    Finished { reason: String },
    /// Unhandled fault; drives the crash watcher.
    Faulted(Fault),
}

/// Counters shared between the lifecycle task, the sampler and stats readers.
#[derive(Debug, Default)]
pub(crate) struct InstanceShared {
    phase: AtomicU8,
    pub(crate) memory_bytes: AtomicU64,
    pub(crate) busy_micros: AtomicU64,
    pub(crate) requests: AtomicU64,
    pub(crate) jobs: AtomicU64,
    pub(crate) routes: AtomicUsize,
    pub(crate) scheduled_jobs: AtomicUsize,
}

impl InstanceShared {
    pub(crate) fn status(&self) -> InstanceStatus {
        InstanceStatus::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_status(&self, status: InstanceStatus) {
        self.phase.store(status.as_u8(), Ordering::Release);
    }
}

/// Everything a new run needs; produced by the supervisor's synchronous setup.
pub(crate) struct Launch {
    pub tenant: TenantId,
    pub generation: u64,
    pub engine: Box<dyn ScriptEngine>,
    pub control: InstanceControl,
    pub mailbox: mpsc::Receiver<Command>,
    pub sink: Arc<dyn LogSink>,
    pub source: Arc<str>,
    pub metrics: Arc<MetricsAggregator>,
    pub bus: Bus,
    pub hook_limit: Option<Duration>,
    pub route_limit: Option<Duration>,
    pub shutdown_limit: Option<Duration>,
    pub sample_every: Option<Duration>,
}

/// Registry-side handle of a running instance.
pub(crate) struct ScriptInstance {
    pub generation: u64,
    pub token: CancellationToken,
    pub control: InstanceControl,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub shared: Arc<InstanceShared>,
    pub metrics: Arc<MetricsAggregator>,
    pub sink: Arc<dyn LogSink>,
    pub done: watch::Receiver<Option<InstanceExit>>,
    abort: AbortHandle,
}

impl ScriptInstance {
    /// Spawns the lifecycle task and the metrics sampler. Never blocks.
    pub(crate) fn spawn(launch: Launch) -> Self {
        let token = CancellationToken::new();
        let scope = token.child_token();
        let shared = Arc::new(InstanceShared::default());
        let (done_tx, done) = watch::channel(None);

        if let Some(every) = launch.sample_every {
            sampler::spawn(
                Arc::clone(&shared),
                Arc::clone(&launch.metrics),
                every,
                scope.clone(),
            );
        }

        let lifecycle = Lifecycle {
            tenant: launch.tenant.clone(),
            engine: launch.engine,
            control: launch.control.clone(),
            mailbox: launch.mailbox,
            sink: Arc::clone(&launch.sink),
            source: launch.source,
            bus: launch.bus,
            shared: Arc::clone(&shared),
            token: token.clone(),
            scope: scope.clone(),
            scheduler: None,
            hook_limit: launch.hook_limit,
            route_limit: launch.route_limit,
            shutdown_limit: launch.shutdown_limit,
        };

        let sink = Arc::clone(&launch.sink);
        let join = tokio::spawn(async move {
            let scope_guard = scope.drop_guard();
            let exit = match AssertUnwindSafe(lifecycle.run()).catch_unwind().await {
                Ok(exit) => exit,
                Err(panic) => {
                    let fault = Fault::Panic(panic_message(panic.as_ref()));
                    sink.append(Severity::Error, &format!("unhandled fault: {fault}"));
                    InstanceExit::Faulted(fault)
                }
            };
            drop(scope_guard);
            let _ = done_tx.send(Some(exit));
        });

        Self {
            generation: launch.generation,
            token,
            control: launch.control,
            started_at: Utc::now(),
            started: Instant::now(),
            shared,
            metrics: launch.metrics,
            sink: launch.sink,
            done,
            abort: join.abort_handle(),
        }
    }

    /// True once the lifecycle task has ended (or was aborted).
    pub(crate) fn has_exited(&self) -> bool {
        self.done.borrow().is_some() || self.done.has_changed().is_err()
    }

    /// Waits for the lifecycle task to end.
    pub(crate) async fn wait(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(Option::is_some).await;
    }

    /// Kills the lifecycle task without running the shutdown hook.
    pub(crate) fn abort(&self) {
        self.abort.abort();
        self.sink.close();
    }

    pub(crate) fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Waits for the exit of a run. A dropped sender (aborted task) counts as stopped.
pub(crate) async fn wait_exit(done: &mut watch::Receiver<Option<InstanceExit>>) -> InstanceExit {
    match done.wait_for(Option::is_some).await {
        Ok(exit) => (*exit).clone().unwrap_or(InstanceExit::Stopped),
        Err(_) => InstanceExit::Stopped,
    }
}

enum CallOutcome {
    Done(Result<Value, EngineError>),
    TimedOut(Duration),
    Cancelled,
}

struct Lifecycle {
    tenant: TenantId,
    engine: Box<dyn ScriptEngine>,
    control: InstanceControl,
    mailbox: mpsc::Receiver<Command>,
    sink: Arc<dyn LogSink>,
    source: Arc<str>,
    bus: Bus,
    shared: Arc<InstanceShared>,
    token: CancellationToken,
    scope: CancellationToken,
    scheduler: Option<Scheduler>,
    hook_limit: Option<Duration>,
    route_limit: Option<Duration>,
    shutdown_limit: Option<Duration>,
}

impl Lifecycle {
    async fn run(mut self) -> InstanceExit {
        let exit = self.drive().await;

        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }

        match &exit {
            InstanceExit::Stopped | InstanceExit::Finished { .. } => {
                self.shared.set_status(InstanceStatus::Stopping);
                self.run_hook(Hook::Shutdown, self.shutdown_limit, false)
                    .await;
                let line = match &exit {
                    InstanceExit::Finished { reason } => format!("script finished: {reason}"),
                    _ => "instance stopped".to_string(),
                };
                self.sink.append(Severity::Info, &line);
                self.sink.close();
            }
            InstanceExit::Faulted(fault) => {
                self.sink
                    .append(Severity::Error, &format!("unhandled fault: {fault}"));
            }
        }
        exit
    }

    async fn drive(&mut self) -> InstanceExit {
        self.shared.set_status(InstanceStatus::Starting);

        let started = Instant::now();
        let evaluated = tokio::select! {
            res = self.engine.evaluate(&self.source) => res,
            _ = self.token.cancelled() => return InstanceExit::Stopped,
        };
        self.account(started);
        if let Err(e) = evaluated {
            return InstanceExit::Faulted(Fault::Evaluation(e.to_string()));
        }

        let jobs = self.engine.scheduled_jobs();
        self.shared
            .routes
            .store(self.engine.route_count(), Ordering::Relaxed);
        self.shared
            .scheduled_jobs
            .store(jobs.len(), Ordering::Relaxed);

        for hook in [Hook::Boot, Hook::Start] {
            if !self.run_hook(hook, self.hook_limit, true).await {
                return InstanceExit::Stopped;
            }
        }

        let job_count = jobs.len();
        self.scheduler = Some(Scheduler::start(jobs, self.control.clone(), &self.scope));
        self.shared.set_status(InstanceStatus::Running);
        self.sink.append(
            Severity::Info,
            &format!(
                "instance running ({} routes, {} jobs)",
                self.shared.routes.load(Ordering::Relaxed),
                job_count
            ),
        );

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return InstanceExit::Stopped,
                cmd = self.mailbox.recv() => match cmd {
                    Some(cmd) => {
                        if let Some(exit) = self.handle(cmd).await {
                            return exit;
                        }
                    }
                    None => {
                        self.token.cancelled().await;
                        return InstanceExit::Stopped;
                    }
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command) -> Option<InstanceExit> {
        match cmd {
            Command::Route { request, reply } => {
                let what = format!("route {} {}", request.method, request.path);
                let limit = self.route_limit;
                let started = Instant::now();
                let dispatch = self.engine.dispatch_route(request);
                let bounded = async move {
                    match limit {
                        Some(d) => time::timeout(d, dispatch).await.map_err(|_| d),
                        None => Ok(dispatch.await),
                    }
                };
                let res = tokio::select! {
                    res = bounded => res,
                    _ = self.token.cancelled() => return None,
                };
                self.account(started);
                self.shared.requests.fetch_add(1, Ordering::Relaxed);
                let answer = match res {
                    Ok(res) => RouteOutcome::Answered(res),
                    Err(limit) => {
                        self.report(&what, CallOutcome::TimedOut(limit));
                        RouteOutcome::TimedOut(limit)
                    }
                };
                let _ = reply.send(answer);
                None
            }
            Command::Job { name } => {
                let outcome = self
                    .invoke(Callable::Job(&name), self.hook_limit, true)
                    .await;
                self.shared.jobs.fetch_add(1, Ordering::Relaxed);
                self.report(&format!("job '{name}'"), outcome);
                None
            }
            Command::Post(callback) => {
                let started = Instant::now();
                callback(self.engine.as_mut()).await;
                self.account(started);
                None
            }
            Command::Finish { reason } => Some(InstanceExit::Finished { reason }),
            Command::Fault { message } => Some(InstanceExit::Faulted(Fault::Reported(message))),
        }
    }

    /// Runs `hook` if registered. Returns `false` if the run was cancelled meanwhile.
    async fn run_hook(&mut self, hook: Hook, limit: Option<Duration>, cancellable: bool) -> bool {
        if !self.engine.has_hook(hook) {
            return true;
        }
        let outcome = self.invoke(Callable::Hook(hook), limit, cancellable).await;
        if matches!(outcome, CallOutcome::Cancelled) {
            return false;
        }
        self.report(&format!("{hook} hook"), outcome);
        true
    }

    async fn invoke(
        &mut self,
        target: Callable<'_>,
        limit: Option<Duration>,
        cancellable: bool,
    ) -> CallOutcome {
        let started = Instant::now();
        let call = self.engine.call(target, Vec::new());
        let bounded = async move {
            match limit {
                Some(d) => match time::timeout(d, call).await {
                    Ok(res) => CallOutcome::Done(res),
                    Err(_) => CallOutcome::TimedOut(d),
                },
                None => CallOutcome::Done(call.await),
            }
        };
        let outcome = if cancellable {
            tokio::select! {
                outcome = bounded => outcome,
                _ = self.token.cancelled() => CallOutcome::Cancelled,
            }
        } else {
            bounded.await
        };
        self.account(started);
        outcome
    }

    fn report(&self, what: &str, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Done(Ok(_)) | CallOutcome::Cancelled => {}
            CallOutcome::Done(Err(e)) => {
                let reason = format!("{what} failed: {e}");
                self.sink.append(Severity::Error, &reason);
                self.bus.publish(
                    Event::new(EventKind::HookFailed)
                        .with_tenant(&self.tenant)
                        .with_reason(reason),
                );
            }
            CallOutcome::TimedOut(limit) => {
                self.sink.append(
                    Severity::Warn,
                    &format!("{what} timed out after {}ms", limit.as_millis()),
                );
                self.bus.publish(
                    Event::new(EventKind::HookTimedOut)
                        .with_tenant(&self.tenant)
                        .with_timeout(limit)
                        .with_reason(what),
                );
            }
        }
    }

    /// Books engine time and refreshes the memory gauge after an engine call.
    fn account(&self, started: Instant) {
        let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.shared.busy_micros.fetch_add(micros, Ordering::Relaxed);
        self.shared
            .memory_bytes
            .store(self.engine.memory_bytes(), Ordering::Relaxed);
    }
}
