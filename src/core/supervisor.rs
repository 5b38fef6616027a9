//! # Supervisor: per-tenant instance registry, orchestration and shutdown.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`], the tenant
//! registry and the collaborators (engine factory, native modules, log sinks,
//! source store). Every operation addresses one tenant; at most one instance per
//! tenant is registered at any time and the last `start` wins.
//!
//! ## Architecture
//! ```text
//! start(tenant, source, bindings)
//!   ├─► validate source
//!   ├─► drain previous instance / pending restart ──► release (cancel, wait, force)
//!   ├─► prepare (sync): control channel, engine, bind modules, log sink
//!   │        └─ Err ──► RuntimeError::Setup (nothing registered)
//!   └─► install (write lock): reset RestartState, generation += 1,
//!            ScriptInstance::spawn(fresh CancellationToken), watcher::spawn
//!
//! stop(tenant)       write lock: stopped_explicitly = true, take instance + pending
//!                    └─► cancel ──► shutdown hook ──► sink closed
//! stop_all()         drain every slot ──► cancel all ──► wait_all_with_grace
//! crash watcher      done ──► Faulted ──► RestartPolicy ──► backoff ──► install
//!
//! Event flow:
//!   Instance / Watcher ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//! ```
//!
//! ## Cancellation
//! Instance lifetimes never depend on the caller. `start` takes no token: the
//! caller's future only covers synchronous setup, and dropping it after `start`
//! returned has no effect on the instance. Only `stop`, `stop_all`, a replacing
//! `start` and the crash watcher end a run.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;

use crate::core::builder::SupervisorBuilder;
use crate::core::config::SupervisorConfig;
use crate::core::instance::{Launch, ScriptInstance};
use crate::core::registry::{Registry, TenantSlot};
use crate::core::stats::{AutoStartFailure, AutoStartReport, MemoryStats, Snapshot};
use crate::core::{shutdown, watcher};
use crate::engine::{
    Bindings, Command, EngineFactory, InstanceControl, ModuleRegistry, ModuleSchema, RouteOutcome,
    RouteRequest, RouteResponse, ScriptEngine,
};
use crate::error::{RuntimeError, SetupError, StoreError};
use crate::events::{Bus, Event, EventKind};
use crate::logs::{LogSink, LogSinkFactory, Severity};
use crate::store::{SourceStore, TenantStatus};
use crate::subscribers::SubscriberSet;
use crate::tenant::TenantId;

/// Result of synchronous setup; consumed by `install`.
pub(super) struct Prepared {
    engine: Box<dyn ScriptEngine>,
    control: InstanceControl,
    mailbox: mpsc::Receiver<Command>,
    sink: Arc<dyn LogSink>,
}

/// Who asked for an install.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Origin {
    /// `start` / `restart` / auto-start.
    Explicit,
    /// Crash watcher, after waiting out the backoff of `generation`.
    Restart { generation: u64, attempt: u32 },
}

/// Supervises one script instance per tenant.
pub struct Supervisor {
    pub(super) cfg: SupervisorConfig,
    pub(super) bus: Bus,
    pub(super) registry: Registry,
    subs: Arc<SubscriberSet>,
    engines: Arc<dyn EngineFactory>,
    modules: Arc<ModuleRegistry>,
    sinks: Arc<dyn LogSinkFactory>,
    store: Arc<dyn SourceStore>,
    me: Weak<Supervisor>,
}

impl Supervisor {
    /// Starts building a supervisor around `engines`.
    pub fn builder(cfg: SupervisorConfig, engines: Arc<dyn EngineFactory>) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg, engines)
    }

    pub(super) fn new_internal(
        cfg: SupervisorConfig,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        engines: Arc<dyn EngineFactory>,
        modules: Arc<ModuleRegistry>,
        sinks: Arc<dyn LogSinkFactory>,
        store: Arc<dyn SourceStore>,
    ) -> Arc<Self> {
        let registry = Registry::new(cfg.metrics.bucket_interval, cfg.metrics.bucket_capacity);
        Arc::new_cyclic(|me| Self {
            cfg,
            bus,
            registry,
            subs,
            engines,
            modules,
            sinks,
            store,
            me: me.clone(),
        })
    }

    /// Forwards bus events to the subscriber set (fire-and-forget).
    pub(super) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Runtime configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Receiver of every runtime event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Starts `tenant` with `source`, replacing any running instance.
    ///
    /// Returns once the instance is registered. Errors are synchronous setup
    /// failures only; faults of the script's own evaluation and hooks are written
    /// to the tenant log and handled by the crash watcher.
    ///
    /// The instance runs under a cancellation scope owned by the supervisor.
    /// Nothing the caller holds is retained: dropping or cancelling the calling
    /// task after this returns leaves the instance running.
    pub async fn start(
        &self,
        tenant: &TenantId,
        source: &str,
        bindings: Bindings,
    ) -> Result<(), RuntimeError> {
        if source.trim().is_empty() {
            return Err(RuntimeError::EmptySource {
                tenant: tenant.clone(),
            });
        }

        let previous = {
            let mut slots = self.registry.write().await;
            slots.get_mut(tenant).and_then(|slot| slot.drain())
        };
        if let Some(previous) = previous {
            tracing::info!(tenant = %tenant, "replacing running instance");
            self.release(previous).await;
        }

        self.bus
            .publish(Event::new(EventKind::InstanceStarting).with_tenant(tenant));
        let prepared = self.prepare(tenant, &bindings).map_err(|err| {
            tracing::warn!(tenant = %tenant, label = err.as_label(), error = %err, "setup failed");
            RuntimeError::Setup {
                tenant: tenant.clone(),
                source: err,
            }
        })?;

        // Before install: the run may finish or give up (and persist) right away.
        self.persist(tenant, TenantStatus::Running).await;
        self.install(tenant, prepared, Arc::from(source), bindings, Origin::Explicit)
            .await;
        tracing::info!(tenant = %tenant, "instance started");
        Ok(())
    }

    /// Stops `tenant` and suppresses automatic restarts until the next `start`.
    ///
    /// Also cancels a restart that is waiting out its backoff. Fails with
    /// `NotRunning` if there is neither an instance nor a pending restart.
    pub async fn stop(&self, tenant: &TenantId) -> Result<(), RuntimeError> {
        let instance = {
            let mut slots = self.registry.write().await;
            let slot = match slots.get_mut(tenant) {
                Some(slot) if slot.instance.is_some() || slot.pending.is_some() => slot,
                _ => return Err(not_running(tenant)),
            };
            slot.restart.mark_stopped();
            slot.drain()
        };

        if let Some(instance) = instance {
            self.release(instance).await;
        }
        self.persist(tenant, TenantStatus::Stopped).await;
        tracing::info!(tenant = %tenant, "instance stopped");
        Ok(())
    }

    /// Stops `tenant` (if running) and starts it again from its last source.
    ///
    /// Uses the source cached by the last start, falling back to the store.
    pub async fn restart(&self, tenant: &TenantId) -> Result<(), RuntimeError> {
        let (cached, bindings) = {
            let slots = self.registry.read().await;
            match slots.get(tenant) {
                Some(slot) => (slot.source.clone(), slot.bindings.clone()),
                None => (None, Bindings::default()),
            }
        };
        let source = match cached {
            Some(source) => source.to_string(),
            None => match self.store.load(tenant).await {
                Ok(source) => source,
                Err(StoreError::NotFound(_)) => {
                    return Err(RuntimeError::NoSource {
                        tenant: tenant.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            },
        };

        match self.stop(tenant).await {
            Ok(()) => {}
            Err(e) if e.is_not_running() => {}
            Err(e) => return Err(e),
        }
        self.start(tenant, &source, bindings).await
    }

    /// Stops every instance (process shutdown) within [`SupervisorConfig::grace`].
    ///
    /// Does not mark tenants as explicitly stopped and leaves their persisted
    /// status untouched, so the next boot's [`auto_start_all`](Self::auto_start_all)
    /// resumes them. Instances still running after the grace period are aborted
    /// and reported in [`RuntimeError::GraceExceeded`].
    pub async fn stop_all(&self) -> Result<(), RuntimeError> {
        let drained = self.registry.drain_all().await;
        for (_, instance) in &drained {
            instance.token.cancel();
        }
        self.wait_all_with_grace(drained).await
    }

    async fn wait_all_with_grace(
        &self,
        drained: Vec<(TenantId, ScriptInstance)>,
    ) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let all = futures::future::join_all(drained.iter().map(|(_, i)| i.wait()));
        let within = time::timeout(grace, all).await.is_ok();

        let mut stuck = Vec::new();
        for (tenant, instance) in &drained {
            if within || instance.has_exited() {
                instance.sink.close();
            } else {
                instance.abort();
                stuck.push(tenant.clone());
            }
        }

        if stuck.is_empty() {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            return Ok(());
        }

        let names: Vec<&str> = stuck.iter().map(TenantId::as_str).collect();
        tracing::warn!(?grace, stuck = ?names, "grace exceeded, aborting instances");
        self.bus
            .publish(Event::new(EventKind::GraceExceeded).with_reason(names.join(",")));
        Err(RuntimeError::GraceExceeded { grace, stuck })
    }

    /// True while `tenant` has a registered, live instance.
    pub async fn is_running(&self, tenant: &TenantId) -> bool {
        self.registry
            .read()
            .await
            .get(tenant)
            .is_some_and(|slot| slot.live().is_some())
    }

    /// Snapshot of the running instance of `tenant`.
    pub async fn stats(&self, tenant: &TenantId) -> Result<Snapshot, RuntimeError> {
        let (snapshot, metrics) = {
            let slots = self.registry.read().await;
            let Some((slot, instance)) = slots
                .get(tenant)
                .and_then(|slot| slot.live().map(|i| (slot, i)))
            else {
                return Err(not_running(tenant));
            };
            let shared = &instance.shared;
            let snapshot = Snapshot {
                tenant: tenant.clone(),
                status: shared.status(),
                started_at: instance.started_at,
                uptime_seconds: instance.uptime().as_secs(),
                routes_count: shared.routes.load(Ordering::Relaxed),
                scheduled_jobs: shared.scheduled_jobs.load(Ordering::Relaxed),
                consecutive_failures: slot
                    .restart
                    .streak(&self.cfg.restart, instance.uptime()),
                memory: MemoryStats {
                    current_bytes: shared.memory_bytes.load(Ordering::Relaxed),
                },
                requests_total: shared.requests.load(Ordering::Relaxed),
                jobs_total: shared.jobs.load(Ordering::Relaxed),
                history: Default::default(),
            };
            (snapshot, Arc::clone(&instance.metrics))
        };

        Ok(Snapshot {
            history: metrics.history(self.cfg.metrics.history_points),
            ..snapshot
        })
    }

    /// Dispatches `request` to the script of `tenant`.
    ///
    /// The request runs on the instance's lifecycle task; the wait is bounded by
    /// [`SupervisorConfig::route_timeout`].
    pub async fn handle_route(
        &self,
        tenant: &TenantId,
        request: RouteRequest,
    ) -> Result<RouteResponse, RuntimeError> {
        let control = {
            let slots = self.registry.read().await;
            match slots.get(tenant).and_then(TenantSlot::live) {
                Some(instance) => instance.control.clone(),
                None => return Err(not_running(tenant)),
            }
        };

        let method = request.method.clone();
        let path = request.path.clone();
        let outcome = match self.cfg.route_limit() {
            Some(limit) => time::timeout(limit, exchange(&control, tenant, request))
                .await
                .map_err(|_| RuntimeError::RouteTimedOut {
                    tenant: tenant.clone(),
                    timeout: limit,
                })??,
            None => exchange(&control, tenant, request).await?,
        };

        match outcome {
            RouteOutcome::Answered(Ok(Some(response))) => Ok(response),
            RouteOutcome::Answered(Ok(None)) => Err(RuntimeError::NoRoute {
                tenant: tenant.clone(),
                method,
                path,
            }),
            RouteOutcome::Answered(Err(source)) => Err(RuntimeError::RouteFailed {
                tenant: tenant.clone(),
                source,
            }),
            RouteOutcome::TimedOut(timeout) => Err(RuntimeError::RouteTimedOut {
                tenant: tenant.clone(),
                timeout,
            }),
        }
    }

    /// Starts every tenant whose persisted status is running.
    ///
    /// Per-tenant failures are logged and reported; they do not stop the others.
    pub async fn auto_start_all(&self) -> Result<AutoStartReport, RuntimeError> {
        let tenants = self.store.running_tenants().await?;
        let mut report = AutoStartReport::default();

        for tenant in tenants {
            let result = match self.store.load(&tenant).await {
                Ok(source) => self.start(&tenant, &source, Bindings::none()).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => report.started.push(tenant),
                Err(e) => {
                    tracing::warn!(tenant = %tenant, label = e.as_label(), error = %e, "auto-start failed");
                    report.failed.push(AutoStartFailure {
                        tenant,
                        label: e.as_label(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "auto-start finished"
        );
        Ok(report)
    }

    /// Sorted tenants with a live instance.
    pub async fn tenants(&self) -> Vec<TenantId> {
        self.registry.running().await
    }

    /// Schemas of the registered native modules.
    pub fn module_schemas(&self) -> Vec<ModuleSchema> {
        self.modules.schemas()
    }

    /// Stops every instance, then shuts the native modules down.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let res = self.stop_all().await;
        self.modules.shutdown_all();
        res
    }

    /// Waits for a termination signal, then runs [`shutdown`](Self::shutdown).
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        let signal = shutdown::wait_for_shutdown_signal()
            .await
            .map_err(RuntimeError::Signal)?;
        tracing::info!(%signal, "shutdown requested");
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(signal.to_string()));
        self.shutdown().await
    }

    /// Synchronous setup of one run: engine, module bindings, log sink.
    pub(super) fn prepare(
        &self,
        tenant: &TenantId,
        bindings: &Bindings,
    ) -> Result<Prepared, SetupError> {
        let (control, mailbox) = InstanceControl::channel(self.cfg.mailbox_capacity_clamped());
        let mut engine = self
            .engines
            .create(tenant, control.clone())
            .map_err(SetupError::Engine)?;
        self.modules.bind_all(engine.as_mut(), tenant, bindings)?;
        let sink = self.sinks.create(tenant)?;
        Ok(Prepared {
            engine,
            control,
            mailbox,
            sink,
        })
    }

    /// Opens a tenant sink outside of any run, for crash watcher notices.
    pub(super) fn open_sink(&self, tenant: &TenantId) -> Option<Arc<dyn LogSink>> {
        match self.sinks.create(tenant) {
            Ok(sink) => Some(sink),
            Err(e) => {
                tracing::warn!(tenant = %tenant, error = %e, "cannot open tenant log");
                None
            }
        }
    }

    /// Registers and spawns a prepared run. Returns `false` if a crash restart
    /// lost its claim on the tenant (stopped, replaced or shut down meanwhile).
    pub(super) async fn install(
        &self,
        tenant: &TenantId,
        prepared: Prepared,
        source: Arc<str>,
        bindings: Bindings,
        origin: Origin,
    ) -> bool {
        let mut slots = self.registry.write().await;
        let slot = self.registry.slot(&mut slots, tenant);

        match origin {
            Origin::Explicit => {
                slot.restart.reset();
                if let Some(pending) = slot.pending.take() {
                    pending.token.cancel();
                }
            }
            Origin::Restart { generation, .. } => {
                let claimed = slot.generation == generation
                    && !slot.restart.stopped_explicitly
                    && slot.pending.as_ref().is_some_and(|p| p.is(generation));
                if !claimed {
                    drop(slots);
                    prepared.sink.close();
                    return false;
                }
                slot.pending = None;
            }
        }

        slot.generation += 1;
        if !self.cfg.metrics.keep_history_across_restarts {
            slot.metrics.clear();
        }
        slot.source = Some(Arc::clone(&source));
        slot.bindings = bindings;

        let instance = ScriptInstance::spawn(Launch {
            tenant: tenant.clone(),
            generation: slot.generation,
            engine: prepared.engine,
            control: prepared.control,
            mailbox: prepared.mailbox,
            sink: prepared.sink,
            source,
            metrics: Arc::clone(&slot.metrics),
            bus: self.bus.clone(),
            hook_limit: self.cfg.hook_limit(),
            route_limit: self.cfg.route_limit(),
            shutdown_limit: self.cfg.shutdown_limit(),
            sample_every: self.cfg.metrics.sample_limit(),
        });
        let generation = slot.generation;
        let done = instance.done.clone();
        let displaced = slot.instance.replace(instance);
        drop(slots);

        if let Some(me) = self.me.upgrade() {
            watcher::spawn(me, tenant.clone(), generation, done);
        }

        let mut started = Event::new(EventKind::InstanceStarted).with_tenant(tenant);
        if let Origin::Restart { attempt, .. } = origin {
            started = started.with_attempt(attempt);
        }
        self.bus.publish(started);

        if let Some(displaced) = displaced {
            self.release(displaced).await;
        }
        true
    }

    /// Cancels an instance and waits for its shutdown; aborts it if that takes
    /// longer than [`SupervisorConfig::release_limit`].
    pub(super) async fn release(&self, instance: ScriptInstance) {
        instance.token.cancel();
        let stopped = match self.cfg.release_limit() {
            Some(limit) => time::timeout(limit, instance.wait()).await.is_ok(),
            None => {
                instance.wait().await;
                true
            }
        };
        if stopped {
            instance.sink.close();
        } else {
            tracing::warn!(generation = instance.generation, "shutdown overran, forcing release");
            instance
                .sink
                .append(Severity::Warn, "shutdown did not complete in time; forcing release");
            instance.abort();
        }
    }

    /// Persists `status`; store failures are logged, not propagated.
    pub(super) async fn persist(&self, tenant: &TenantId, status: TenantStatus) {
        if let Err(e) = self.store.set_status(tenant, status).await {
            tracing::warn!(tenant = %tenant, ?status, label = e.as_label(), error = %e, "failed to persist status");
        }
    }
}

async fn exchange(
    control: &InstanceControl,
    tenant: &TenantId,
    request: RouteRequest,
) -> Result<RouteOutcome, RuntimeError> {
    let (reply, answer) = oneshot::channel();
    control
        .send(Command::Route { request, reply })
        .await
        .map_err(|_| not_running(tenant))?;
    answer.await.map_err(|_| not_running(tenant))
}

fn not_running(tenant: &TenantId) -> RuntimeError {
    RuntimeError::NotRunning {
        tenant: tenant.clone(),
    }
}
