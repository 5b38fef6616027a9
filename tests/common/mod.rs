//! Shared fixtures for tenantvisor integration tests.
//!
//! [`ToyEngine`] understands a tiny line language, one directive per line:
//!
//! ```text
//! service.start(() => {})        ignored (anything unknown is ignored)
//! throw <message>                evaluation fails
//! throw-once <message>           only the tenant's first evaluation fails
//! panic                          evaluation panics
//! sleep <period>                 evaluation takes <period>
//! require <module>               evaluation fails unless <module> was bound
//! memory <bytes>                 reported heap usage
//! route <METHOD> <path> <action> action: fail | slow | modules | <reply body>
//! every <period> <job>           scheduled job (periods: 100ms, 2s)
//! hook <boot|start|shutdown> <ok|fail|slow|finish|fault|panic>
//! ```
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use tenantvisor::{
    Callable, EngineError, EngineFactory, Event, EventKind, Hook, InstanceControl,
    MemoryLogSinkFactory, MemorySourceStore, ModuleRegistry, ModuleSchema, ModuleSurface,
    NativeModule, RouteRequest, RouteResponse, ScheduledJob, ScriptEngine, Supervisor,
    SupervisorConfig, TenantId,
};

/// Long enough to outlive any timeout used in the tests.
pub const FOREVER: Duration = Duration::from_secs(3600);

pub fn tid(id: &str) -> TenantId {
    TenantId::new(id).expect("valid tenant id")
}

/// Ordered record of everything the toy engines did, as `tenant:what` entries.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn record(&self, tenant: &TenantId, what: impl AsRef<str>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("{tenant}:{}", what.as_ref()));
    }

    pub fn count(&self, tenant: &TenantId, what: &str) -> usize {
        let needle = format!("{tenant}:{what}");
        self.0.lock().unwrap().iter().filter(|e| **e == needle).count()
    }

    pub fn count_prefix(&self, tenant: &TenantId, prefix: &str) -> usize {
        let needle = format!("{tenant}:{prefix}");
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(&needle))
            .count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    Ok,
    Fail,
    Slow,
    Finish,
    Fault,
    Panic,
}

#[derive(Clone, Debug)]
enum RouteAction {
    Reply(String),
    Fail,
    Slow,
    Modules,
}

pub struct ToyEngine {
    tenant: TenantId,
    control: InstanceControl,
    journal: Journal,
    bound: Vec<String>,
    hooks: HashMap<Hook, Behavior>,
    routes: Vec<(String, String, RouteAction)>,
    jobs: Vec<ScheduledJob>,
    memory: u64,
}

fn parse_period(raw: &str) -> Result<Duration, EngineError> {
    let bad = || EngineError::Script(format!("bad period '{raw}'"));
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.parse().map(Duration::from_millis).map_err(|_| bad());
    }
    if let Some(s) = raw.strip_suffix('s') {
        return s.parse().map(Duration::from_secs).map_err(|_| bad());
    }
    Err(bad())
}

fn parse_hook(raw: &str) -> Result<Hook, EngineError> {
    match raw {
        "boot" => Ok(Hook::Boot),
        "start" => Ok(Hook::Start),
        "shutdown" => Ok(Hook::Shutdown),
        other => Err(EngineError::Script(format!("unknown hook '{other}'"))),
    }
}

fn parse_behavior(raw: &str) -> Result<Behavior, EngineError> {
    match raw {
        "ok" => Ok(Behavior::Ok),
        "fail" => Ok(Behavior::Fail),
        "slow" => Ok(Behavior::Slow),
        "finish" => Ok(Behavior::Finish),
        "fault" => Ok(Behavior::Fault),
        "panic" => Ok(Behavior::Panic),
        other => Err(EngineError::Script(format!("unknown behavior '{other}'"))),
    }
}

#[async_trait]
impl ScriptEngine for ToyEngine {
    fn bind(&mut self, name: &str, _surface: ModuleSurface) -> Result<(), EngineError> {
        if name == "forbidden" {
            return Err(EngineError::Bind {
                name: name.to_string(),
                reason: "reserved global".to_string(),
            });
        }
        self.bound.push(name.to_string());
        Ok(())
    }

    async fn evaluate(&mut self, source: &str) -> Result<(), EngineError> {
        self.journal.record(&self.tenant, "evaluate");
        for line in source.lines() {
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["throw", rest @ ..] => return Err(EngineError::Script(rest.join(" "))),
                ["throw-once", rest @ ..] if self.journal.count(&self.tenant, "evaluate") == 1 => {
                    return Err(EngineError::Script(rest.join(" ")));
                }
                ["panic"] => panic!("script panicked during evaluation"),
                ["sleep", period] => tokio::time::sleep(parse_period(period)?).await,
                ["require", module] => {
                    if !self.bound.iter().any(|b| b == module) {
                        return Err(EngineError::Script(format!("{module} is not defined")));
                    }
                }
                ["memory", bytes] => {
                    self.memory = bytes
                        .parse()
                        .map_err(|_| EngineError::Script(format!("bad size '{bytes}'")))?;
                }
                ["route", method, path, action @ ..] => {
                    let action = match action {
                        ["fail"] => RouteAction::Fail,
                        ["slow"] => RouteAction::Slow,
                        ["modules"] => RouteAction::Modules,
                        body => RouteAction::Reply(body.join(" ")),
                    };
                    self.routes
                        .push((method.to_ascii_uppercase(), path.to_string(), action));
                }
                ["every", period, name] => self.jobs.push(ScheduledJob {
                    name: name.to_string(),
                    every: parse_period(period)?,
                }),
                ["hook", hook, behavior] => {
                    self.hooks
                        .insert(parse_hook(hook)?, parse_behavior(behavior)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn has_hook(&self, hook: Hook) -> bool {
        self.hooks.contains_key(&hook)
    }

    async fn call(&mut self, target: Callable<'_>, _args: Vec<Value>) -> Result<Value, EngineError> {
        let hook = match target {
            Callable::Job(name) => {
                self.journal.record(&self.tenant, format!("job:{name}"));
                return Ok(Value::Null);
            }
            Callable::Hook(hook) => hook,
        };
        self.journal.record(&self.tenant, format!("hook:{hook}"));

        match self.hooks.get(&hook).copied().unwrap_or(Behavior::Ok) {
            Behavior::Ok => {}
            Behavior::Fail => return Err(EngineError::Script(format!("{hook} refused"))),
            Behavior::Slow => tokio::time::sleep(FOREVER).await,
            Behavior::Finish => {
                let _ = self.control.finish("work done").await;
            }
            Behavior::Fault => {
                let _ = self.control.fault("unhandled rejection").await;
            }
            Behavior::Panic => panic!("{hook} hook exploded"),
        }
        Ok(Value::Null)
    }

    fn route_count(&self) -> usize {
        self.routes.len()
    }

    async fn dispatch_route(
        &mut self,
        request: RouteRequest,
    ) -> Result<Option<RouteResponse>, EngineError> {
        let Some((_, _, action)) = self
            .routes
            .iter()
            .find(|(m, p, _)| *m == request.method && *p == request.path)
        else {
            return Ok(None);
        };
        match action.clone() {
            RouteAction::Reply(body) => Ok(Some(RouteResponse::new(200, body))),
            RouteAction::Fail => Err(EngineError::Script("handler threw".to_string())),
            RouteAction::Slow => {
                tokio::time::sleep(FOREVER).await;
                Ok(Some(RouteResponse::new(200, "late")))
            }
            RouteAction::Modules => Ok(Some(RouteResponse::new(200, self.bound.join(",")))),
        }
    }

    fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.clone()
    }

    fn memory_bytes(&self) -> u64 {
        self.memory
    }
}

/// Builds [`ToyEngine`]s; can be told to refuse construction for a tenant.
#[derive(Default)]
pub struct ToyFactory {
    pub journal: Journal,
    refused: Mutex<HashSet<String>>,
}

impl ToyFactory {
    pub fn refuse(&self, tenant: &TenantId) {
        self.refused.lock().unwrap().insert(tenant.to_string());
    }
}

impl EngineFactory for ToyFactory {
    fn create(
        &self,
        tenant: &TenantId,
        control: InstanceControl,
    ) -> Result<Box<dyn ScriptEngine>, EngineError> {
        if self.refused.lock().unwrap().contains(tenant.as_str()) {
            return Err(EngineError::Unavailable("isolate pool exhausted".to_string()));
        }
        Ok(Box::new(ToyEngine {
            tenant: tenant.clone(),
            control,
            journal: self.journal.clone(),
            bound: Vec::new(),
            hooks: HashMap::new(),
            routes: Vec::new(),
            jobs: Vec::new(),
            memory: 0,
        }))
    }
}

/// A module with no functions, identified by name only.
pub struct NamedModule(pub &'static str);

impl NativeModule for NamedModule {
    fn name(&self) -> &str {
        self.0
    }

    fn surface(&self, _tenant: &TenantId) -> ModuleSurface {
        ModuleSurface::new()
    }

    fn schema(&self) -> ModuleSchema {
        ModuleSchema {
            name: self.0.to_string(),
            version: "1.0.0".to_string(),
            functions: Vec::new(),
        }
    }
}

pub struct Harness {
    pub sup: Arc<Supervisor>,
    pub logs: MemoryLogSinkFactory,
    pub store: MemorySourceStore,
    pub factory: Arc<ToyFactory>,
}

pub fn harness(cfg: SupervisorConfig) -> Harness {
    harness_with(cfg, ModuleRegistry::new())
}

pub fn harness_with(cfg: SupervisorConfig, modules: ModuleRegistry) -> Harness {
    let logs = MemoryLogSinkFactory::new();
    let store = MemorySourceStore::new();
    let factory = Arc::new(ToyFactory::default());
    let sup = Supervisor::builder(cfg, factory.clone())
        .with_modules(modules)
        .with_log_sinks(Arc::new(logs.clone()))
        .with_store(Arc::new(store.clone()))
        .build();
    Harness {
        sup,
        logs,
        store,
        factory,
    }
}

/// Skips events until one of `kind` for `tenant` arrives.
pub async fn next_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind, tenant: &str) -> Event {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind && ev.tenant.as_deref() == Some(tenant) => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), wait)
        .await
        .unwrap_or_else(|_| panic!("no {kind:?} event for {tenant}"))
}

/// Polls `check` until it holds, yielding to the runtime in between.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}
