use std::sync::Arc;

use crate::core::config::SupervisorConfig;
use crate::core::supervisor::Supervisor;
use crate::engine::{EngineFactory, ModuleRegistry};
use crate::events::Bus;
use crate::logs::{FileLogSinkFactory, LogSinkFactory};
use crate::store::{MemorySourceStore, SourceStore};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for a [`Supervisor`] and its collaborators.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    engines: Arc<dyn EngineFactory>,
    modules: ModuleRegistry,
    sinks: Option<Arc<dyn LogSinkFactory>>,
    store: Option<Arc<dyn SourceStore>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a builder with the given configuration and engine factory.
    pub fn new(cfg: SupervisorConfig, engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            cfg,
            engines,
            modules: ModuleRegistry::new(),
            sinks: None,
            store: None,
            subscribers: Vec::new(),
        }
    }

    /// Native modules bound into every engine. Initialise them before handing them over.
    pub fn with_modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = modules;
        self
    }

    /// Tenant log sinks (default: files under [`SupervisorConfig::log_dir`]).
    pub fn with_log_sinks(mut self, sinks: Arc<dyn LogSinkFactory>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Persisted sources and statuses (default: an empty in-memory store).
    pub fn with_store(mut self, store: Arc<dyn SourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Event subscribers, each fed through its own bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor. Requires a tokio runtime (spawns subscriber workers).
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let sinks = self
            .sinks
            .unwrap_or_else(|| Arc::new(FileLogSinkFactory::new(self.cfg.log_dir.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySourceStore::new()));

        let sup = Supervisor::new_internal(
            self.cfg,
            bus,
            subs,
            self.engines,
            Arc::new(self.modules),
            sinks,
            store,
        );
        sup.subscriber_listener();
        sup
    }
}
