//! # Native capability modules.
//!
//! Native modules (storage, collections, HTTP, mail, crypto, ...) are providers
//! discovered once at process start and bound into every engine the supervisor
//! builds. The supervisor only knows the provider contract:
//!
//! ```text
//! process start:  registry.register(p) ... registry.initialize(configs)
//! every start:    for p in registry + bindings: engine.bind(p.name(), p.surface(tenant))
//! process stop:   registry.shutdown_all()
//! ```
//!
//! A module's [`ModuleSurface`] is a set of named native functions exchanging
//! `serde_json::Value`s, which keeps the contract independent of the engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::engine::script::ScriptEngine;
use crate::error::{EngineError, ModuleError, SetupError};
use crate::tenant::TenantId;

/// A native function exposed to scripts.
pub type NativeFn = Arc<dyn Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static>;

/// Functions a module installs under its global name.
#[derive(Clone, Default)]
pub struct ModuleSurface {
    functions: BTreeMap<String, NativeFn>,
}

impl ModuleSurface {
    /// Empty surface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function.
    pub fn with_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    /// Looks up a function.
    pub fn function(&self, name: &str) -> Option<&NativeFn> {
        self.functions.get(name)
    }

    /// Function names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for ModuleSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSurface")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Self-description of a module, served to the admin layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleSchema {
    /// Global name.
    pub name: String,
    /// Provider version.
    pub version: String,
    /// Exposed functions.
    pub functions: Vec<FunctionSchema>,
}

/// One exposed function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionSchema {
    /// Function name.
    pub name: String,
    /// Short description.
    pub description: String,
}

/// A native capability provider.
pub trait NativeModule: Send + Sync + 'static {
    /// Global name the surface is bound under.
    fn name(&self) -> &str;

    /// One-time initialisation at process start.
    fn init(&self, _config: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Surface for one run of `tenant`; called once per start.
    fn surface(&self, tenant: &TenantId) -> ModuleSurface;

    /// Releases process-wide resources.
    fn shutdown(&self) {}

    /// Self-description.
    fn schema(&self) -> ModuleSchema;
}

/// Extra modules bound for one start, on top of the registry.
#[derive(Clone, Default)]
pub struct Bindings {
    modules: Vec<Arc<dyn NativeModule>>,
}

impl Bindings {
    /// No extra modules.
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds a module.
    pub fn with_module(mut self, module: Arc<dyn NativeModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Extra modules, in binding order.
    pub fn modules(&self) -> &[Arc<dyn NativeModule>] {
        &self.modules
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name()))
            .finish()
    }
}

/// Providers discovered at process start.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn NativeModule>>,
}

impl ModuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider; names must be unique.
    pub fn register(&mut self, module: Arc<dyn NativeModule>) -> Result<(), ModuleError> {
        if self.modules.iter().any(|m| m.name() == module.name()) {
            return Err(ModuleError::Duplicate(module.name().to_string()));
        }
        self.modules.push(module);
        Ok(())
    }

    /// Calls `init` on every provider with its entry from `configs` (or `null`).
    pub fn initialize(&self, configs: &HashMap<String, Value>) -> Result<(), ModuleError> {
        for m in &self.modules {
            let config = configs.get(m.name()).unwrap_or(&Value::Null);
            m.init(config).map_err(|reason| ModuleError::Init {
                module: m.name().to_string(),
                reason,
            })?;
            tracing::debug!(module = m.name(), "native module initialised");
        }
        Ok(())
    }

    /// Binds every registered module, then `extra`, into `engine`.
    pub fn bind_all(
        &self,
        engine: &mut dyn ScriptEngine,
        tenant: &TenantId,
        extra: &Bindings,
    ) -> Result<(), SetupError> {
        for m in self.modules.iter().chain(extra.modules()) {
            engine
                .bind(m.name(), m.surface(tenant))
                .map_err(|source: EngineError| SetupError::Module {
                    module: m.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Calls `shutdown` on every provider, in reverse registration order.
    pub fn shutdown_all(&self) {
        for m in self.modules.iter().rev() {
            m.shutdown();
        }
    }

    /// Schemas of every registered provider.
    pub fn schemas(&self) -> Vec<ModuleSchema> {
        self.modules.iter().map(|m| m.schema()).collect()
    }

    /// Number of providers.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True if no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| m.name()))
            .finish()
    }
}
