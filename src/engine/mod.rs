//! Seams towards the embedded engine and native modules.
//!
//! - [`ScriptEngine`], [`EngineFactory`] the engine capability set
//! - [`InstanceControl`] the instance mailbox handle given to engines
//! - [`NativeModule`], [`ModuleRegistry`], [`Bindings`] native capability providers

mod control;
mod modules;
mod script;

pub(crate) use control::{Command, RouteOutcome};
pub use control::{EngineCallback, InstanceControl, InstanceGone};
pub use modules::{
    Bindings, FunctionSchema, ModuleRegistry, ModuleSchema, ModuleSurface, NativeFn, NativeModule,
};
pub use script::{
    Callable, EngineFactory, Hook, RouteRequest, RouteResponse, ScheduledJob, ScriptEngine,
};
