//! Worker strategies ("minions"): named reasoning strategies sharing one
//! contract, discoverable by route string through a registry.
//!
//! The process-wide [`MINION_REGISTRY`] is initialized with explicit
//! registration calls (no import side effects); tests construct isolated
//! [`WorkerRegistry`] instances for repeatability. Workers never mutate the
//! registry; they may mutate their own `Input` (e.g. attach feedback).

mod basic;
mod code;
mod ensemble;
mod extract;
mod plan;
pub mod prompts;
mod route;

pub use basic::{CotWorker, DcotWorker, NativeWorker, RawWorker};
pub use code::{CodeWorker, PythonWorker};
pub use ensemble::{Aggregation, EnsembleMember, EnsembleWorker};
pub use extract::{extract_code, extract_final_answer, END_CODE};
pub use plan::PlanWorker;
pub use route::{ModeratorWorker, RouteWorker};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::brain::Brain;
use crate::error::MinionError;
use crate::state::{AgentResponse, Input};

/// One reasoning strategy. `execute` consumes one input and produces the
/// step's response; streaming workers emit chunks through the brain's sink.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Route name this worker serves.
    fn name(&self) -> &str;

    async fn execute(&self, input: &mut Input, brain: &Brain)
        -> Result<AgentResponse, MinionError>;
}

/// Constructor for a registered worker.
pub type WorkerCtor = Arc<dyn Fn() -> Box<dyn Worker> + Send + Sync>;

/// Route-name → worker-constructor registry.
#[derive(Default)]
pub struct WorkerRegistry {
    map: RwLock<HashMap<String, WorkerCtor>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in route registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("raw", || Box::new(RawWorker));
        registry.register("native", || Box::new(NativeWorker));
        registry.register("cot", || Box::new(CotWorker));
        registry.register("dcot", || Box::new(DcotWorker));
        registry.register("python", || Box::new(PythonWorker));
        registry.register("code", || Box::new(CodeWorker));
        registry.register("plan", || Box::new(PlanWorker));
        registry.register("ensemble", || Box::new(EnsembleWorker));
        registry.register("route", || Box::new(RouteWorker));
        registry.register("moderator", || Box::new(ModeratorWorker));
        registry
    }

    pub fn register(
        &self,
        name: &str,
        ctor: impl Fn() -> Box<dyn Worker> + Send + Sync + 'static,
    ) {
        self.map
            .write()
            .expect("worker registry lock")
            .insert(name.to_string(), Arc::new(ctor));
    }

    /// Instantiates the worker registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Worker>> {
        let ctor = self
            .map
            .read()
            .expect("worker registry lock")
            .get(name)
            .cloned()?;
        Some(ctor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map
            .read()
            .expect("worker registry lock")
            .contains_key(name)
    }

    /// All registered route names, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .map
            .read()
            .expect("worker registry lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Process-wide worker registry with the built-in routes.
pub static MINION_REGISTRY: Lazy<WorkerRegistry> = Lazy::new(WorkerRegistry::with_defaults);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_builtin_routes() {
        let registry = WorkerRegistry::with_defaults();
        for route in [
            "raw",
            "native",
            "cot",
            "dcot",
            "python",
            "code",
            "plan",
            "ensemble",
            "route",
            "moderator",
        ] {
            assert!(registry.contains(route), "missing route {route}");
        }
    }

    #[test]
    fn isolated_registry_does_not_leak_into_global() {
        let registry = WorkerRegistry::new();
        registry.register("custom", || Box::new(RawWorker));
        assert!(registry.contains("custom"));
        assert!(!MINION_REGISTRY.contains("custom"));
    }

    #[test]
    fn create_returns_fresh_instances() {
        let registry = WorkerRegistry::with_defaults();
        let a = registry.create("raw").unwrap();
        let b = registry.create("raw").unwrap();
        assert_eq!(a.name(), "raw");
        assert_eq!(b.name(), "raw");
    }
}
