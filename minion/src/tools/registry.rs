//! Tool registry with deferred loading.
//!
//! Entries are either loaded tools or factories paired with a lightweight
//! [`ToolInfo`]; a factory is invoked at most once per registry lifetime, on
//! first [`load_tool`](ToolRegistry::load_tool). Categories partition the
//! registry for search filtering only.

use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::{Tool, ToolError, ToolInfo};

/// Deferred constructor; invoked once, on first load.
pub type ToolFactory = Box<dyn FnOnce() -> Result<Arc<dyn Tool>, ToolError> + Send>;

enum Entry {
    Loaded {
        tool: Arc<dyn Tool>,
        category: String,
    },
    Deferred {
        info: ToolInfo,
        factory: Mutex<Option<ToolFactory>>,
    },
}

/// Registry stats snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub loaded: usize,
    pub deferred: usize,
    pub categories: usize,
}

/// Mapping from unique tool name to a loaded tool or a factory + info.
///
/// Shared read-mostly; writes (register / load) are serialized per entry by
/// the owning agent.
#[derive(Default)]
pub struct ToolRegistry {
    entries: DashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loaded tool under its own name, category "general".
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        self.register_with_category(tool, "general")
    }

    pub fn register_with_category(
        &self,
        tool: Arc<dyn Tool>,
        category: &str,
    ) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.entries.insert(
            name,
            Entry::Loaded {
                tool,
                category: category.to_string(),
            },
        );
        Ok(())
    }

    pub fn register_many(&self, tools: Vec<Arc<dyn Tool>>) -> Result<(), ToolError> {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    /// Registers a factory with its search info; construction is deferred to
    /// the first `load_tool`.
    pub fn register_factory(&self, info: ToolInfo, factory: ToolFactory) -> Result<(), ToolError> {
        if info.name.is_empty() {
            return Err(ToolError::InvalidInput("empty tool name".to_string()));
        }
        if self.entries.contains_key(&info.name) {
            return Err(ToolError::Duplicate(info.name));
        }
        self.entries.insert(
            info.name.clone(),
            Entry::Deferred {
                info,
                factory: Mutex::new(Some(factory)),
            },
        );
        Ok(())
    }

    /// Returns the loaded tool, invoking the factory on first load.
    ///
    /// Invariants: the factory runs at most once; a loaded tool's name must
    /// match its registry key.
    pub fn load_tool(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        let mut entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        match &*entry {
            Entry::Loaded { tool, .. } => Ok(Arc::clone(tool)),
            Entry::Deferred { info, factory } => {
                let category = info.category.clone();
                let f = factory
                    .lock()
                    .map_err(|_| ToolError::execution(name, "factory lock poisoned"))?
                    .take()
                    .ok_or_else(|| {
                        ToolError::execution(name, "factory already consumed without loading")
                    })?;
                let tool = f()?;
                if tool.name() != name {
                    return Err(ToolError::NameMismatch {
                        key: name.to_string(),
                        name: tool.name().to_string(),
                    });
                }
                debug!(tool = name, "loaded deferred tool");
                *entry = Entry::Loaded {
                    tool: Arc::clone(&tool),
                    category,
                };
                Ok(tool)
            }
        }
    }

    /// The loaded tool, if already constructed; never invokes a factory.
    pub fn get_loaded(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.get(name).and_then(|e| match &*e {
            Entry::Loaded { tool, .. } => Some(Arc::clone(tool)),
            Entry::Deferred { .. } => None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get_all_tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn get_categories(&self) -> Vec<String> {
        let mut cats: Vec<String> = self
            .entries
            .iter()
            .map(|e| match e.value() {
                Entry::Loaded { category, .. } => category.clone(),
                Entry::Deferred { info, .. } => info.category.clone(),
            })
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }

    pub fn get_tools_by_category(&self, category: &str) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .entries
            .iter()
            .filter_map(|e| {
                let info = entry_info(e.value());
                (info.category == category).then_some(info)
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Search records for every entry, loaded or deferred, sorted by name.
    pub fn infos(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.entries.iter().map(|e| entry_info(e.value())).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn get_stats(&self) -> RegistryStats {
        let mut loaded = 0;
        let mut deferred = 0;
        for e in self.entries.iter() {
            match e.value() {
                Entry::Loaded { .. } => loaded += 1,
                Entry::Deferred { .. } => deferred += 1,
            }
        }
        RegistryStats {
            total: loaded + deferred,
            loaded,
            deferred,
            categories: self.get_categories().len(),
        }
    }
}

fn entry_info(entry: &Entry) -> ToolInfo {
    match entry {
        Entry::Loaded { tool, category } => tool.spec().to_info(category),
        Entry::Deferred { info, .. } => info.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParamSpec, ToolSpec};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new(&self.name, "echoes input")
                .with_input("text", ParamSpec::required("string", "input"))
        }

        async fn call(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args["text"].clone())
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(EchoTool {
            name: name.to_string(),
        })
    }

    #[test]
    fn register_then_load_returns_same_tool() {
        let registry = ToolRegistry::new();
        registry.register(echo("echo")).unwrap();
        let tool = registry.load_tool("echo").unwrap();
        assert_eq!(tool.name(), "echo");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = ToolRegistry::new();
        registry.register(echo("echo")).unwrap();
        let err = registry.register(echo("echo")).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(_)));
    }

    #[test]
    fn factory_runs_exactly_once() {
        static BUILDS: AtomicU32 = AtomicU32::new(0);
        let registry = ToolRegistry::new();
        let info = ToolInfo {
            name: "lazy".into(),
            description: "deferred echo".into(),
            parameters: vec!["text".into()],
            category: "general".into(),
        };
        registry
            .register_factory(
                info,
                Box::new(|| {
                    BUILDS.fetch_add(1, Ordering::SeqCst);
                    Ok(echo("lazy"))
                }),
            )
            .unwrap();

        assert!(registry.get_loaded("lazy").is_none());
        registry.load_tool("lazy").unwrap();
        registry.load_tool("lazy").unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(registry.get_loaded("lazy").is_some());
    }

    #[test]
    fn factory_name_mismatch_is_an_error() {
        let registry = ToolRegistry::new();
        let info = ToolInfo {
            name: "expected".into(),
            ..Default::default()
        };
        registry
            .register_factory(info, Box::new(|| Ok(echo("different"))))
            .unwrap();
        let err = match registry.load_tool("expected") {
            Err(e) => e,
            Ok(_) => panic!("expected load_tool to fail"),
        };
        assert!(matches!(err, ToolError::NameMismatch { .. }));
    }

    #[test]
    fn stats_count_loaded_and_deferred() {
        let registry = ToolRegistry::new();
        registry.register(echo("a")).unwrap();
        registry
            .register_factory(
                ToolInfo {
                    name: "b".into(),
                    category: "search".into(),
                    ..Default::default()
                },
                Box::new(|| Ok(echo("b"))),
            )
            .unwrap();
        let stats = registry.get_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.categories, 2);
    }

    #[test]
    fn categories_partition_infos() {
        let registry = ToolRegistry::new();
        registry
            .register_with_category(echo("x"), "alpha")
            .unwrap();
        registry
            .register_with_category(echo("y"), "beta")
            .unwrap();
        let alpha = registry.get_tools_by_category("alpha");
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].name, "x");
        assert_eq!(registry.get_categories(), vec!["alpha", "beta"]);
    }
}
