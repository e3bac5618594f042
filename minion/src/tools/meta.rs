//! Meta-tools for dynamic discovery: `tool_search` and `load_tool`.
//!
//! Both operate against a shared [`ToolRegistry`]. `tool_search` returns
//! lightweight [`ToolInfo`](super::ToolInfo) records without instantiation;
//! `load_tool` forces construction and hands the loaded tool to a
//! [`ToolInjector`] so the owning agent can bind it into its interpreter and
//! live tool set under a Python-safe name.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    sanitize_tool_name, search_tools, ParamSpec, SearchStrategy, Tool, ToolError, ToolRegistry,
    ToolSpec,
};

/// Tool name for searching the registry.
pub const TOOL_SEARCH: &str = "tool_search";

/// Tool name for loading a tool from the registry.
pub const TOOL_LOAD_TOOL: &str = "load_tool";

/// Receives loaded tools for injection into the owning agent.
pub trait ToolInjector: Send + Sync {
    /// Called once per successful load with the sanitized name and the tool.
    fn inject(&self, sanitized_name: &str, tool: Arc<dyn Tool>);
}

impl<F: Fn(&str, Arc<dyn Tool>) + Send + Sync> ToolInjector for F {
    fn inject(&self, sanitized_name: &str, tool: Arc<dyn Tool>) {
        self(sanitized_name, tool)
    }
}

/// Searches the registry without instantiating tools.
pub struct ToolSearchTool {
    registry: Arc<ToolRegistry>,
    default_top_k: usize,
}

impl ToolSearchTool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            default_top_k: 10,
        }
    }
}

#[async_trait]
impl Tool for ToolSearchTool {
    fn name(&self) -> &str {
        TOOL_SEARCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_SEARCH,
            "Search the tool registry by query. Returns matching tool descriptions \
             without loading them; follow up with load_tool to use one.",
        )
        .with_input("query", ParamSpec::required("string", "Search query."))
        .with_input(
            "strategy",
            ParamSpec::optional(
                "string",
                "One of keyword, regex, bm25.",
                Some(json!("keyword")),
            ),
        )
        .with_input(
            "top_k",
            ParamSpec::optional("integer", "Maximum results.", Some(json!(10))),
        )
        .with_input(
            "category",
            ParamSpec::optional("string", "Restrict to one category.", None),
        )
        .with_output("array")
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing query".to_string()))?;
        let strategy = match args.get("strategy").and_then(Value::as_str) {
            Some(s) => s
                .parse::<SearchStrategy>()
                .map_err(ToolError::InvalidInput)?,
            None => SearchStrategy::Keyword,
        };
        let top_k = args
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(self.default_top_k);
        let category = args.get("category").and_then(Value::as_str);

        let infos = self.registry.infos();
        let hits = search_tools(&infos, query, strategy, top_k, category);
        serde_json::to_value(hits).map_err(|e| ToolError::execution(TOOL_SEARCH, e.to_string()))
    }
}

/// Forces instantiation via the registry and injects the tool into the
/// owning agent's tool set.
pub struct LoadToolTool {
    registry: Arc<ToolRegistry>,
    injector: Arc<dyn ToolInjector>,
}

impl LoadToolTool {
    pub fn new(registry: Arc<ToolRegistry>, injector: Arc<dyn ToolInjector>) -> Self {
        Self { registry, injector }
    }
}

#[async_trait]
impl Tool for LoadToolTool {
    fn name(&self) -> &str {
        TOOL_LOAD_TOOL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_LOAD_TOOL,
            "Load a tool from the registry by name and make it callable. The tool \
             becomes available under its sanitized name (dots and hyphens become \
             underscores).",
        )
        .with_input(
            "tool_name",
            ParamSpec::required("string", "Registry name of the tool to load."),
        )
        .with_output("object")
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let name = args
            .get("tool_name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("missing tool_name".to_string()))?;
        let tool = self.registry.load_tool(name)?;
        let sanitized = sanitize_tool_name(name);
        self.injector.inject(&sanitized, Arc::clone(&tool));
        info!(tool = name, callable = %sanitized, "tool loaded and injected");
        Ok(json!({
            "loaded": name,
            "callable_as": sanitized,
            "description": tool.spec().description,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolInfo;
    use std::sync::Mutex;

    struct NoopTool {
        name: String,
    }

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new(&self.name, "Create a pull request on GitHub")
        }

        async fn call(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(json!("ok"))
        }
    }

    fn registry_with_factories() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        for (name, desc) in [
            ("github.create_pull_request", "Create a pull request on GitHub"),
            ("slack.send_message", "Send a message to a Slack channel"),
            ("jira.create_ticket", "Create a ticket in Jira"),
        ] {
            let owned = name.to_string();
            registry
                .register_factory(
                    ToolInfo {
                        name: name.to_string(),
                        description: desc.to_string(),
                        parameters: vec![],
                        category: "general".to_string(),
                    },
                    Box::new(move || Ok(Arc::new(NoopTool { name: owned }) as Arc<dyn Tool>)),
                )
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn search_returns_infos_without_loading() {
        let registry = registry_with_factories();
        let search = ToolSearchTool::new(Arc::clone(&registry));
        let out = search
            .call(json!({"query": "pull request", "strategy": "keyword"}))
            .await
            .unwrap();
        let hits = out.as_array().unwrap();
        assert_eq!(hits[0]["name"], "github.create_pull_request");
        // nothing was instantiated
        assert_eq!(registry.get_stats().loaded, 0);
    }

    #[tokio::test]
    async fn load_tool_injects_under_sanitized_name() {
        let registry = registry_with_factories();
        let injected: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&injected);
        let loader = LoadToolTool::new(
            Arc::clone(&registry),
            Arc::new(move |name: &str, _tool: Arc<dyn Tool>| {
                sink.lock().unwrap().push(name.to_string());
            }),
        );
        let out = loader
            .call(json!({"tool_name": "github.create_pull_request"}))
            .await
            .unwrap();
        assert_eq!(out["callable_as"], "github_create_pull_request");
        assert_eq!(
            injected.lock().unwrap().as_slice(),
            &["github_create_pull_request".to_string()]
        );
        assert_eq!(registry.get_stats().loaded, 1);
    }

    #[tokio::test]
    async fn load_tool_unknown_name_fails() {
        let registry = registry_with_factories();
        let loader = LoadToolTool::new(registry, Arc::new(|_: &str, _: Arc<dyn Tool>| {}));
        let err = loader.call(json!({"tool_name": "nope"})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
