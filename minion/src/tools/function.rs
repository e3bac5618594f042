//! Conversion of raw callables into tools.
//!
//! An agent may be handed bare closures instead of `Tool` implementations.
//! Each closure arrives with a declared [`FunctionSpec`] (Rust has no runtime
//! signature inspection); setup wraps it into a [`SyncFnTool`] or
//! [`AsyncFnTool`]. Sync callables invoked from async contexts run on the
//! blocking worker pool, preserving the declared schema.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use super::{Tool, ToolError, ToolSpec};

/// Declared schema for a raw callable: the tool spec it should expose.
pub type FunctionSpec = ToolSpec;

/// Sync callable shape: JSON arguments in, JSON value out.
pub type SyncCallable = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// Async callable shape.
pub type AsyncCallable =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// A tool definition handed to an agent: already a tool, or a raw callable
/// plus its declared spec.
pub enum ToolDef {
    Tool(Arc<dyn Tool>),
    SyncFn { spec: FunctionSpec, f: SyncCallable },
    AsyncFn { spec: FunctionSpec, f: AsyncCallable },
}

impl ToolDef {
    pub fn sync_fn(
        spec: FunctionSpec,
        f: impl Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Self {
        ToolDef::SyncFn {
            spec,
            f: Arc::new(f),
        }
    }

    pub fn async_fn(
        spec: FunctionSpec,
        f: impl Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync + 'static,
    ) -> Self {
        ToolDef::AsyncFn {
            spec,
            f: Arc::new(f),
        }
    }
}

/// Sync callable wrapped as a tool; `call` off-loads to the blocking pool.
pub struct SyncFnTool {
    spec: ToolSpec,
    f: SyncCallable,
}

impl SyncFnTool {
    pub fn new(spec: ToolSpec, f: SyncCallable) -> Self {
        Self { spec, f }
    }

    /// Direct sync invocation, used by the sync interpreter.
    pub fn call_sync(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args)
    }

    /// Shared handle to the underlying callable.
    pub fn callable(&self) -> SyncCallable {
        Arc::clone(&self.f)
    }
}

#[async_trait]
impl Tool for SyncFnTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let f = Arc::clone(&self.f);
        tokio::task::spawn_blocking(move || f(args))
            .await
            .map_err(|e| ToolError::Execution {
                tool: "sync_fn".to_string(),
                message: format!("blocking task failed: {e}"),
            })?
    }
}

/// Async callable wrapped as a tool.
pub struct AsyncFnTool {
    spec: ToolSpec,
    f: AsyncCallable,
}

impl AsyncFnTool {
    pub fn new(spec: ToolSpec, f: AsyncCallable) -> Self {
        Self { spec, f }
    }
}

#[async_trait]
impl Tool for AsyncFnTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args).await
    }
}

/// Converts tool definitions into tools during agent setup.
///
/// A definition whose spec has an empty name cannot be exposed; it logs a
/// warning and is skipped rather than failing setup.
pub fn convert_callables(defs: Vec<ToolDef>) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(defs.len());
    for def in defs {
        match def {
            ToolDef::Tool(t) => tools.push(t),
            ToolDef::SyncFn { spec, f } => {
                if spec.name.is_empty() {
                    warn!("skipping sync callable with empty tool name");
                    continue;
                }
                tools.push(Arc::new(SyncFnTool::new(spec, f)));
            }
            ToolDef::AsyncFn { spec, f } => {
                if spec.name.is_empty() {
                    warn!("skipping async callable with empty tool name");
                    continue;
                }
                tools.push(Arc::new(AsyncFnTool::new(spec, f)));
            }
        }
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParamSpec;
    use serde_json::json;

    fn add_spec() -> ToolSpec {
        ToolSpec::new("add", "Adds two integers")
            .with_input("a", ParamSpec::required("integer", "left"))
            .with_input("b", ParamSpec::required("integer", "right"))
            .with_output("integer")
    }

    #[tokio::test]
    async fn sync_fn_tool_runs_on_blocking_pool() {
        let tool = SyncFnTool::new(
            add_spec(),
            Arc::new(|args: Value| {
                let a = args["a"].as_i64().unwrap_or(0);
                let b = args["b"].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            }),
        );
        let out = tool.call(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out, json!(5));
        // and the sync path gives the same result
        assert_eq!(tool.call_sync(json!({"a": 2, "b": 3})).unwrap(), json!(5));
    }

    #[tokio::test]
    async fn async_fn_tool_awaits_inner_future() {
        let tool = AsyncFnTool::new(
            add_spec(),
            Arc::new(|args: Value| {
                Box::pin(async move {
                    let a = args["a"].as_i64().unwrap_or(0);
                    Ok(json!(a * 10))
                }) as BoxFuture<'static, Result<Value, ToolError>>
            }),
        );
        let out = tool.call(json!({"a": 4})).await.unwrap();
        assert_eq!(out, json!(40));
    }

    #[test]
    fn conversion_skips_empty_names() {
        let defs = vec![
            ToolDef::sync_fn(ToolSpec::new("", "nameless"), |_| Ok(json!(null))),
            ToolDef::sync_fn(add_spec(), |_| Ok(json!(null))),
        ];
        let tools = convert_callables(defs);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "add");
    }
}
