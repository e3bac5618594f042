//! MCP collection: exposes a remote server's tools through an abstract
//! transport (stdio, SSE, and streamable-HTTP transports all satisfy the
//! same `list_tools` / `call_tool` contract).
//!
//! Each remote tool is wrapped in an [`McpToolAdapter`] implementing `Tool`;
//! `call` delegates to the shared transport and checks the collection's
//! closed flag first, so a closed collection rejects calls even through
//! adapters handed out earlier.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::tools::{ParamSpec, Tool, ToolError, ToolSpec};

use super::ToolCollection;

/// One tool as declared by the remote server.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct McpToolDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default)]
    pub input_schema: Value,
}

/// Transport to an MCP server. Implementations own the wire protocol
/// (stdio pipes, SSE, streamable HTTP); the collection only needs the
/// list/call/shutdown contract.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn initialize(&self) -> Result<(), ToolError>;
    async fn list_tools(&self) -> Result<Vec<McpToolDecl>, ToolError>;
    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError>;
    async fn shutdown(&self) -> Result<(), ToolError>;
}

struct Shared {
    transport: Arc<dyn McpTransport>,
    closed: AtomicBool,
    collection_name: String,
}

/// Adapter that makes one remote tool implement the `Tool` trait.
pub struct McpToolAdapter {
    decl: McpToolDecl,
    shared: Arc<Shared>,
}

fn spec_from_decl(decl: &McpToolDecl) -> ToolSpec {
    let mut spec = ToolSpec::new(&decl.name, &decl.description);
    if let Some(props) = decl.input_schema.get("properties").and_then(Value::as_object) {
        let required: Vec<&str> = decl
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for (name, prop) in props {
            let type_name = prop.get("type").and_then(Value::as_str).unwrap_or("string");
            let description = prop
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            let param = if required.contains(&name.as_str()) {
                ParamSpec::required(type_name, description)
            } else {
                ParamSpec::optional(type_name, description, prop.get("default").cloned())
            };
            spec = spec.with_input(name, param);
        }
    }
    spec
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn spec(&self) -> ToolSpec {
        spec_from_decl(&self.decl)
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ToolError::CollectionClosed(
                self.shared.collection_name.clone(),
            ));
        }
        self.shared.transport.call_tool(&self.decl.name, args).await
    }
}

/// Collection of tools served by one MCP server.
pub struct McpCollection {
    shared: Arc<Shared>,
    ignore_setup_errors: bool,
    healthy: AtomicBool,
    set_up: AtomicBool,
    tools: RwLock<Vec<Arc<dyn Tool>>>,
}

impl McpCollection {
    pub fn new(name: &str, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                closed: AtomicBool::new(false),
                collection_name: name.to_string(),
            }),
            ignore_setup_errors: false,
            healthy: AtomicBool::new(false),
            set_up: AtomicBool::new(false),
            tools: RwLock::new(Vec::new()),
        }
    }

    /// A failed setup marks the collection unhealthy instead of propagating;
    /// the agent's remaining tools stay usable.
    pub fn with_ignore_setup_errors(mut self, ignore: bool) -> Self {
        self.ignore_setup_errors = ignore;
        self
    }

    async fn do_setup(&self) -> Result<(), ToolError> {
        self.shared.transport.initialize().await?;
        let decls = self.shared.transport.list_tools().await?;
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(decls.len());
        for decl in decls {
            tools.push(Arc::new(McpToolAdapter {
                decl,
                shared: Arc::clone(&self.shared),
            }));
        }
        *self.tools.write().await = tools;
        Ok(())
    }
}

#[async_trait]
impl ToolCollection for McpCollection {
    fn name(&self) -> &str {
        &self.shared.collection_name
    }

    async fn setup(&self) -> Result<(), ToolError> {
        if self.set_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.do_setup().await {
            Ok(()) => {
                self.healthy.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) if self.ignore_setup_errors => {
                warn!(collection = self.name(), error = %e, "setup failed, collection disabled");
                self.healthy.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&self) -> Result<(), ToolError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.healthy.store(false, Ordering::SeqCst);
        self.tools.write().await.clear();
        self.shared.transport.shutdown().await
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && !self.shared.closed.load(Ordering::SeqCst)
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        if !self.is_healthy() {
            return Vec::new();
        }
        // Read under try_read: tools() is called from sync contexts after
        // setup, when no writer can hold the lock.
        self.tools
            .try_read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct FakeTransport {
        calls: AtomicU32,
        fail_init: bool,
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn initialize(&self) -> Result<(), ToolError> {
            if self.fail_init {
                Err(ToolError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn list_tools(&self) -> Result<Vec<McpToolDecl>, ToolError> {
            Ok(vec![McpToolDecl {
                name: "remote.echo".into(),
                description: "Echo text back".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string", "description": "input"}},
                    "required": ["text"],
                }),
            }])
        }

        async fn call_tool(&self, _name: &str, args: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(args["text"].clone())
        }

        async fn shutdown(&self) -> Result<(), ToolError> {
            Ok(())
        }
    }

    fn transport(fail_init: bool) -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            calls: AtomicU32::new(0),
            fail_init,
        })
    }

    #[tokio::test]
    async fn setup_exposes_remote_tools() {
        let collection = McpCollection::new("fake", transport(false));
        collection.setup().await.unwrap();
        assert!(collection.is_healthy());
        let tools = collection.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "remote.echo");
        let spec = tools[0].spec();
        assert!(!spec.inputs["text"].optional);

        let out = tools[0].call(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[tokio::test]
    async fn failed_setup_propagates_by_default() {
        let collection = McpCollection::new("fake", transport(true));
        assert!(collection.setup().await.is_err());
        assert!(!collection.is_healthy());
    }

    #[tokio::test]
    async fn ignore_setup_errors_marks_unhealthy() {
        let collection =
            McpCollection::new("fake", transport(true)).with_ignore_setup_errors(true);
        collection.setup().await.unwrap();
        assert!(!collection.is_healthy());
        assert!(collection.tools().is_empty());
    }

    #[tokio::test]
    async fn closed_collection_rejects_calls_through_existing_adapters() {
        let collection = McpCollection::new("fake", transport(false));
        collection.setup().await.unwrap();
        let tool = collection.tools().into_iter().next().unwrap();
        collection.close().await.unwrap();
        let err = tool.call(json!({"text": "hi"})).await.unwrap_err();
        assert!(matches!(err, ToolError::CollectionClosed(_)));
    }

    #[tokio::test]
    async fn setup_is_idempotent() {
        let collection = McpCollection::new("fake", transport(false));
        collection.setup().await.unwrap();
        collection.setup().await.unwrap();
        assert_eq!(collection.tools().len(), 1);
    }
}
