//! Tool surface: descriptors, sync/async tools, registry with deferred
//! loading, and the tool-search / load-tool meta-tools.
//!
//! A [`Tool`] is a named callable with a declared schema, exposed both to the
//! LLM (as a [`ToolSpec`] on the wire) and to the interpreter (as a callable
//! bound under its sanitized name). The [`ToolRegistry`] maps unique names to
//! loaded tools or deferred factories; [`tool_search`](ToolSearchTool) and
//! [`load_tool`](LoadToolTool) let an agent discover and pull in tools from a
//! large registry at runtime.

mod function;
mod meta;
mod registry;
mod search;
mod spec;
#[allow(clippy::module_inception)]
mod tool;

pub use function::{AsyncFnTool, FunctionSpec, SyncFnTool, convert_callables, ToolDef};
pub use meta::{LoadToolTool, ToolInjector, ToolSearchTool, TOOL_LOAD_TOOL, TOOL_SEARCH};
pub use registry::{RegistryStats, ToolRegistry};
pub use search::{search_tools, SearchStrategy};
pub use spec::{sanitize_tool_name, ParamSpec, ToolInfo, ToolSpec};
pub use tool::{FinalAnswerTool, Tool, TOOL_FINAL_ANSWER};

use thiserror::Error;

/// Tool failure taxonomy. Dispatch failures become `tool_response` chunks
/// with an error payload; they do not abort the turn unless the tool itself
/// is terminal (`final_answer`).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
    #[error("duplicate tool name: {0}")]
    Duplicate(String),
    #[error("tool name '{key}' does not match registry key '{name}'")]
    NameMismatch { key: String, name: String },
    #[error("collection '{0}' is closed")]
    CollectionClosed(String),
    #[error("collection '{0}' is unhealthy")]
    CollectionUnhealthy(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl ToolError {
    pub fn execution(tool: &str, message: impl Into<String>) -> Self {
        ToolError::Execution {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}
