//! External tool collections: adapters over a remote or packaged source of
//! tools, with a `setup()` / `close()` lifecycle bound to the owning agent.
//!
//! A collection must either complete `setup` before its tools are exposed or,
//! when constructed with `ignore_setup_errors`, mark itself unhealthy and stay
//! out of the way; closed or unhealthy collections reject all tool calls while
//! the agent's remaining tools stay usable.

mod mcp;
mod skills;

pub use mcp::{McpCollection, McpToolAdapter, McpToolDecl, McpTransport};
pub use skills::{Skill, SkillManager, SkillTool, TOOL_SKILL};

use std::sync::Arc;

use async_trait::async_trait;

use crate::tools::{Tool, ToolError};

/// Lifecycle-bound source of tools (MCP server, skills directory).
#[async_trait]
pub trait ToolCollection: Send + Sync {
    /// Collection name, for diagnostics and error payloads.
    fn name(&self) -> &str;

    /// Connects / scans the source and prepares the tool list. Must complete
    /// before [`tools`](ToolCollection::tools) is consulted. Idempotent.
    async fn setup(&self) -> Result<(), ToolError>;

    /// Releases the source. Tools obtained earlier reject calls afterwards.
    async fn close(&self) -> Result<(), ToolError>;

    /// False after a failed setup with `ignore_setup_errors`, or after close.
    fn is_healthy(&self) -> bool;

    /// Tools exposed by this collection; empty before setup or when unhealthy.
    fn tools(&self) -> Vec<Arc<dyn Tool>>;
}
