//! Crate-wide error type composing the per-module error enums.
//!
//! Recoverable errors (tool failures, interpreter errors) are normally folded
//! into Observations or `tool_response` chunks by the owning component and do
//! not surface here; `MinionError` is what propagates when a worker, brain,
//! or agent run cannot continue.

use thiserror::Error;

use crate::interpreter::InterpreterError;
use crate::llm::ProviderError;
use crate::tools::ToolError;

#[derive(Error, Debug)]
pub enum MinionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Interpreter(#[from] InterpreterError),

    #[error("config: {0}")]
    Config(String),

    #[error("worker '{worker}': {message}")]
    Worker { worker: String, message: String },

    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error("checker: {0}")]
    Checker(String),

    #[error("cancelled")]
    Cancelled,

    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl MinionError {
    /// Short error kind tag used in user-visible failure chunks.
    pub fn kind(&self) -> &'static str {
        match self {
            MinionError::Provider(e) if e.is_transient() => "provider_transient",
            MinionError::Provider(ProviderError::ContextOverflow(_)) => "context_overflow",
            MinionError::Provider(_) => "provider_fatal",
            MinionError::Tool(ToolError::NotFound(_)) => "tool_not_found",
            MinionError::Tool(_) => "tool_error",
            MinionError::Interpreter(_) => "interpreter_error",
            MinionError::Config(_) => "config_error",
            MinionError::Worker { .. } => "worker_error",
            MinionError::RouteNotFound(_) => "route_not_found",
            MinionError::Checker(_) => "checker_failure",
            MinionError::Cancelled => "cancelled",
            MinionError::Json(_) => "serialization_error",
            MinionError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_distinguishes_transient_from_fatal_provider_errors() {
        let transient = MinionError::Provider(ProviderError::RateLimited("slow down".into()));
        let fatal = MinionError::Provider(ProviderError::Auth("bad key".into()));
        assert_eq!(transient.kind(), "provider_transient");
        assert_eq!(fatal.kind(), "provider_fatal");
    }

    #[test]
    fn kind_maps_context_overflow() {
        let e = MinionError::Provider(ProviderError::ContextOverflow("too long".into()));
        assert_eq!(e.kind(), "context_overflow");
    }

    #[test]
    fn display_includes_worker_name() {
        let e = MinionError::Worker {
            worker: "cot".into(),
            message: "no answer".into(),
        };
        assert_eq!(e.to_string(), "worker 'cot': no answer");
    }
}
