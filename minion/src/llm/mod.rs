//! Provider abstraction: a uniform generate / stream / stream-with-tools
//! contract over heterogeneous LLM backends, plus cost accounting.
//!
//! The core does not ship vendor clients; any backend implementing
//! [`Provider`] is acceptable. [`MockProvider`] serves tests and examples,
//! [`WithRetry`] adds capped exponential backoff for transient failures.
//!
//! # Streaming
//!
//! `generate_stream` returns a finite, non-restartable sequence of text
//! chunks that is an ordered prefix of the final text. `generate_stream_response`
//! additionally accepts an optional chunk sender so callers can forward text
//! as it arrives while still receiving the complete response (content, tool
//! calls, usage) at the end.

mod cost;
mod mock;
mod retry;

pub use cost::{CostRecord, PriceTable, Usage};
pub use mock::MockProvider;
pub use retry::{RetryPolicy, WithRetry};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::tools::ToolSpec;

/// Provider failure taxonomy. Only [`is_transient`](ProviderError::is_transient)
/// classes are retried; the rest propagate to the calling worker.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("context overflow: {0}")]
    ContextOverflow(String),
}

impl ProviderError {
    /// Transient classes: rate limiting and transient network failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Unavailable(_)
        )
    }
}

/// Tool choice forwarded to the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model may pick between a message and tool calls.
    #[default]
    Auto,
    /// Model will not call any tool.
    None,
    /// Model must call the named tool.
    Function(String),
}

/// Per-call options: sampling temperature and the attached tool surface.
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}

impl GenerateOptions {
    pub fn with_tools(tools: Vec<ToolSpec>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }
}

/// One tool call declared by the assistant: `{id, name, arguments}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Full response from one provider call: assistant text, declared tool calls
/// (in provider order), and usage when the backend reports it.
#[derive(Clone, Debug, Default)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

/// Uniform contract over LLM backends.
///
/// Cost accounting: `get_cost` reflects all calls made through this provider
/// instance; the record is updated exactly once per call, including for
/// streams cancelled after partial consumption.
#[async_trait]
pub trait Provider: Send + Sync {
    /// One completion; returns assistant text only.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError>;

    /// Lazy, finite, non-restartable sequence of text chunks. Chunks form an
    /// ordered prefix of the final text; caller cancellation ends the stream
    /// with no side effects beyond cost accounting for consumed tokens.
    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError>;

    /// Streams text through `chunk_tx` (when given) and returns the full
    /// response — content, tool calls, usage — after the stream ends.
    async fn generate_stream_response(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Cumulative cost record for this provider instance.
    fn get_cost(&self) -> CostRecord;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes_are_rate_limit_and_unavailable() {
        assert!(ProviderError::RateLimited("x".into()).is_transient());
        assert!(ProviderError::Unavailable("x".into()).is_transient());
        assert!(!ProviderError::Auth("x".into()).is_transient());
        assert!(!ProviderError::BadRequest("x".into()).is_transient());
        assert!(!ProviderError::ContextOverflow("x".into()).is_transient());
    }

    #[test]
    fn tool_call_request_serde_roundtrip() {
        let tc = ToolCallRequest {
            id: "call-1".into(),
            name: "search".into(),
            arguments: serde_json::json!({"q": "rust"}),
        };
        let s = serde_json::to_string(&tc).unwrap();
        let back: ToolCallRequest = serde_json::from_str(&s).unwrap();
        assert_eq!(tc, back);
    }
}
