//! One unit of streamed output: content + kind tag + metadata + timestamp.
//!
//! Ordering contract: chunks are ordered per logical turn, and concatenating
//! the `content` of all `Text` and `LlmOutput` chunks in order reconstructs
//! the turn's assistant text byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind tag for one stream chunk.
///
/// `Text` and `LlmOutput` carry assistant text; everything else is rendered
/// specially by consumers (tool traffic, step markers, terminal states).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    LlmOutput,
    ToolCall,
    ToolResponse,
    StepStart,
    StepEnd,
    Completion,
    Warning,
    Error,
    FinalAnswer,
}

impl ChunkKind {
    /// Wire name of this kind (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::LlmOutput => "llm_output",
            ChunkKind::ToolCall => "tool_call",
            ChunkKind::ToolResponse => "tool_response",
            ChunkKind::StepStart => "step_start",
            ChunkKind::StepEnd => "step_end",
            ChunkKind::Completion => "completion",
            ChunkKind::Warning => "warning",
            ChunkKind::Error => "error",
            ChunkKind::FinalAnswer => "final_answer",
        }
    }

    /// True for the kinds whose `content` accumulates into assistant text.
    pub fn carries_text(&self) -> bool {
        matches!(self, ChunkKind::Text | ChunkKind::LlmOutput)
    }
}

/// One chunk of streamed output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub chunk_type: ChunkKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub timestamp: String,
}

impl StreamChunk {
    /// Creates a chunk with the given kind and content, stamped now.
    pub fn new(chunk_type: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chunk_type,
            metadata: Map::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Text, content)
    }

    pub fn llm_output(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::LlmOutput, content)
    }

    /// Tool invocation chunk; `name` and `arguments` land in metadata.
    pub fn tool_call(name: &str, arguments: Value) -> Self {
        Self::new(ChunkKind::ToolCall, String::new())
            .with_metadata("name", Value::String(name.to_string()))
            .with_metadata("arguments", arguments)
    }

    /// Tool result chunk; `tool_call_id` lands in metadata.
    pub fn tool_response(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self::new(ChunkKind::ToolResponse, content)
            .with_metadata("tool_call_id", Value::String(tool_call_id.to_string()))
    }

    pub fn step_start(step: usize) -> Self {
        Self::new(ChunkKind::StepStart, String::new())
            .with_metadata("step", Value::Number(step.into()))
    }

    pub fn step_end(step: usize) -> Self {
        Self::new(ChunkKind::StepEnd, String::new())
            .with_metadata("step", Value::Number(step.into()))
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Warning, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Error, content)
    }

    pub fn final_answer(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::FinalAnswer, content)
    }

    pub fn completion(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Completion, content)
    }

    /// Adds one metadata entry, replacing any existing value for the key.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Serializes this chunk to a JSON object (no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Concatenates the content of all text-carrying chunks, in order.
pub fn accumulate_text(chunks: &[StreamChunk]) -> String {
    let mut out = String::new();
    for c in chunks {
        if c.chunk_type.carries_text() {
            out.push_str(&c.content);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let v = serde_json::to_value(ChunkKind::LlmOutput).unwrap();
        assert_eq!(v, "llm_output");
        let v = serde_json::to_value(ChunkKind::FinalAnswer).unwrap();
        assert_eq!(v, "final_answer");
    }

    #[test]
    fn as_str_matches_serde_name() {
        for kind in [
            ChunkKind::Text,
            ChunkKind::LlmOutput,
            ChunkKind::ToolCall,
            ChunkKind::ToolResponse,
            ChunkKind::StepStart,
            ChunkKind::StepEnd,
            ChunkKind::Completion,
            ChunkKind::Warning,
            ChunkKind::Error,
            ChunkKind::FinalAnswer,
        ] {
            let v = serde_json::to_value(kind).unwrap();
            assert_eq!(v, kind.as_str());
        }
    }

    #[test]
    fn tool_call_carries_name_and_arguments_in_metadata() {
        let chunk = StreamChunk::tool_call("search", serde_json::json!({"q": "x"}));
        assert_eq!(chunk.metadata["name"], "search");
        assert_eq!(chunk.metadata["arguments"]["q"], "x");
        assert!(chunk.content.is_empty());
    }

    #[test]
    fn accumulate_text_keeps_only_text_kinds_in_order() {
        let chunks = vec![
            StreamChunk::step_start(1),
            StreamChunk::llm_output("hel"),
            StreamChunk::tool_response("id-1", "ignored"),
            StreamChunk::llm_output("lo"),
            StreamChunk::text("!"),
            StreamChunk::step_end(1),
        ];
        assert_eq!(accumulate_text(&chunks), "hello!");
    }

    #[test]
    fn empty_metadata_is_skipped_in_json() {
        let v = StreamChunk::text("hi").to_value().unwrap();
        assert!(v.get("metadata").is_none());
        assert_eq!(v["chunk_type"], "text");
        assert_eq!(v["content"], "hi");
    }
}
