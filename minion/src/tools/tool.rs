//! The `Tool` trait and the built-in `final_answer` tool.

use async_trait::async_trait;
use serde_json::Value;

use super::{ToolError, ToolSpec};

/// Name of the terminal tool: calling it ends the turn with a final answer.
pub const TOOL_FINAL_ANSWER: &str = "final_answer";

/// A single named callable exposed to the LLM and the interpreter.
///
/// Tools expose no internal state to the caller except their declared
/// outputs. `call` takes the arguments as a JSON object keyed by the spec's
/// input names and returns a JSON value.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a call site; must match the registry key when
    /// registered.
    fn name(&self) -> &str;

    /// Descriptor sent to providers and used for interpreter binding.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool. Invalid arguments are an
    /// [`InvalidInput`](ToolError::InvalidInput) error, runtime failures an
    /// [`Execution`](ToolError::Execution) error.
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Terminal tool: its single argument becomes the turn's final answer.
///
/// The action node treats a call to this tool as terminal and stops further
/// dispatch; the interpreter exposes the same protocol as the built-in
/// `final_answer(x)` function.
pub struct FinalAnswerTool;

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        TOOL_FINAL_ANSWER
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_FINAL_ANSWER,
            "Provide the final answer to the user's query. Call this exactly once, \
             when the answer is complete.",
        )
        .with_input(
            "answer",
            super::ParamSpec::required("string", "The final answer."),
        )
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let answer = args
            .get("answer")
            .cloned()
            .ok_or_else(|| ToolError::InvalidInput("missing answer".to_string()))?;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn final_answer_echoes_its_argument() {
        let tool = FinalAnswerTool;
        let out = tool.call(json!({"answer": "42"})).await.unwrap();
        assert_eq!(out, json!("42"));
    }

    #[tokio::test]
    async fn final_answer_requires_answer_argument() {
        let tool = FinalAnswerTool;
        let err = tool.call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
