//! Action node: exactly one LLM turn for a worker.
//!
//! Builds the message list, attaches the tool surface, calls the provider
//! (streaming or not), dispatches declared tool calls in provider order, and
//! detects the `final_answer` tool as terminal. Tool dispatch failures are
//! reported as `tool_response` chunks with an error payload; they do not
//! abort the turn.

use std::sync::Arc;

use serde_json::Value;
use stream_event::StreamChunk;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::MinionError;
use crate::llm::{GenerateOptions, Provider, ProviderResponse, ToolCallRequest, ToolChoice};
use crate::message::Message;
use crate::tools::{Tool, ToolError, TOOL_FINAL_ANSWER};

/// One dispatched tool call and its outcome.
#[derive(Clone, Debug)]
pub struct ToolDispatch {
    pub request: ToolCallRequest,
    pub result: Result<Value, String>,
}

/// Result of one action-node turn.
#[derive(Debug, Default)]
pub struct TurnResult {
    /// Raw provider response (content, tool calls, usage).
    pub response: ProviderResponse,
    /// Messages produced this turn: the assistant message, then one tool
    /// message per dispatched call, in dispatch order.
    pub messages: Vec<Message>,
    pub tool_results: Vec<ToolDispatch>,
    /// True when `final_answer` was called; no further dispatch happened.
    pub terminated: bool,
    pub final_answer: Option<String>,
}

/// Executes single atomic LLM turns against a fixed tool surface.
pub struct ActionNode {
    provider: Arc<dyn Provider>,
    tools: Vec<Arc<dyn Tool>>,
    tool_choice: ToolChoice,
    temperature: Option<f32>,
    tool_timeout: Option<std::time::Duration>,
}

impl ActionNode {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            temperature: None,
            tool_timeout: None,
        }
    }

    /// Per-tool dispatch timeout; a timeout surfaces as a recoverable error
    /// in the tool response, not a silent failure.
    pub fn with_tool_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            temperature: self.temperature,
            tools: self.tools.iter().map(|t| t.spec()).collect(),
            tool_choice: self.tool_choice.clone(),
        }
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Runs one turn. When `chunk_tx` is given, emits `llm_output` chunks as
    /// provider text arrives plus `tool_call` / `tool_response` /
    /// `final_answer` chunks around dispatch.
    pub async fn execute(
        &self,
        messages: &[Message],
        chunk_tx: Option<&mpsc::Sender<StreamChunk>>,
    ) -> Result<TurnResult, MinionError> {
        // a forced tool must be present on this node's surface
        if let ToolChoice::Function(name) = &self.tool_choice {
            if self.find_tool(name).is_none() && name != TOOL_FINAL_ANSWER {
                return Err(MinionError::Tool(ToolError::NotFound(name.clone())));
            }
        }

        let options = self.options();
        let response = if let Some(tx) = chunk_tx {
            let (text_tx, mut text_rx) = mpsc::channel::<String>(64);
            let out = tx.clone();
            let forward = tokio::spawn(async move {
                while let Some(text) = text_rx.recv().await {
                    let _ = out.send(StreamChunk::llm_output(text)).await;
                }
            });
            let response = self
                .provider
                .generate_stream_response(messages, &options, Some(text_tx))
                .await?;
            let _ = forward.await;
            response
        } else {
            self.provider
                .generate_stream_response(messages, &options, None)
                .await?
        };

        let mut result = TurnResult {
            messages: vec![Message::assistant(response.content.clone())],
            response: response.clone(),
            ..Default::default()
        };

        for call in &response.tool_calls {
            if let Some(tx) = chunk_tx {
                let _ = tx
                    .send(StreamChunk::tool_call(&call.name, call.arguments.clone()))
                    .await;
            }
            if call.name == TOOL_FINAL_ANSWER {
                let answer = call
                    .arguments
                    .get("answer")
                    .map(value_text)
                    .unwrap_or_default();
                if let Some(tx) = chunk_tx {
                    let _ = tx.send(StreamChunk::final_answer(answer.clone())).await;
                }
                result.terminated = true;
                result.final_answer = Some(answer);
                // terminal: no further dispatch
                break;
            }

            let outcome = match self.find_tool(&call.name) {
                None => Err(ToolError::NotFound(call.name.clone()).to_string()),
                Some(tool) => {
                    let dispatch = tool.call(call.arguments.clone());
                    match self.tool_timeout {
                        Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                            Ok(result) => result.map_err(|e| e.to_string()),
                            Err(_) => Err(format!(
                                "tool '{}' timed out after {}s",
                                call.name,
                                limit.as_secs_f64()
                            )),
                        },
                        None => dispatch.await.map_err(|e| e.to_string()),
                    }
                }
            };
            debug!(tool = %call.name, ok = outcome.is_ok(), "dispatched tool call");

            let content = match &outcome {
                Ok(value) => value_text(value),
                Err(error) => format!("Error: {error}"),
            };
            if let Some(tx) = chunk_tx {
                let _ = tx
                    .send(StreamChunk::tool_response(&call.id, content.clone()))
                    .await;
            }
            result
                .messages
                .push(Message::tool(call.id.clone(), content).with_name(call.name.clone()));
            result.tool_results.push(ToolDispatch {
                request: call.clone(),
                result: outcome,
            });
        }

        Ok(result)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::tools::{ParamSpec, ToolSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingTool {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &str {
            "lookup"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec::new("lookup", "looks things up")
                .with_input("q", ParamSpec::required("string", "query"))
        }

        async fn call(&self, args: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ToolError::execution("lookup", "backend down"))
            } else {
                Ok(json!(format!("result for {}", args["q"].as_str().unwrap_or(""))))
            }
        }
    }

    fn scripted(tool_calls: Vec<ToolCallRequest>) -> Arc<MockProvider> {
        Arc::new(MockProvider::with_script(vec![ProviderResponse {
            content: "thinking...".into(),
            tool_calls,
            usage: None,
        }]))
    }

    #[tokio::test]
    async fn dispatches_tool_calls_in_provider_order() {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = scripted(vec![
            ToolCallRequest {
                id: "c1".into(),
                name: "lookup".into(),
                arguments: json!({"q": "first"}),
            },
            ToolCallRequest {
                id: "c2".into(),
                name: "lookup".into(),
                arguments: json!({"q": "second"}),
            },
        ]);
        let node = ActionNode::new(provider).with_tools(vec![Arc::new(RecordingTool {
            calls: Arc::clone(&calls),
            fail: false,
        })]);
        let turn = node.execute(&[Message::user("go")], None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(turn.messages.len(), 3); // assistant + 2 tool messages
        assert_eq!(turn.messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(turn.messages[2].tool_call_id.as_deref(), Some("c2"));
        assert!(!turn.terminated);
    }

    #[tokio::test]
    async fn tool_error_is_reported_not_fatal() {
        let provider = scripted(vec![ToolCallRequest {
            id: "c1".into(),
            name: "lookup".into(),
            arguments: json!({"q": "x"}),
        }]);
        let node = ActionNode::new(provider).with_tools(vec![Arc::new(RecordingTool {
            calls: Arc::new(AtomicU32::new(0)),
            fail: true,
        })]);
        let turn = node.execute(&[Message::user("go")], None).await.unwrap();
        assert_eq!(turn.tool_results.len(), 1);
        assert!(turn.tool_results[0].result.is_err());
        assert!(turn.messages[1].content.as_text().starts_with("Error:"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_response() {
        let provider = scripted(vec![ToolCallRequest {
            id: "c1".into(),
            name: "ghost".into(),
            arguments: json!({}),
        }]);
        let node = ActionNode::new(provider);
        let turn = node.execute(&[Message::user("go")], None).await.unwrap();
        assert!(turn.tool_results[0]
            .result
            .as_ref()
            .unwrap_err()
            .contains("tool not found"));
    }

    #[tokio::test]
    async fn final_answer_is_terminal_and_stops_dispatch() {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = scripted(vec![
            ToolCallRequest {
                id: "c1".into(),
                name: TOOL_FINAL_ANSWER.into(),
                arguments: json!({"answer": "42"}),
            },
            ToolCallRequest {
                id: "c2".into(),
                name: "lookup".into(),
                arguments: json!({"q": "never"}),
            },
        ]);
        let node = ActionNode::new(provider).with_tools(vec![Arc::new(RecordingTool {
            calls: Arc::clone(&calls),
            fail: false,
        })]);
        let turn = node.execute(&[Message::user("go")], None).await.unwrap();
        assert!(turn.terminated);
        assert_eq!(turn.final_answer.as_deref(), Some("42"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_tool_times_out_as_recoverable_error() {
        struct SlowTool;

        #[async_trait]
        impl Tool for SlowTool {
            fn name(&self) -> &str {
                "slow"
            }

            fn spec(&self) -> ToolSpec {
                ToolSpec::new("slow", "sleeps")
            }

            async fn call(&self, _args: Value) -> Result<Value, ToolError> {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(json!("late"))
            }
        }

        let provider = scripted(vec![ToolCallRequest {
            id: "c1".into(),
            name: "slow".into(),
            arguments: json!({}),
        }]);
        let node = ActionNode::new(provider)
            .with_tools(vec![Arc::new(SlowTool)])
            .with_tool_timeout(std::time::Duration::from_millis(20));
        let turn = node.execute(&[Message::user("go")], None).await.unwrap();
        assert!(turn.tool_results[0]
            .result
            .as_ref()
            .unwrap_err()
            .contains("timed out"));
        // the turn itself is not aborted
        assert!(!turn.terminated);
    }

    #[tokio::test]
    async fn forced_unknown_tool_choice_fails() {
        let provider = scripted(vec![]);
        let node = ActionNode::new(provider)
            .with_tool_choice(ToolChoice::Function("not_loaded".into()));
        let err = node.execute(&[Message::user("go")], None).await.unwrap_err();
        assert!(matches!(
            err,
            MinionError::Tool(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn streaming_chunks_reconstruct_assistant_text() {
        let provider = Arc::new(MockProvider::with_reply("alpha beta gamma"));
        let node = ActionNode::new(provider);
        let (tx, mut rx) = mpsc::channel(64);
        let turn = node
            .execute(&[Message::user("go")], Some(&tx))
            .await
            .unwrap();
        drop(tx);
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(
            stream_event::chunk::accumulate_text(&chunks),
            turn.response.content
        );
    }
}
