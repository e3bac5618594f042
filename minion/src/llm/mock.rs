//! Scripted mock provider for tests and examples.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::message::Message;

use super::{
    CostRecord, GenerateOptions, Provider, ProviderError, ProviderResponse, Usage,
};

/// Provider that replays a scripted sequence of responses.
///
/// Each call pops the next scripted response; when the script is exhausted the
/// last response repeats. Streaming splits content into small chunks so chunk
/// accumulation is exercised. Usage is synthesized from message/content sizes
/// unless a scripted response carries its own.
pub struct MockProvider {
    script: Mutex<ScriptState>,
    cost: Mutex<CostRecord>,
}

struct ScriptState {
    responses: Vec<ProviderResponse>,
    next: usize,
    calls: u64,
}

impl MockProvider {
    /// Always replies with the given text and no tool calls.
    pub fn with_reply(content: impl Into<String>) -> Self {
        Self::with_script(vec![ProviderResponse {
            content: content.into(),
            ..Default::default()
        }])
    }

    /// Replays `responses` in order; the last one repeats when exhausted.
    pub fn with_script(responses: Vec<ProviderResponse>) -> Self {
        assert!(!responses.is_empty(), "script must not be empty");
        Self {
            script: Mutex::new(ScriptState {
                responses,
                next: 0,
                calls: 0,
            }),
            cost: Mutex::new(CostRecord::default()),
        }
    }

    /// Number of calls made so far (any of the three generate methods).
    pub fn call_count(&self) -> u64 {
        self.script.lock().unwrap().calls
    }

    fn next_response(&self, messages: &[Message]) -> ProviderResponse {
        let mut state = self.script.lock().unwrap();
        state.calls += 1;
        let idx = state.next.min(state.responses.len() - 1);
        if state.next < state.responses.len() {
            state.next += 1;
        }
        let mut response = state.responses[idx].clone();
        if response.usage.is_none() {
            let prompt: usize = messages.iter().map(|m| m.content.byte_len() / 4).sum();
            let completion = response.content.len() / 4;
            response.usage = Some(Usage::new(prompt as u64 + 1, completion as u64 + 1));
        }
        drop(state);

        if let Some(usage) = &response.usage {
            self.cost.lock().unwrap().record_call(usage, None);
        }
        response
    }
}

fn split_chunks(content: &str) -> Vec<String> {
    // Word-boundary chunks; keeps the separator with the preceding word so
    // concatenation reproduces the text byte-for-byte.
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in content.chars() {
        current.push(ch);
        if ch == ' ' || current.len() >= 16 {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl Provider for MockProvider {
    async fn generate(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        Ok(self.next_response(messages).content)
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        let response = self.next_response(messages);
        let chunks = split_chunks(&response.content);
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn generate_stream_response(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self.next_response(messages);
        if let Some(tx) = chunk_tx {
            for chunk in split_chunks(&response.content) {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
        Ok(response)
    }

    fn get_cost(&self) -> CostRecord {
        self.cost.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallRequest;

    #[tokio::test]
    async fn script_advances_then_repeats_last() {
        let provider = MockProvider::with_script(vec![
            ProviderResponse {
                content: "first".into(),
                ..Default::default()
            },
            ProviderResponse {
                content: "second".into(),
                ..Default::default()
            },
        ]);
        let opts = GenerateOptions::default();
        assert_eq!(provider.generate(&[], &opts).await.unwrap(), "first");
        assert_eq!(provider.generate(&[], &opts).await.unwrap(), "second");
        assert_eq!(provider.generate(&[], &opts).await.unwrap(), "second");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn stream_chunks_concatenate_to_full_text() {
        let text = "the quick brown fox jumps over the lazy dog";
        let provider = MockProvider::with_reply(text);
        let mut stream = provider
            .generate_stream(&[], &GenerateOptions::default())
            .await
            .unwrap();
        let mut acc = String::new();
        while let Some(chunk) = stream.next().await {
            acc.push_str(&chunk.unwrap());
        }
        assert_eq!(acc, text);
    }

    #[tokio::test]
    async fn stream_response_forwards_chunks_and_returns_full() {
        let provider = MockProvider::with_script(vec![ProviderResponse {
            content: "tool time".into(),
            tool_calls: vec![ToolCallRequest {
                id: "c1".into(),
                name: "calc".into(),
                arguments: serde_json::json!({"x": 1}),
            }],
            usage: None,
        }]);
        let (tx, mut rx) = mpsc::channel(16);
        let response = provider
            .generate_stream_response(&[], &GenerateOptions::default(), Some(tx))
            .await
            .unwrap();
        assert_eq!(response.content, "tool time");
        assert_eq!(response.tool_calls.len(), 1);
        let mut acc = String::new();
        while let Some(chunk) = rx.recv().await {
            acc.push_str(&chunk);
        }
        assert_eq!(acc, "tool time");
    }

    #[tokio::test]
    async fn cost_updates_once_per_call() {
        let provider = MockProvider::with_reply("four words of text");
        let opts = GenerateOptions::default();
        provider.generate(&[Message::user("hello")], &opts).await.unwrap();
        let after_one = provider.get_cost();
        provider.generate(&[Message::user("hello")], &opts).await.unwrap();
        let after_two = provider.get_cost();
        assert!(after_one.total_tokens > 0);
        assert_eq!(after_two.total_tokens, after_one.total_tokens * 2);
    }
}
