//! Auto-compact of long histories.
//!
//! Before each step, when the estimated token count nears the context
//! window, the middle of the history is summarized by the compact model into
//! a single `[Conversation Summary]` system message. System messages and the
//! last `keep_recent` non-system messages are pinned. A summarization
//! failure leaves the history unchanged and surfaces as a warning.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::{GenerateOptions, Provider};
use crate::message::{Content, Message};
use crate::state::AgentState;

/// Knobs for the compaction pass.
#[derive(Clone, Debug)]
pub struct CompactConfig {
    pub enabled: bool,
    /// Model context window in tokens.
    pub context_window: usize,
    /// Compaction triggers at `threshold × context_window`.
    pub threshold: f64,
    /// Recent non-system messages pinned through compaction.
    pub keep_recent: usize,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_window: 128_000,
            threshold: 0.92,
            keep_recent: 10,
        }
    }
}

/// Approximate token count: one token per four content bytes plus a small
/// per-message overhead. A tokenizer can be substituted; this estimator is
/// the fallback.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| m.content.byte_len() / 4 + 4)
        .sum()
}

const SUMMARY_PROMPT: &str = "Summarize the following conversation span faithfully and concisely. \
Keep decisions, facts, open questions, and tool results that later turns may \
need. Reply with the summary only.";

/// Runs one compaction pass when due. Returns `Ok(true)` when the history
/// was compacted, `Ok(false)` when below threshold or nothing to do, and
/// `Err(warning)` on summarization failure (history unchanged).
pub async fn compact_pass(
    state: &mut AgentState,
    provider: &Arc<dyn Provider>,
    config: &CompactConfig,
) -> Result<bool, String> {
    if !config.enabled {
        return Ok(false);
    }
    let before = estimate_tokens(&state.messages);
    let trigger = (config.threshold * config.context_window as f64) as usize;
    if before < trigger {
        return Ok(false);
    }

    // partition: system messages pinned, last keep_recent non-system pinned,
    // the rest summarized
    let non_system: Vec<usize> = state
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_system())
        .map(|(i, _)| i)
        .collect();
    if non_system.len() <= config.keep_recent {
        return Ok(false);
    }
    let span: Vec<usize> = non_system[..non_system.len() - config.keep_recent].to_vec();
    let recent: Vec<usize> = non_system[non_system.len() - config.keep_recent..].to_vec();

    let mut transcript = String::new();
    for &i in &span {
        let m = &state.messages[i];
        transcript.push_str(&format!("{:?}: {}\n", m.role, m.content.as_text()));
    }

    let summary_request = vec![
        Message::system(SUMMARY_PROMPT),
        Message::user(transcript),
    ];
    let summary = provider
        .generate(&summary_request, &GenerateOptions::default())
        .await
        .map_err(|e| {
            warn!(error = %e, "history summarization failed, leaving history unchanged");
            format!("auto-compact failed: {e}")
        })?;

    let mut messages = Vec::with_capacity(state.messages.len());
    let mut steps = Vec::with_capacity(state.messages.len());
    for (i, m) in state.messages.iter().enumerate() {
        if m.is_system() {
            messages.push(m.clone());
            steps.push(state.message_steps.get(i).copied().unwrap_or(0));
        }
    }
    messages.push(Message::system(Content::Text(format!(
        "[Conversation Summary]\n{summary}"
    ))));
    steps.push(state.step_count);
    for &i in &recent {
        messages.push(state.messages[i].clone());
        steps.push(state.message_steps.get(i).copied().unwrap_or(0));
    }

    let after = estimate_tokens(&messages);
    debug!(before, after, summarized = span.len(), "history compacted");
    state.messages = messages;
    state.message_steps = steps;
    // decay markers index into the old layout; drop stale indices
    state.decayed.retain(|m| m.message_index < state.messages.len());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::state::Input;

    fn long_state(messages: usize, content_len: usize) -> AgentState {
        let mut state = AgentState::new(Input::new("q"));
        state.push_messages(vec![Message::system("keep me")]);
        for i in 0..messages {
            state.push_messages(vec![Message::user(format!(
                "{i}: {}",
                "x".repeat(content_len)
            ))]);
        }
        state
    }

    fn config(window: usize) -> CompactConfig {
        CompactConfig {
            enabled: true,
            context_window: window,
            threshold: 0.92,
            keep_recent: 10,
        }
    }

    #[tokio::test]
    async fn below_threshold_is_untouched() {
        let mut state = long_state(5, 100);
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::with_reply("summary"));
        let compacted = compact_pass(&mut state, &provider, &config(128_000))
            .await
            .unwrap();
        assert!(!compacted);
        assert_eq!(state.messages.len(), 6);
    }

    #[tokio::test]
    async fn compaction_pins_system_and_recent_messages() {
        let mut state = long_state(30, 2_000);
        let before_tokens = estimate_tokens(&state.messages);
        let recent_before: Vec<_> = state
            .messages
            .iter()
            .filter(|m| !m.is_system())
            .rev()
            .take(10)
            .cloned()
            .collect();

        let provider: Arc<dyn Provider> = Arc::new(MockProvider::with_reply("a short summary"));
        // window sized so 30 × ~500 tokens trips the threshold
        let compacted = compact_pass(&mut state, &provider, &config(16_000))
            .await
            .unwrap();
        assert!(compacted);
        assert!(estimate_tokens(&state.messages) < before_tokens);

        // system message unchanged
        assert_eq!(state.messages[0].content.as_text(), "keep me");
        // exactly one new summary system message
        let summaries: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.content.as_text().starts_with("[Conversation Summary]"))
            .collect();
        assert_eq!(summaries.len(), 1);
        // the last 10 non-system messages are identical
        let recent_after: Vec<_> = state
            .messages
            .iter()
            .filter(|m| !m.is_system())
            .rev()
            .take(10)
            .cloned()
            .collect();
        assert_eq!(recent_before, recent_after);
    }

    #[tokio::test]
    async fn summarization_failure_leaves_history_unchanged() {
        struct DownProvider;

        #[async_trait::async_trait]
        impl Provider for DownProvider {
            async fn generate(
                &self,
                _m: &[Message],
                _o: &GenerateOptions,
            ) -> Result<String, crate::llm::ProviderError> {
                Err(crate::llm::ProviderError::Unavailable("down".into()))
            }

            async fn generate_stream(
                &self,
                _m: &[Message],
                _o: &GenerateOptions,
            ) -> Result<
                futures::stream::BoxStream<'static, Result<String, crate::llm::ProviderError>>,
                crate::llm::ProviderError,
            > {
                Err(crate::llm::ProviderError::Unavailable("down".into()))
            }

            async fn generate_stream_response(
                &self,
                _m: &[Message],
                _o: &GenerateOptions,
                _tx: Option<tokio::sync::mpsc::Sender<String>>,
            ) -> Result<crate::llm::ProviderResponse, crate::llm::ProviderError> {
                Err(crate::llm::ProviderError::Unavailable("down".into()))
            }

            fn get_cost(&self) -> crate::llm::CostRecord {
                crate::llm::CostRecord::default()
            }
        }

        let mut state = long_state(30, 2_000);
        let snapshot = state.messages.clone();
        let provider: Arc<dyn Provider> = Arc::new(DownProvider);
        let result = compact_pass(&mut state, &provider, &config(16_000)).await;
        assert!(result.is_err());
        assert_eq!(state.messages, snapshot);
    }
}
