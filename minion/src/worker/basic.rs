//! Single-call workers: `raw`, `native`, `cot`, and the self-consistency
//! `dcot` variant.

use async_trait::async_trait;

use crate::brain::Brain;
use crate::error::MinionError;
use crate::llm::GenerateOptions;
use crate::message::{canonicalize, Message};
use crate::node::ActionNode;
use crate::state::{AgentResponse, Input};

use super::{extract_final_answer, prompts, Worker};

fn turn_messages(input: &Input, system_override: Option<&str>) -> Vec<Message> {
    let system = system_override.or(input.system_prompt.as_deref());
    canonicalize(&input.query, system)
}

async fn single_turn(
    input: &Input,
    brain: &Brain,
    system_override: Option<&str>,
) -> Result<(String, Vec<Message>), MinionError> {
    let node = ActionNode::new(brain.provider()).with_tools(brain.tools());
    let node = match brain.config().temperature {
        Some(t) => node.with_temperature(t),
        None => node,
    };
    let mut messages = turn_messages(input, system_override);
    let chunk_tx = if input.stream {
        brain.stream_sender()
    } else {
        None
    };
    let turn = node.execute(&messages, chunk_tx).await?;
    let content = turn.response.content.clone();
    messages.extend(turn.messages);
    Ok((content, messages))
}

/// Single action-node call; the answer is the full assistant text.
pub struct RawWorker;

#[async_trait]
impl Worker for RawWorker {
    fn name(&self) -> &str {
        "raw"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let (content, messages) = single_turn(input, brain, None).await?;
        input.answer = Some(content.clone());
        Ok(AgentResponse {
            raw_reply: content.clone(),
            answer: content,
            messages,
            ..AgentResponse::answer("")
        })
    }
}

/// Templated prompt plus a single call; the answer is the last assistant
/// message.
pub struct NativeWorker;

#[async_trait]
impl Worker for NativeWorker {
    fn name(&self) -> &str {
        "native"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let rendered = brain
            .config()
            .native_template
            .replace("{query}", &input.query_text());
        let mut templated = input.clone();
        templated.query = crate::message::Query::Text(rendered);
        let (_, messages) = single_turn(&templated, brain, None).await?;
        let answer = messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::Assistant)
            .map(|m| m.content.as_text())
            .unwrap_or_default();
        input.answer = Some(answer.clone());
        Ok(AgentResponse {
            raw_reply: answer.clone(),
            answer,
            messages,
            ..AgentResponse::answer("")
        })
    }
}

/// Chain-of-thought: one call under a reasoning prompt; the answer is pulled
/// out by the final-answer extractor.
pub struct CotWorker;

#[async_trait]
impl Worker for CotWorker {
    fn name(&self) -> &str {
        "cot"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let (content, messages) = single_turn(input, brain, Some(prompts::COT_SYSTEM)).await?;
        let answer = extract_final_answer(&content);
        input.answer = Some(answer.clone());
        Ok(AgentResponse {
            answer,
            raw_reply: content,
            messages,
            ..AgentResponse::answer("")
        })
    }
}

/// Dynamic chain-of-thought with self-consistency: N parallel samples,
/// majority voting on the extracted answers. Each sample's score is the
/// fraction of samples agreeing with it; vote ties resolve to the candidate
/// that appeared first.
pub struct DcotWorker;

#[async_trait]
impl Worker for DcotWorker {
    fn name(&self) -> &str {
        "dcot"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let samples = brain.config().dcot_samples.max(1);
        let messages = turn_messages(input, Some(prompts::COT_SYSTEM));
        let options = GenerateOptions {
            temperature: brain.config().temperature.or(Some(0.8)),
            ..Default::default()
        };

        let provider = brain.provider();
        let calls = (0..samples).map(|_| {
            let provider = provider.clone();
            let messages = messages.clone();
            let options = options.clone();
            async move { provider.generate(&messages, &options).await }
        });
        let results = futures::future::join_all(calls).await;

        let mut answers: Vec<String> = Vec::new();
        let mut raw = String::new();
        for result in results {
            match result {
                Ok(text) => {
                    answers.push(extract_final_answer(&text));
                    raw = text;
                }
                Err(e) if !answers.is_empty() => {
                    tracing::warn!(error = %e, "dcot sample failed, continuing with the rest");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // majority vote; first occurrence wins ties
        let mut best: Option<(usize, &String)> = None;
        for answer in &answers {
            let votes = answers.iter().filter(|a| *a == answer).count();
            let better = match best {
                None => true,
                Some((best_votes, _)) => votes > best_votes,
            };
            if better {
                best = Some((votes, answer));
            }
        }
        let (votes, answer) = best
            .map(|(v, a)| (v, a.clone()))
            .ok_or_else(|| MinionError::Worker {
                worker: "dcot".to_string(),
                message: "no samples produced an answer".to_string(),
            })?;
        let score = votes as f64 / answers.len() as f64;
        input.answer = Some(answer.clone());
        Ok(AgentResponse {
            answer,
            score,
            raw_reply: raw,
            messages,
            ..AgentResponse::answer("")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockProvider, ProviderResponse};
    use std::sync::Arc;

    fn brain_with(replies: Vec<&str>) -> Brain {
        let responses = replies
            .into_iter()
            .map(|r| ProviderResponse {
                content: r.to_string(),
                ..Default::default()
            })
            .collect();
        Brain::builder()
            .provider(Arc::new(MockProvider::with_script(responses)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn raw_returns_full_text() {
        let brain = brain_with(vec!["full reply text"]);
        let mut input = Input::new("q");
        let response = RawWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "full reply text");
        assert_eq!(input.answer.as_deref(), Some("full reply text"));
    }

    #[tokio::test]
    async fn cot_extracts_final_answer_line() {
        let brain = brain_with(vec!["Step 1: think\nStep 2: more\nFinal Answer: 99"]);
        let mut input = Input::new("q");
        let response = CotWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "99");
        assert!(response.raw_reply.contains("Step 1"));
    }

    #[tokio::test]
    async fn dcot_majority_vote_wins() {
        // 3 votes for 42, 2 for 41
        let brain = brain_with(vec![
            "Final Answer: 42",
            "Final Answer: 41",
            "Final Answer: 42",
            "Final Answer: 41",
            "Final Answer: 42",
        ]);
        let mut input = Input::new("q");
        let response = DcotWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "42");
        assert!((response.score - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn native_renders_template() {
        let mut config = crate::brain::BrainConfig {
            native_template: "Answer concisely: {query}".to_string(),
            ..Default::default()
        };
        config.dcot_samples = 1;
        let provider = Arc::new(MockProvider::with_reply("short"));
        let brain = Brain::builder()
            .provider(provider)
            .config(config)
            .build()
            .unwrap();
        let mut input = Input::new("why?");
        let response = NativeWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "short");
        // the rendered template reached the provider as the user message
        let user = response
            .messages
            .iter()
            .find(|m| m.role == crate::message::Role::User)
            .unwrap();
        assert_eq!(user.content.as_text(), "Answer concisely: why?");
    }
}
