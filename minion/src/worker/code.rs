//! Code-producing workers: `python` (single snippet) and `code`
//! (structured Thought → Code → Observation with the end-of-code sentinel).
//!
//! Both run extracted code on the brain's shared interpreter. Execution
//! failures are formatted as Observations and fed back into the next round,
//! up to the configured round budget.

use async_trait::async_trait;
use tracing::debug;

use crate::brain::Brain;
use crate::error::MinionError;
use crate::message::{canonicalize, Message};
use crate::state::{AgentResponse, Input};

use super::{extract_code, prompts, Worker};

fn observation(text: &str) -> String {
    prompts::OBSERVATION_TEMPLATE.replace("{observation}", text)
}

/// Shared generate → extract → execute loop for the two code workers.
async fn code_loop(
    worker_name: &str,
    system_prompt: &str,
    input: &mut Input,
    brain: &Brain,
) -> Result<AgentResponse, MinionError> {
    let rounds = brain.config().max_code_rounds.max(1);
    let mut messages = canonicalize(&input.query, Some(system_prompt));
    if let Some(feedback) = &input.feedback {
        messages.push(Message::user(format!(
            "Previous attempt feedback:\n{feedback}"
        )));
    }

    let provider = brain.provider();
    let options = crate::llm::GenerateOptions {
        temperature: brain.config().temperature,
        ..Default::default()
    };
    let mut last_raw = String::new();

    for round in 0..rounds {
        let content = provider.generate(&messages, &options).await?;
        last_raw = content.clone();
        messages.push(Message::assistant(content.clone()));

        let Some(code) = extract_code(&content) else {
            messages.push(Message::user(observation(
                "No code block found. Reply with a ```python fenced block.",
            )));
            continue;
        };

        let result = brain.run_code(&code).await;
        debug!(
            worker = worker_name,
            round,
            ok = result.ok(),
            is_final = result.is_final_answer,
            "code round executed"
        );

        match &result.error {
            Some(error) => {
                let mut obs = String::new();
                if !result.logs.is_empty() {
                    obs.push_str(&result.logs);
                }
                obs.push_str(error);
                messages.push(Message::user(observation(&obs)));
            }
            None => {
                let answer = result.value_text();
                input.answer = Some(answer.clone());
                return Ok(AgentResponse {
                    answer,
                    is_final_answer: result.is_final_answer,
                    raw_reply: last_raw,
                    messages,
                    ..AgentResponse::answer("")
                });
            }
        }
    }

    Ok(AgentResponse {
        answer: format!("{worker_name} worker exhausted {rounds} rounds without a result"),
        terminated: true,
        truncated: true,
        is_final_answer: false,
        raw_reply: last_raw,
        messages,
        ..Default::default()
    })
}

/// LLM generates a Python snippet; the interpreter's return value (or the
/// `final_answer` payload) is the answer.
pub struct PythonWorker;

#[async_trait]
impl Worker for PythonWorker {
    fn name(&self) -> &str {
        "python"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        code_loop("python", prompts::PYTHON_SYSTEM, input, brain).await
    }
}

/// Structured Thought → Code → Observation with the `<end_code>` sentinel.
pub struct CodeWorker;

#[async_trait]
impl Worker for CodeWorker {
    fn name(&self) -> &str {
        "code"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        code_loop("code", prompts::CODE_SYSTEM, input, brain).await
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
    async fn arithmetic_via_code_single_round() {
        let brain = brain_with(vec![
            "Thought: multiply.\nCode:\n```python\nresult = 234 * 568\nfinal_answer(result)\n```<end_code>",
        ]);
        let mut input = Input::new("what's the solution 234*568");
        let response = CodeWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "132912");
        assert!(response.terminated);
        assert!(response.is_final_answer);
    }

    #[tokio::test]
    async fn execution_error_becomes_observation_then_retry() {
        let brain = brain_with(vec![
            "```python\nfinal_answer(1 / 0)\n```",
            "```python\nfinal_answer('recovered')\n```",
        ]);
        let mut input = Input::new("divide");
        let response = PythonWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "recovered");
        // the retry round saw the error as an Observation
        let obs = response
            .messages
            .iter()
            .find(|m| m.content.as_text().contains("ZeroDivisionError"))
            .expect("observation with error");
        assert!(obs.content.as_text().starts_with("Observation:"));
    }

    #[tokio::test]
    async fn round_budget_exhaustion_truncates() {
        let brain = brain_with(vec!["```python\nfinal_answer(1 / 0)\n```"]);
        let mut input = Input::new("always fails");
        let response = PythonWorker.execute(&mut input, &brain).await.unwrap();
        assert!(response.truncated);
        assert!(!response.is_final_answer);
    }

    #[tokio::test]
    async fn missing_code_block_prompts_again() {
        let brain = brain_with(vec![
            "I will just describe the answer without code.",
            "```python\nfinal_answer(7)\n```",
        ]);
        let mut input = Input::new("compute");
        let response = PythonWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "7");
    }

    #[tokio::test]
    async fn last_expression_is_answer_without_final_answer() {
        let brain = brain_with(vec!["```python\n2 + 3\n```"]);
        let mut input = Input::new("add");
        let response = PythonWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "5");
        assert!(!response.is_final_answer);
    }
}
