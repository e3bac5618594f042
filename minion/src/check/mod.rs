//! Check/improve loop: grade a candidate answer, feed failures back to an
//! improver, repeat within budget.
//!
//! A [`Checker`] maps a candidate to `(score ∈ [0,1], feedback)`. The loop in
//! [`improve_loop`] runs at most `max_improve_rounds`, terminates early once
//! the score reaches `acceptance_threshold`, and gives up when the score
//! fails to improve across two consecutive rounds. Checker infrastructure
//! failures never abort the loop: they grade as zero with the failure text
//! as feedback.

mod graders;

pub use graders::{
    CheckMinion, CodiumCheckMinion, DoctestMinion, HeldOutExample, TestCase, TestMinion,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::brain::Brain;
use crate::error::MinionError;
use crate::state::{AgentResponse, Input};

/// Grade for one candidate.
#[derive(Clone, Debug, Default)]
pub struct CheckResult {
    /// In `[0, 1]`.
    pub score: f64,
    pub feedback: String,
}

/// Grades a candidate answer for an input.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(
        &self,
        input: &Input,
        answer: &str,
        brain: &Brain,
    ) -> Result<CheckResult, MinionError>;
}

async fn grade(input: &Input, answer: &str, brain: &Brain) -> CheckResult {
    let Some(checker) = brain.checker() else {
        return CheckResult::default();
    };
    match checker.check(input, answer, brain).await {
        Ok(mut result) => {
            result.score = result.score.clamp(0.0, 1.0);
            result
        }
        Err(e) => {
            warn!(checker = checker.name(), error = %e, "checker failed");
            CheckResult {
                score: 0.0,
                feedback: format!("checker '{}' failed: {e}", checker.name()),
            }
        }
    }
}

/// Produces a new candidate from the failing one plus the critic's feedback,
/// via a sub-worker (the input's route, or `cot`).
pub struct FeedbackMinion;

impl FeedbackMinion {
    pub async fn improve(
        input: &mut Input,
        failing_answer: &str,
        feedback: &str,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let route = input.route.clone().unwrap_or_else(|| "cot".to_string());
        let worker = brain
            .registry()
            .create(&route)
            .ok_or_else(|| MinionError::RouteNotFound(route))?;
        input.feedback = Some(format!(
            "A previous attempt answered:\n{failing_answer}\n\nIt was graded insufficient:\n{feedback}\n\nProduce a corrected answer."
        ));
        // fold the feedback into the query for workers that build their
        // prompt from the query alone
        let mut improve_input = input.clone();
        improve_input.query = crate::message::Query::Text(format!(
            "{}\n\n{}",
            input.query_text(),
            input.feedback.as_deref().unwrap_or_default()
        ));
        worker.execute(&mut improve_input, brain).await
    }
}

/// Runs the check/improve loop over an initial candidate.
pub async fn improve_loop(
    input: &mut Input,
    mut response: AgentResponse,
    brain: &Brain,
) -> Result<AgentResponse, MinionError> {
    let config = brain.config().check.clone();
    let first = grade(input, &response.answer, brain).await;
    response.score = first.score;
    let mut feedback = first.feedback;
    debug!(score = response.score, "initial candidate graded");

    if response.score >= config.acceptance_threshold {
        return Ok(response);
    }

    let mut best = response;
    let mut previous_score = best.score;
    let mut non_improving = 0u32;

    for round in 0..config.max_improve_rounds {
        let mut improved =
            FeedbackMinion::improve(input, &best.answer, &feedback, brain).await?;
        let graded = grade(input, &improved.answer, brain).await;
        improved.score = graded.score;
        debug!(round, score = improved.score, "improved candidate graded");

        let is_better = improved.score > best.score;
        // a round that is at least as good as the last and clears the
        // threshold terminates immediately
        if improved.score >= previous_score && improved.score >= config.acceptance_threshold {
            input.answer = Some(improved.answer.clone());
            return Ok(improved);
        }
        if improved.score <= previous_score {
            non_improving += 1;
            if non_improving >= 2 {
                break;
            }
        } else {
            non_improving = 0;
        }
        previous_score = improved.score;
        feedback = graded.feedback;
        if is_better {
            best = improved;
        }
    }

    input.answer = Some(best.answer.clone());
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{BrainConfig, CheckConfig};
    use crate::llm::{MockProvider, ProviderResponse};
    use crate::worker::WorkerRegistry;
    use std::sync::{Arc, Mutex};

    /// Checker scripted with a score per call.
    struct ScriptedChecker {
        scores: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn check(
            &self,
            _input: &Input,
            _answer: &str,
            _brain: &Brain,
        ) -> Result<CheckResult, MinionError> {
            let mut scores = self.scores.lock().unwrap();
            let score = if scores.is_empty() { 1.0 } else { scores.remove(0) };
            Ok(CheckResult {
                score,
                feedback: "needs work".to_string(),
            })
        }
    }

    fn brain_with(replies: Vec<&str>, scores: Vec<f64>) -> Brain {
        let responses = replies
            .into_iter()
            .map(|r| ProviderResponse {
                content: r.to_string(),
                ..Default::default()
            })
            .collect();
        let config = BrainConfig {
            check: CheckConfig {
                enabled: true,
                acceptance_threshold: 0.8,
                max_improve_rounds: 3,
                tolerance: 1e-6,
            },
            ..Default::default()
        };
        Brain::builder()
            .provider(Arc::new(MockProvider::with_script(responses)))
            .registry(Arc::new(WorkerRegistry::with_defaults()))
            .config(config)
            .checker(Arc::new(ScriptedChecker {
                scores: Mutex::new(scores),
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn accepted_candidate_terminates_without_improving() {
        let brain = brain_with(vec!["unused"], vec![0.95]);
        let mut input = Input::new("q").with_route("raw");
        let response = improve_loop(&mut input, AgentResponse::answer("good"), &brain)
            .await
            .unwrap();
        assert_eq!(response.answer, "good");
        assert!((response.score - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn improving_candidate_above_threshold_terminates_that_round() {
        // initial 0.3, improved 0.9 -> terminate after one improve round
        let brain = brain_with(vec!["better answer"], vec![0.3, 0.9]);
        let mut input = Input::new("q").with_route("raw");
        let response = improve_loop(&mut input, AgentResponse::answer("weak"), &brain)
            .await
            .unwrap();
        assert_eq!(response.answer, "better answer");
        assert!((response.score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn two_non_improving_rounds_stop_the_loop() {
        // initial 0.5, then 0.4, 0.3 -> stop, best stays the initial
        let brain = brain_with(vec!["worse", "worst"], vec![0.5, 0.4, 0.3]);
        let mut input = Input::new("q").with_route("raw");
        let response = improve_loop(&mut input, AgentResponse::answer("initial"), &brain)
            .await
            .unwrap();
        assert_eq!(response.answer, "initial");
        assert!((response.score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn checker_failure_scores_zero_with_description() {
        struct FailingChecker;

        #[async_trait]
        impl Checker for FailingChecker {
            fn name(&self) -> &str {
                "broken"
            }

            async fn check(
                &self,
                _input: &Input,
                _answer: &str,
                _brain: &Brain,
            ) -> Result<CheckResult, MinionError> {
                Err(MinionError::Checker("grading infra down".to_string()))
            }
        }

        let provider = Arc::new(MockProvider::with_reply("retry answer"));
        let brain = Brain::builder()
            .provider(provider)
            .registry(Arc::new(WorkerRegistry::with_defaults()))
            .checker(Arc::new(FailingChecker))
            .build()
            .unwrap();
        let mut input = Input::new("q").with_route("raw");
        let response = improve_loop(&mut input, AgentResponse::answer("candidate"), &brain)
            .await
            .unwrap();
        assert_eq!(response.score, 0.0);
    }
}
