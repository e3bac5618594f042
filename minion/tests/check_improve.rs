//! Integration test: multimodal critic wire shape and check/improve
//! termination behavior.

mod init_logging;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use minion::{
    improve_loop, AgentResponse, Brain, CheckConfig, CheckMinion, Checker, Content, GenerateOptions,
    ImageFormat, Input, Message, MockProvider, ProviderError, ProviderResponse, Query, QueryPart,
    WorkerRegistry,
};
use tokio::sync::mpsc;

/// Provider that records the messages it was called with.
struct RecordingProvider {
    inner: MockProvider,
    seen: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl minion::Provider for RecordingProvider {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.inner.generate(messages, options).await
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<futures::stream::BoxStream<'static, Result<String, ProviderError>>, ProviderError>
    {
        self.inner.generate_stream(messages, options).await
    }

    async fn generate_stream_response(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.inner
            .generate_stream_response(messages, options, chunk_tx)
            .await
    }

    fn get_cost(&self) -> minion::CostRecord {
        self.inner.get_cost()
    }
}

/// **Scenario (S2)**: the multimodal query reaches the critic's provider as
/// one user message with ordered `[text, image, text]` parts; the grade is a
/// score in `[0, 1]` plus non-empty feedback.
#[tokio::test]
async fn multimodal_critic_preserves_part_order() {
    let provider = Arc::new(RecordingProvider {
        inner: MockProvider::with_reply("score: 0.4\nThe digits do not match the chart."),
        seen: Mutex::new(Vec::new()),
    });
    let brain = Brain::builder()
        .provider(Arc::clone(&provider) as Arc<dyn minion::Provider>)
        .build()
        .unwrap();

    let png_bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let input = Input::new(Query::Parts(vec![
        QueryPart::Text("Is this answer correct?".into()),
        QueryPart::ImageBytes {
            bytes: png_bytes,
            format: ImageFormat::Png,
        },
        QueryPart::Text("Explain briefly.".into()),
    ]));

    let checker = CheckMinion::default();
    let result = checker.check(&input, "7", &brain).await.unwrap();
    assert!((0.0..=1.0).contains(&result.score));
    assert!(!result.feedback.is_empty());

    let seen = provider.seen.lock().unwrap();
    let call = &seen[0];
    let multimodal_user = call
        .iter()
        .find(|m| matches!(m.content, Content::Parts(_)))
        .expect("one multimodal user message");
    let Content::Parts(parts) = &multimodal_user.content else {
        unreachable!()
    };
    assert_eq!(parts.len(), 3);
    assert!(matches!(parts[0], minion::ContentPart::Text { .. }));
    assert!(matches!(parts[1], minion::ContentPart::ImageData { .. }));
    assert!(matches!(parts[2], minion::ContentPart::Text { .. }));
}

struct ThresholdChecker {
    scores: Mutex<Vec<f64>>,
}

#[async_trait]
impl Checker for ThresholdChecker {
    fn name(&self) -> &str {
        "threshold"
    }

    async fn check(
        &self,
        _input: &Input,
        _answer: &str,
        _brain: &Brain,
    ) -> Result<minion::CheckResult, minion::MinionError> {
        let mut scores = self.scores.lock().unwrap();
        let score = if scores.is_empty() { 1.0 } else { scores.remove(0) };
        Ok(minion::CheckResult {
            score,
            feedback: "tighten the reasoning".to_string(),
        })
    }
}

/// **Invariant 11**: an improver round whose score is at least the previous
/// one and clears the acceptance threshold terminates the loop that round.
#[tokio::test]
async fn improve_terminates_on_accepted_improvement() {
    let provider = Arc::new(MockProvider::with_script(vec![
        ProviderResponse {
            content: "improved candidate".to_string(),
            ..Default::default()
        },
        ProviderResponse {
            content: "should never be requested".to_string(),
            ..Default::default()
        },
    ]));
    let brain = Brain::builder()
        .provider(Arc::clone(&provider) as Arc<dyn minion::Provider>)
        .registry(Arc::new(WorkerRegistry::with_defaults()))
        .config(minion::BrainConfig {
            check: CheckConfig {
                enabled: true,
                acceptance_threshold: 0.8,
                max_improve_rounds: 5,
                tolerance: 1e-6,
            },
            ..Default::default()
        })
        .checker(Arc::new(ThresholdChecker {
            scores: Mutex::new(vec![0.4, 0.85]),
        }))
        .build()
        .unwrap();

    let mut input = Input::new("q").with_route("raw");
    let response = improve_loop(&mut input, AgentResponse::answer("weak"), &brain)
        .await
        .unwrap();
    assert_eq!(response.answer, "improved candidate");
    assert!((response.score - 0.85).abs() < 1e-9);
    // exactly one improve round was needed
    assert_eq!(provider.call_count(), 1);
}
