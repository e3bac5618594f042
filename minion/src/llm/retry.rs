//! Retry wrapper: capped exponential backoff with jitter for transient
//! provider failures. Non-transient errors propagate immediately.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::warn;

use crate::message::Message;

use super::{CostRecord, GenerateOptions, Provider, ProviderError, ProviderResponse};

/// Backoff policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the per-retry delay.
    pub max_delay: Duration,
    /// Exponential multiplier per retry.
    pub backoff_multiplier: f64,
    /// Jitter factor in [0, 1]; the delay varies by ±jitter/2 of itself.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64;
        let exponential = base * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);
        let jitter_range = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = rand::random::<f64>() * jitter_range - jitter_range / 2.0;
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Provider wrapper applying [`RetryPolicy`] to transient failures only.
///
/// Streams are retried only at establishment; once chunks have been yielded,
/// a failure mid-stream propagates (the stream is not restartable).
pub struct WithRetry<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Provider> WithRetry<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider failure during {what}, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<P: Provider> Provider for WithRetry<P> {
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        self.run("generate", || self.inner.generate(messages, options))
            .await
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError> {
        self.run("generate_stream", || {
            self.inner.generate_stream(messages, options)
        })
        .await
    }

    async fn generate_stream_response(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ProviderResponse, ProviderError> {
        // Chunks already forwarded before a transient failure would duplicate
        // on retry, so retry only while nothing has been sent.
        let mut attempt = 0u32;
        loop {
            let sent = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
            let tx = chunk_tx.as_ref().map(|tx| {
                let (wrapped_tx, mut rx) = mpsc::channel::<String>(64);
                let out = tx.clone();
                let sent = std::sync::Arc::clone(&sent);
                tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        sent.store(true, std::sync::atomic::Ordering::SeqCst);
                        if out.send(chunk).await.is_err() {
                            break;
                        }
                    }
                });
                wrapped_tx
            });
            match self
                .inner
                .generate_stream_response(messages, options, tx)
                .await
            {
                Ok(r) => return Ok(r),
                Err(e)
                    if e.is_transient()
                        && attempt < self.policy.max_retries
                        && !sent.load(std::sync::atomic::Ordering::SeqCst) =>
                {
                    let delay = self.policy.delay_for(attempt);
                    warn!(error = %e, attempt = attempt + 1, "transient stream failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_cost(&self) -> CostRecord {
        self.inner.get_cost()
    }
}
