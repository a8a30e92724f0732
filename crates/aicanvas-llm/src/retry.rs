use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use aicanvas_core::config::EngineConfig;
use aicanvas_core::error::Result;
use aicanvas_core::traits::{BackendClient, FragmentStream};
use aicanvas_core::types::NodeRequest;

/// How many times, and how patiently, to repeat a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let ms = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(policy.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// A backend client that repeats calls failing with a retryable error.
pub struct RetryingClient {
    inner: Arc<dyn BackendClient>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn BackendClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl BackendClient for RetryingClient {
    fn send(&self, request: NodeRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match self.inner.send(request.clone()).await {
                    Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                        let backoff = calculate_backoff(attempt, &self.policy);
                        warn!(
                            node_id = %request.node_id,
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Backend call failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        })
    }

    fn send_stream(&self, request: NodeRequest) -> BoxFuture<'_, Result<FragmentStream>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match self.inner.send_stream(request.clone()).await {
                    Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                        let backoff = calculate_backoff(attempt, &self.policy);
                        warn!(
                            node_id = %request.node_id,
                            attempt = attempt + 1,
                            error = %e,
                            "Opening backend stream failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    other => return other,
                }
            }
        })
    }
}
