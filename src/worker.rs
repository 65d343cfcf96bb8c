//! Batch worker: fetch one window with retry, never fail the caller.

use std::time::Duration;

use crate::config::{Config, RetryConfig};
use crate::retry::{IsRetryable, random_between, retry_with_backoff};
use crate::source::FeatureSource;
use crate::types::{BatchOutcome, BatchWindow, QueryParams};

/// Retry budget and request pacing applied to every window
#[derive(Clone, Debug)]
pub struct BatchPolicy {
    /// Attempts and backoff
    pub retry: RetryConfig,
    /// Shortest pause after a non-empty page
    pub pacing_min: Duration,
    /// Longest pause after a non-empty page
    pub pacing_max: Duration,
}

impl BatchPolicy {
    /// Policy derived from the engine configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            pacing_min: config.fetch.pacing_min,
            pacing_max: config.fetch.pacing_max,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Fetch exactly one window's features.
///
/// Empty bodies, undecodable JSON, service error payloads and transport
/// failures are retried with backoff up to `policy.retry.max_attempts`
/// attempts. The result is always an outcome, never an error: a window that
/// exhausts its budget comes back `Failed` with the last failure described.
///
/// After a non-empty page the worker pauses for a random interval in
/// `[pacing_min, pacing_max]` to ease sustained load on the service. The
/// pause is not part of the retry budget.
pub async fn fetch_batch(
    source: &dyn FeatureSource,
    url: &str,
    params: &QueryParams,
    window: BatchWindow,
    policy: &BatchPolicy,
) -> BatchOutcome {
    let retried = retry_with_backoff(&policy.retry, |attempt| async move {
        let result = source.page(url, params, window).await;
        if let Err(e) = &result {
            tracing::warn!(
                offset = window.offset,
                attempt = attempt,
                error = %e,
                "Batch request failed"
            );
        }
        result
    })
    .await;

    match retried.result {
        Ok(features) => {
            tracing::debug!(
                offset = window.offset,
                features = features.len(),
                attempts = retried.attempts,
                "Batch fetched"
            );
            if !features.is_empty() {
                let pause = random_between(policy.pacing_min, policy.pacing_max);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
            BatchOutcome::success(window, retried.attempts, features)
        }
        Err(e) => {
            // Non-retryable errors stop on the first attempt and keep their own message
            let exhausted = retried.attempts >= policy.retry.max_attempts.max(1);
            let message = if e.is_retryable() && exhausted {
                format!(
                    "Max retries exceeded after {} attempts: {}",
                    retried.attempts, e
                )
            } else {
                e.to_string()
            };
            tracing::error!(
                offset = window.offset,
                size = window.size,
                attempts = retried.attempts,
                error = %message,
                "Batch failed"
            );
            BatchOutcome::failed(window, retried.attempts, message)
        }
    }
}
