//! Retry logic with exponential backoff
//!
//! Every batch window runs through [`retry_with_backoff`]. Failures that
//! [`IsRetryable`] marks as transient are retried after a capped, jittered
//! exponential delay; the jitter keeps concurrently failing workers from
//! retrying in lockstep. The attempt count is reported alongside the final
//! result so callers can record it.
//!
//! # Example
//!
//! ```no_run
//! use arcgis_harvest::retry::{IsRetryable, retry_with_backoff};
//! use arcgis_harvest::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "transient")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let retried = retry_with_backoff(&config, |_attempt| async {
//!     Ok::<_, MyError>(())
//! }).await;
//! assert_eq!(retried.attempts, 1);
//! # }
//! ```

use crate::config::RetryConfig;
use crate::source::SourceError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::EmptyResponse
            | SourceError::Decode(_)
            | SourceError::Service { .. }
            | SourceError::MissingFeatures
            | SourceError::Http { .. }
            | SourceError::Timeout(_)
            | SourceError::Connect(_)
            | SourceError::Transport(_) => true,
            // A request that cannot be built will never succeed
            SourceError::InvalidRequest(_) => false,
        }
    }
}

/// Final result of a retried operation and the attempts it took
#[derive(Debug)]
pub struct Retried<T, E> {
    /// Success value or the last error seen
    pub result: Result<T, E>,
    /// Attempts made, including the last one
    pub attempts: u32,
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation` receives the 1-based attempt number. At most
/// `config.max_attempts` attempts are made (at least one). Non-retryable
/// errors end the loop immediately.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Retried<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt - 1);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Retried {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Delay to wait after the failed attempt with zero-based index `failed_index`
///
/// `min(initial_delay * multiplier^failed_index + jitter, max_delay)`
pub fn backoff_delay(config: &RetryConfig, failed_index: u32) -> Duration {
    let exponent = i32::try_from(failed_index).unwrap_or(i32::MAX);
    let base_secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let jittered = base_secs + random_jitter(config.max_jitter).as_secs_f64();
    let capped = jittered.min(config.max_delay.as_secs_f64());
    if capped.is_finite() && capped > 0.0 {
        Duration::from_secs_f64(capped)
    } else {
        Duration::ZERO
    }
}

/// Uniform random duration in `[0, max)`
fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(0.0..max.as_secs_f64()))
}

/// Uniform random duration in `[min, max]`, used to pace requests
pub(crate) fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..=max.as_secs_f64()))
}
