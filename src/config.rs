//! Configuration types for arcgis-harvest
//!
//! [`Config`] holds engine tuning (retry, fetch, probe). The catalogue of
//! remote services lives in a separate document loaded by
//! [`EndpointRegistry`](crate::registry::EndpointRegistry).

use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Upper bound applied when no concurrency is configured anywhere
pub const DEFAULT_CONCURRENCY_CAP: usize = 8;

/// Main configuration for the fetch engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-batch retry and backoff behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batch sizing, concurrency, timeouts and ledger location
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Connectivity probe settings
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Config {
    /// Load a configuration from a YAML file; absent keys take their defaults
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read config file {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier must be >= 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.fetch.default_page_size == 0 {
            return Err(Error::config(
                "default_page_size must be positive",
                "fetch.default_page_size",
            ));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(Error::config(
                "max_concurrency must be positive",
                "fetch.max_concurrency",
            ));
        }
        if self.fetch.pacing_min > self.fetch.pacing_max {
            return Err(Error::config(
                "pacing_min must not exceed pacing_max",
                "fetch.pacing_min",
            ));
        }
        Ok(())
    }
}

/// Retry configuration for a single batch window
///
/// After the failed attempt with zero-based index `k` the worker sleeps
/// `min(initial_delay * backoff_multiplier^k + jitter, max_delay)`, with
/// jitter uniform in `[0, max_jitter)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per window, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound of the random jitter added to each delay (default: 1 second)
    #[serde(default = "default_max_jitter", with = "duration_serde")]
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_jitter: default_max_jitter(),
        }
    }
}

/// Fetch behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Page size used when an endpoint has no `max_records` (default: 2000)
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Worker count used when neither the call nor the endpoint sets one
    /// (None = available parallelism, capped at 8)
    #[serde(default)]
    pub default_concurrency: Option<usize>,

    /// Hard ceiling on concurrent workers for any fetch (default: 16)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for each data page request (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Timeout for the count-only query (default: 30 seconds)
    #[serde(default = "default_count_timeout", with = "duration_serde")]
    pub count_timeout: Duration,

    /// Lower bound of the pause after a non-empty page (default: 500ms)
    #[serde(default = "default_pacing_min", with = "millis_serde")]
    pub pacing_min: Duration,

    /// Upper bound of the pause after a non-empty page (default: 1000ms)
    #[serde(default = "default_pacing_max", with = "millis_serde")]
    pub pacing_max: Duration,

    /// Directory failure ledgers are written to (default: "./failed_batches")
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            default_concurrency: None,
            max_concurrency: default_max_concurrency(),
            request_timeout: default_request_timeout(),
            count_timeout: default_count_timeout(),
            pacing_min: default_pacing_min(),
            pacing_max: default_pacing_max(),
            ledger_dir: default_ledger_dir(),
        }
    }
}

impl FetchConfig {
    /// Resolve worker concurrency: call override > endpoint hint > default.
    ///
    /// The result is always in `1..=max_concurrency`.
    pub fn resolve_concurrency(
        &self,
        call_override: Option<usize>,
        endpoint_hint: Option<usize>,
    ) -> usize {
        let requested = call_override
            .or(endpoint_hint)
            .or(self.default_concurrency)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    .min(DEFAULT_CONCURRENCY_CAP)
            });
        requested.clamp(1, self.max_concurrency.max(1))
    }
}

/// Connectivity probe configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Timeout for each probe request (default: 5 seconds)
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Endpoints probed at once (default: 8)
    #[serde(default = "default_probe_concurrency")]
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: default_probe_timeout(),
            concurrency: default_probe_concurrency(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_jitter() -> Duration {
    Duration::from_secs(1)
}

fn default_page_size() -> u64 {
    2000
}

fn default_max_concurrency() -> usize {
    16
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_count_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pacing_min() -> Duration {
    Duration::from_millis(500)
}

fn default_pacing_max() -> Duration {
    Duration::from_millis(1000)
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("./failed_batches")
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_concurrency() -> usize {
    8
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
