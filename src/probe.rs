//! Endpoint connectivity testing.
//!
//! A probe sends one count-only query per endpoint with a short timeout and
//! records how it went. Probing is purely diagnostic: it shares nothing with
//! the fetch path beyond the endpoint configs, and one endpoint's failure
//! never stops the others from being probed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::registry::{EndpointConfig, EndpointRegistry};
use crate::source::decode_body;

/// Whether a probe got a valid structured response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// Valid JSON answer without an error payload
    Success,
    /// Anything else
    Error,
}

/// Why a probe failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    /// No answer within the timeout
    Timeout,
    /// Connection could not be established
    Connection,
    /// Non-success HTTP status
    Http,
    /// Anything else (bad body, service error payload, transport error)
    Unexpected,
}

/// Result of probing one endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Success or error
    pub status: ProbeStatus,
    /// HTTP status code, when a response arrived
    pub status_code: Option<u16>,
    /// Seconds from request start to classification
    pub response_time: f64,
    /// Failure description
    pub error: Option<String>,
    /// Probed URL
    pub url: String,
    /// Failure class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
    /// Feature count reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl ProbeResult {
    fn failed(
        url: &str,
        started: Instant,
        failure: ProbeFailure,
        status_code: Option<u16>,
        error: String,
    ) -> Self {
        Self {
            status: ProbeStatus::Error,
            status_code,
            response_time: elapsed_secs(started),
            error: Some(error),
            url: url.to_string(),
            failure: Some(failure),
            count: None,
        }
    }

    /// Whether the endpoint answered properly
    pub fn is_success(&self) -> bool {
        self.status == ProbeStatus::Success
    }
}

/// Aggregate numbers over a probe run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeSummary {
    /// Endpoints probed
    pub total_endpoints: usize,
    /// Endpoints that answered properly
    pub successful: usize,
    /// Endpoints that did not
    pub failed: usize,
    /// `successful / total_endpoints * 100`, 0 when nothing was probed
    pub success_rate: f64,
}

/// Summary plus per-endpoint detail, keyed by region then service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectivityReport {
    /// Aggregate numbers
    pub summary: ProbeSummary,
    /// Per-endpoint results
    pub results: BTreeMap<String, BTreeMap<String, ProbeResult>>,
}

impl ConnectivityReport {
    fn from_results(results: Vec<(String, String, ProbeResult)>) -> Self {
        let total_endpoints = results.len();
        let successful = results.iter().filter(|(_, _, r)| r.is_success()).count();
        let success_rate = if total_endpoints == 0 {
            0.0
        } else {
            (successful as f64 / total_endpoints as f64 * 10_000.0).round() / 100.0
        };

        let mut by_region: BTreeMap<String, BTreeMap<String, ProbeResult>> = BTreeMap::new();
        for (region, service, result) in results {
            by_region.entry(region).or_default().insert(service, result);
        }

        Self {
            summary: ProbeSummary {
                total_endpoints,
                successful,
                failed: total_endpoints - successful,
                success_rate,
            },
            results: by_region,
        }
    }
}

/// Lightweight health checker for configured endpoints
#[derive(Clone)]
pub struct ConnectivityProbe {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl ConnectivityProbe {
    /// Probe with its own HTTP client
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arcgis-harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Probe every endpoint in `registry`, optionally restricted to one region
    pub async fn test_registry(
        &self,
        registry: &EndpointRegistry,
        region: Option<&str>,
    ) -> Result<ConnectivityReport> {
        let endpoints = registry.endpoints(region)?;
        Ok(self.test(&endpoints, self.config.timeout).await)
    }

    /// Probe `endpoints` with a per-request `timeout`
    pub async fn test(
        &self,
        endpoints: &[Arc<EndpointConfig>],
        timeout: Duration,
    ) -> ConnectivityReport {
        tracing::info!(endpoints = endpoints.len(), ?timeout, "Probing endpoints");

        let results: Vec<(String, String, ProbeResult)> = stream::iter(endpoints)
            .map(|endpoint| async move {
                let result = self.probe_endpoint(endpoint, timeout).await;
                (endpoint.region.clone(), endpoint.name.clone(), result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let report = ConnectivityReport::from_results(results);
        tracing::info!(
            total = report.summary.total_endpoints,
            successful = report.summary.successful,
            failed = report.summary.failed,
            "Probe finished"
        );
        report
    }

    /// Probe a single endpoint
    pub async fn probe_endpoint(&self, endpoint: &EndpointConfig, timeout: Duration) -> ProbeResult {
        let url = endpoint.url.as_str();
        let started = Instant::now();

        let response = match self
            .client
            .get(url)
            .query(&endpoint.query_params().count_pairs())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_transport(url, started, timeout, &e),
        };

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            let result = ProbeResult::failed(
                url,
                started,
                ProbeFailure::Http,
                Some(status_code),
                format!("HTTP {status_code}"),
            );
            tracing::warn!(url = %url, status_code, "Probe got HTTP error");
            return result;
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return classify_transport(url, started, timeout, &e),
        };

        match decode_body(&body) {
            Ok(value) => {
                tracing::debug!(url = %url, "Probe succeeded");
                ProbeResult {
                    status: ProbeStatus::Success,
                    status_code: Some(status_code),
                    response_time: elapsed_secs(started),
                    error: None,
                    url: url.to_string(),
                    failure: None,
                    count: value.get("count").and_then(serde_json::Value::as_u64),
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Probe got invalid response");
                ProbeResult::failed(
                    url,
                    started,
                    ProbeFailure::Unexpected,
                    Some(status_code),
                    format!("Invalid response: {e}"),
                )
            }
        }
    }
}

fn classify_transport(
    url: &str,
    started: Instant,
    timeout: Duration,
    e: &reqwest::Error,
) -> ProbeResult {
    let (failure, message) = if e.is_timeout() {
        (
            ProbeFailure::Timeout,
            format!("Request timed out after {:.1}s", timeout.as_secs_f64()),
        )
    } else if e.is_connect() {
        (ProbeFailure::Connection, format!("Connection failed: {e}"))
    } else {
        (ProbeFailure::Unexpected, format!("Unexpected error: {e}"))
    };
    tracing::warn!(url = %url, error = %message, "Probe failed");
    ProbeResult::failed(
        url,
        started,
        failure,
        e.status().map(|s| s.as_u16()),
        message,
    )
}

fn elapsed_secs(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0
}
