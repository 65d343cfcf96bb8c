//! Remote feature service access: request classification and the HTTP source.
//!
//! [`FeatureSource`] is the seam between the batch machinery and the network.
//! [`HttpFeatureSource`] speaks the ArcGIS REST query protocol; tests swap in
//! scripted sources.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::config::FetchConfig;
use crate::error::Result;
use crate::types::{BatchWindow, Feature, QueryParams};

/// Why a single request to a feature service failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    /// The response body was empty or whitespace
    #[error("empty response body")]
    EmptyResponse,

    /// The response body was not valid JSON (or not the expected shape)
    #[error("JSON decode error: {0}")]
    Decode(String),

    /// The service answered with an `error` payload
    #[error("service error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Service {
        /// Error code reported by the service
        code: Option<i64>,
        /// Error message reported by the service
        message: String,
    },

    /// The payload parsed but carried neither `features` nor `error`
    #[error("response has no features array")]
    MissingFeatures,

    /// Non-success HTTP status
    #[error("HTTP error: status {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// The request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be built (bad URL or parameters)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(e.to_string())
        } else if e.is_connect() {
            SourceError::Connect(e.to_string())
        } else if e.is_builder() {
            SourceError::InvalidRequest(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Http {
                status: status.as_u16(),
            }
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Abstraction over feature service queries, enabling testability.
#[async_trait::async_trait]
pub trait FeatureSource: Send + Sync {
    /// Total number of features matching `params`
    async fn count(&self, url: &str, params: &QueryParams) -> std::result::Result<u64, SourceError>;

    /// Features of exactly one window
    async fn page(
        &self,
        url: &str,
        params: &QueryParams,
        window: BatchWindow,
    ) -> std::result::Result<Vec<Feature>, SourceError>;
}

/// Production [`FeatureSource`] issuing HTTP GET queries
#[derive(Clone)]
pub struct HttpFeatureSource {
    client: reqwest::Client,
    request_timeout: Duration,
    count_timeout: Duration,
}

impl HttpFeatureSource {
    /// Build a source with the timeouts from `config`
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("arcgis-harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Build a source around an existing client
    pub fn with_client(client: reqwest::Client, config: &FetchConfig) -> Self {
        Self {
            client,
            request_timeout: config.request_timeout,
            count_timeout: config.count_timeout,
        }
    }

    async fn get_json(
        &self,
        url: &str,
        pairs: &[(String, String)],
        timeout: Duration,
    ) -> std::result::Result<Value, SourceError> {
        let response = self
            .client
            .get(url)
            .query(pairs)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        decode_body(&body)
    }
}

/// Parse a response body, surfacing empty bodies and service error payloads
pub(crate) fn decode_body(body: &[u8]) -> std::result::Result<Value, SourceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(SourceError::EmptyResponse);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| SourceError::Decode(e.to_string()))?;

    if let Some(error) = value.get("error") {
        return Err(SourceError::Service {
            code: error.get("code").and_then(Value::as_i64),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        });
    }

    Ok(value)
}

/// Pull the `features` array out of a decoded page
pub(crate) fn take_features(mut value: Value) -> std::result::Result<Vec<Feature>, SourceError> {
    let features = value
        .get_mut("features")
        .map(Value::take)
        .ok_or(SourceError::MissingFeatures)?;
    serde_json::from_value(features).map_err(|e| SourceError::Decode(e.to_string()))
}

/// Pull the `count` member out of a decoded count response
pub(crate) fn take_count(value: &Value) -> std::result::Result<u64, SourceError> {
    value
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| SourceError::Decode("response has no numeric count".to_string()))
}

#[async_trait::async_trait]
impl FeatureSource for HttpFeatureSource {
    async fn count(&self, url: &str, params: &QueryParams) -> std::result::Result<u64, SourceError> {
        let value = self
            .get_json(url, &params.count_pairs(), self.count_timeout)
            .await?;
        take_count(&value)
    }

    async fn page(
        &self,
        url: &str,
        params: &QueryParams,
        window: BatchWindow,
    ) -> std::result::Result<Vec<Feature>, SourceError> {
        let value = self
            .get_json(url, &params.page_pairs(window), self.request_timeout)
            .await?;
        take_features(value)
    }
}
