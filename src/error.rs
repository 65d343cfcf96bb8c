//! Error types for arcgis-harvest
//!
//! Only fatal conditions surface as [`Error`]: a registry that cannot be
//! loaded, an endpoint that does not exist, a count query that fails, or a
//! ledger that cannot be read. Per-batch failures never become errors; they
//! are carried as [`BatchOutcome`](crate::types::BatchOutcome) values and,
//! when they persist, recorded in the failure ledger.

use std::path::PathBuf;
use thiserror::Error;

use crate::source::SourceError;

/// Result type alias for arcgis-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for arcgis-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "oregon.taxlots.url")
        key: Option<String>,
    },

    /// No endpoint is registered under the requested region/service pair
    #[error("endpoint not found: {region}/{service}")]
    EndpointNotFound {
        /// Region the lookup was made in
        region: String,
        /// Service name that was not found
        service: String,
    },

    /// The endpoint exists but is configured with `fetch: false`
    #[error("fetching is disabled for endpoint {region}/{service}")]
    FetchDisabled {
        /// Region of the disabled endpoint
        region: String,
        /// Service name of the disabled endpoint
        service: String,
    },

    /// The total feature count could not be obtained, so no batches can be planned
    #[error("failed to get total feature count from {url}: {source}")]
    Count {
        /// Service URL the count was requested from
        url: String,
        /// Underlying request failure
        #[source]
        source: SourceError,
    },

    /// Batch planning was asked for an impossible window layout
    #[error("invalid batch plan: {0}")]
    InvalidPlan(String),

    /// Failure ledger could not be written or read back
    #[error("failure ledger error at {path}: {message}")]
    Ledger {
        /// Ledger file involved
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// A layer description could not be fetched or understood
    #[error("failed to describe service {url}: {source}")]
    Metadata {
        /// Layer URL that was described
        url: String,
        /// Underlying request failure
        #[source]
        source: SourceError,
    },

    /// A record sink rejected an insert
    #[error("record sink error: {0}")]
    Sink(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of the batch retry path (probe, metadata)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a specific key
    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Shorthand for a [`Error::Ledger`]
    pub(crate) fn ledger(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Ledger {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_includes_message() {
        let err = Error::config("url is not absolute", "oregon.taxlots.url");
        assert_eq!(err.to_string(), "configuration error: url is not absolute");
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("oregon.taxlots.url")),
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_not_found_names_both_keys() {
        let err = Error::EndpointNotFound {
            region: "oregon".to_string(),
            service: "zoning".to_string(),
        };
        assert_eq!(err.to_string(), "endpoint not found: oregon/zoning");
    }

    #[test]
    fn count_error_carries_source() {
        let err = Error::Count {
            url: "https://example.com/query".to_string(),
            source: SourceError::EmptyResponse,
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/query"));
        assert!(msg.contains("empty response"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
