//! # arcgis-harvest
//!
//! Resilient parallel batch fetching for ArcGIS-style feature services.
//!
//! ## Design Philosophy
//!
//! arcgis-harvest is designed to be:
//! - **Failure tolerant** - A bad page costs a retry, never the whole run
//! - **Resumable** - Windows that keep failing land in a ledger that can be replayed later
//! - **Library-first** - The CLI is a thin shell over the public API
//! - **Store agnostic** - Rows leave the crate through the [`RecordSink`] trait
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use arcgis_harvest::{Config, EndpointRegistry, FetchCoordinator, FetchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = EndpointRegistry::load(Path::new("endpoints.yaml"))?;
//!     let coordinator = FetchCoordinator::http(Config::default())?;
//!
//!     let endpoint = registry.get("oregon", "taxlots")?;
//!     let report = coordinator.fetch(&endpoint, FetchOptions::default()).await?;
//!
//!     println!("{} features", report.collection.len());
//!     if let Some(ledger) = &report.ledger_path {
//!         println!("unresolved windows recorded in {}", ledger.display());
//!     }
//!     report.collection.save(Path::new("out/taxlots.geojson"))?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Fetch orchestration
pub mod coordinator;
/// Error types
pub mod error;
/// Failure ledger persistence and replay
pub mod ledger;
/// Layer metadata discovery
pub mod metadata;
/// Batch window planning
pub mod planner;
/// Endpoint connectivity testing
pub mod probe;
/// Endpoint registry
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Downstream record sinks
pub mod sink;
/// Remote feature sources
pub mod source;
/// Core data types
pub mod types;
/// Single-window batch worker
pub mod worker;

// Re-export commonly used types
pub use config::{Config, FetchConfig, ProbeConfig, RetryConfig};
pub use coordinator::{FetchCoordinator, FetchOptions};
pub use error::{Error, Result};
pub use ledger::{FailureLedger, FailureLedgerEntry, RecoveryReport};
pub use metadata::{ServiceMetadata, describe_service};
pub use planner::plan_batches;
pub use probe::{ConnectivityProbe, ConnectivityReport, ProbeResult, ProbeStatus};
pub use registry::{EndpointConfig, EndpointRegistry};
pub use sink::{FeatureRows, RecordSink, harvest};
pub use source::{FeatureSource, HttpFeatureSource, SourceError};
pub use types::{
    BatchOutcome, BatchStatus, BatchWindow, Feature, FeatureCollection, FetchReport, QueryParams,
};
pub use worker::{BatchPolicy, fetch_batch};
