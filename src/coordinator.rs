//! Fetch coordination: count, plan, fan out, recover, record.
//!
//! A fetch runs as two waves over a bounded pool of workers. The first wave
//! covers every planned window; the second re-runs only the windows that
//! failed, each with a fresh retry budget. Anything still failing is written
//! to the failure ledger and the run returns what it has, since a long fetch
//! should not lose hours of downloaded pages over one bad window.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{FailureLedger, FailureLedgerEntry};
use crate::planner::plan_batches;
use crate::registry::EndpointConfig;
use crate::source::{FeatureSource, HttpFeatureSource};
use crate::types::{BatchOutcome, BatchWindow, FeatureCollection, FetchReport, QueryParams};
use crate::worker::{BatchPolicy, fetch_batch};

/// Per-call overrides for a fetch
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Worker count; wins over the endpoint hint and the default
    pub concurrency: Option<usize>,
    /// Page size; wins over the endpoint's `max_records`
    pub page_size: Option<u64>,
}

/// Drives complete fetches against one [`FeatureSource`]
#[derive(Clone)]
pub struct FetchCoordinator {
    source: Arc<dyn FeatureSource>,
    config: Arc<Config>,
    policy: BatchPolicy,
    ledger: FailureLedger,
}

impl FetchCoordinator {
    /// Coordinator over an arbitrary source
    pub fn new(source: Arc<dyn FeatureSource>, config: Config) -> Self {
        let policy = BatchPolicy::from_config(&config);
        let ledger = FailureLedger::new(config.fetch.ledger_dir.clone());
        Self {
            source,
            config: Arc::new(config),
            policy,
            ledger,
        }
    }

    /// Coordinator over HTTP with the configured timeouts
    pub fn http(config: Config) -> Result<Self> {
        let source = HttpFeatureSource::new(&config.fetch)?;
        Ok(Self::new(Arc::new(source), config))
    }

    /// Replace the batch policy derived from the configuration
    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ledger unresolved windows are written to
    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    /// Fetch every feature of a registered endpoint.
    ///
    /// Fails only when the endpoint is disabled or its count cannot be
    /// obtained. Unresolved windows are reported in the returned
    /// [`FetchReport`], not as an error.
    pub async fn fetch(
        &self,
        endpoint: &EndpointConfig,
        options: FetchOptions,
    ) -> Result<FetchReport> {
        if !endpoint.fetch_enabled {
            return Err(Error::FetchDisabled {
                region: endpoint.region.clone(),
                service: endpoint.name.clone(),
            });
        }

        let page_size = options.page_size.unwrap_or(endpoint.page_size);
        let concurrency = self
            .config
            .fetch
            .resolve_concurrency(options.concurrency, endpoint.max_concurrency);

        tracing::info!(
            region = %endpoint.region,
            service = %endpoint.name,
            url = %endpoint.url,
            "Fetching endpoint"
        );

        self.run(&endpoint.url, endpoint.query_params(), page_size, concurrency)
            .await
    }

    /// Fetch with caller-supplied query parameters.
    pub async fn fetch_with_params(
        &self,
        url: &str,
        params: QueryParams,
        options: FetchOptions,
    ) -> Result<FetchReport> {
        let page_size = options
            .page_size
            .unwrap_or(self.config.fetch.default_page_size);
        let concurrency = self
            .config
            .fetch
            .resolve_concurrency(options.concurrency, None);
        self.run(url, params, page_size, concurrency).await
    }

    async fn run(
        &self,
        url: &str,
        params: QueryParams,
        page_size: u64,
        concurrency: usize,
    ) -> Result<FetchReport> {
        // Phase 1: total count; without it there is nothing to plan
        let total_count = self
            .source
            .count(url, &params)
            .await
            .map_err(|source| Error::Count {
                url: url.to_string(),
                source,
            })?;

        // Phase 2: plan
        let windows = plan_batches(total_count, page_size)?;
        let total_batches = windows.len();
        tracing::info!(
            url = %url,
            total_count,
            page_size,
            batches = total_batches,
            concurrency,
            "Planned batches"
        );

        // Phase 3: initial wave
        let outcomes = self.run_wave(url, &params, windows, concurrency).await;
        let (successes, failures) = partition_outcomes(outcomes);
        let mut successful_batches = successes.len();
        let mut collection = FeatureCollection::new();
        for outcome in successes {
            collection.absorb(outcome);
        }

        // Phase 4: one automatic recovery wave over the failed windows
        let mut unresolved = failures;
        if !unresolved.is_empty() {
            tracing::warn!(
                url = %url,
                failed = unresolved.len(),
                "Retrying failed batches"
            );
            let retry_windows = unresolved.iter().map(BatchOutcome::window).collect();
            let outcomes = self
                .run_wave(url, &params, retry_windows, concurrency)
                .await;
            let (recovered, still_failing) = partition_outcomes(outcomes);
            tracing::info!(
                recovered = recovered.len(),
                still_failing = still_failing.len(),
                "Recovery wave finished"
            );
            successful_batches += recovered.len();
            for outcome in recovered {
                collection.absorb(outcome);
            }
            unresolved = still_failing;
        }

        // Phase 5: record anything left over
        let ledger_path = if unresolved.is_empty() {
            None
        } else {
            self.record_failures(url, &params, total_batches, successful_batches, &unresolved)
        };

        if collection.len() as u64 != total_count {
            tracing::warn!(
                url = %url,
                expected = total_count,
                fetched = collection.len(),
                "Fetched feature count differs from reported total"
            );
        }
        tracing::info!(
            url = %url,
            features = collection.len(),
            successful_batches,
            total_batches,
            "Fetch finished"
        );

        Ok(FetchReport {
            url: url.to_string(),
            total_count,
            total_batches,
            successful_batches,
            collection,
            unresolved,
            ledger_path,
        })
    }

    /// Run one wave of windows through the worker pool and wait for all of them.
    ///
    /// Outcomes come back in completion order.
    pub async fn run_wave(
        &self,
        url: &str,
        params: &QueryParams,
        windows: Vec<BatchWindow>,
        concurrency: usize,
    ) -> Vec<BatchOutcome> {
        let source = self.source.as_ref();
        let policy = &self.policy;
        stream::iter(windows)
            .map(|window| fetch_batch(source, url, params, window, policy))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    fn record_failures(
        &self,
        url: &str,
        params: &QueryParams,
        total_batches: usize,
        successful_batches: usize,
        unresolved: &[BatchOutcome],
    ) -> Option<std::path::PathBuf> {
        let entry = FailureLedgerEntry {
            timestamp: chrono::Utc::now(),
            service_url: url.to_string(),
            total_batches,
            successful_batches,
            persistent_failures: unresolved.to_vec(),
            params: params.clone(),
        };
        match self.ledger.persist(&entry) {
            Ok(path) => {
                tracing::warn!(
                    url = %url,
                    unresolved = unresolved.len(),
                    ledger = %path.display(),
                    "Batches failed after recovery, recorded for manual recovery"
                );
                Some(path)
            }
            Err(e) => {
                tracing::error!(
                    url = %url,
                    unresolved = unresolved.len(),
                    error = %e,
                    "Failed to write failure ledger"
                );
                None
            }
        }
    }
}

/// Split outcomes into (successes, failures)
pub(crate) fn partition_outcomes(
    outcomes: Vec<BatchOutcome>,
) -> (Vec<BatchOutcome>, Vec<BatchOutcome>) {
    outcomes.into_iter().partition(BatchOutcome::is_success)
}
