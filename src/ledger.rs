//! Failure ledger: durable record of windows that could not be fetched.
//!
//! A ledger file is written once per run that ends with unresolved windows.
//! File names combine the run timestamp with a digest of the content, and
//! writes go through a temporary file plus rename, so concurrent runs never
//! clobber each other's records.
//!
//! [`FailureLedger::recover`] replays the recorded windows. It never
//! rewrites the ledger, so replaying the same file again gives the same
//! partition as long as the upstream service behaves the same.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::coordinator::{FetchCoordinator, partition_outcomes};
use crate::error::{Error, Result};
use crate::types::{BatchOutcome, BatchWindow, FeatureCollection, QueryParams};

/// One run's unresolved failures plus everything needed to replay them
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureLedgerEntry {
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Service URL the windows belong to
    pub service_url: String,
    /// Windows planned for the run
    pub total_batches: usize,
    /// Windows fetched across both waves
    pub successful_batches: usize,
    /// Windows still failing after the recovery wave
    pub persistent_failures: Vec<BatchOutcome>,
    /// Query parameters the run used
    pub params: QueryParams,
}

impl FailureLedgerEntry {
    /// Windows to replay
    pub fn windows(&self) -> Vec<BatchWindow> {
        self.persistent_failures
            .iter()
            .map(BatchOutcome::window)
            .collect()
    }
}

/// Result of replaying a ledger entry
#[derive(Clone, Debug)]
pub struct RecoveryReport {
    /// Features from windows that now succeed
    pub collection: FeatureCollection,
    /// Windows that now succeed
    pub recovered: Vec<BatchWindow>,
    /// Windows that still fail
    pub residual: Vec<BatchOutcome>,
}

impl RecoveryReport {
    /// True when nothing is left to recover
    pub fn is_complete(&self) -> bool {
        self.residual.is_empty()
    }
}

/// Reads and writes ledger files in one directory
#[derive(Clone, Debug)]
pub struct FailureLedger {
    dir: PathBuf,
}

impl FailureLedger {
    /// Ledger rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory ledger files are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `entry` and return the path of the new file
    pub fn persist(&self, entry: &FailureLedgerEntry) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| Error::ledger(&self.dir, format!("cannot create directory: {e}")))?;

        let json = serde_json::to_vec_pretty(entry)?;
        let digest = format!("{:x}", Sha256::digest(&json));
        let name = format!(
            "failed_batches_{}_{}.json",
            entry.timestamp.format("%Y%m%d_%H%M%S"),
            &digest[..12]
        );
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        std::fs::write(&tmp, &json)
            .map_err(|e| Error::ledger(&tmp, format!("cannot write: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::ledger(&path, format!("cannot move into place: {e}")))?;

        tracing::info!(
            path = %path.display(),
            failures = entry.persistent_failures.len(),
            "Failure ledger written"
        );
        Ok(path)
    }

    /// Read a ledger file back
    pub fn load(path: &Path) -> Result<FailureLedgerEntry> {
        let bytes =
            std::fs::read(path).map_err(|e| Error::ledger(path, format!("cannot read: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::ledger(path, format!("malformed: {e}")))
    }

    /// Default output file for features recovered from `path`:
    /// `failed_batches_X.json` becomes `failed_batches_X.recovered.geojson`
    /// next to it.
    pub fn recovered_output_path(path: &Path) -> PathBuf {
        path.with_extension("recovered.geojson")
    }

    /// Replay the windows recorded in `path` through `coordinator`'s workers.
    ///
    /// `concurrency` overrides the coordinator's default worker count.
    pub async fn recover(
        path: &Path,
        coordinator: &FetchCoordinator,
        concurrency: Option<usize>,
    ) -> Result<RecoveryReport> {
        let entry = Self::load(path)?;
        let windows = entry.windows();
        let concurrency = coordinator
            .config()
            .fetch
            .resolve_concurrency(concurrency, None);

        tracing::info!(
            path = %path.display(),
            url = %entry.service_url,
            windows = windows.len(),
            concurrency,
            "Replaying failure ledger"
        );

        let outcomes = coordinator
            .run_wave(&entry.service_url, &entry.params, windows, concurrency)
            .await;
        let (successes, residual) = partition_outcomes(outcomes);

        let recovered = successes.iter().map(BatchOutcome::window).collect();
        let mut collection = FeatureCollection::new();
        for outcome in successes {
            collection.absorb(outcome);
        }

        if residual.is_empty() {
            tracing::info!(features = collection.len(), "All ledger windows recovered");
        } else {
            tracing::warn!(
                features = collection.len(),
                still_failing = residual.len(),
                "Ledger recovery left windows unresolved"
            );
        }

        Ok(RecoveryReport {
            collection,
            recovered,
            residual,
        })
    }
}
