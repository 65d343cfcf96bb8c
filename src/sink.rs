//! Hand-off of fetched features to a downstream store.
//!
//! The crate does not talk to any database itself. Storage backends
//! implement [`RecordSink`]; [`harvest`] wires a registry lookup, a fetch and
//! the insert together.

use async_trait::async_trait;
use serde_json::Value;

use crate::coordinator::{FetchCoordinator, FetchOptions};
use crate::error::Result;
use crate::registry::{EndpointConfig, EndpointRegistry};
use crate::types::{FeatureCollection, FetchReport};

/// Column holding the feature geometry as GeoJSON text
pub const GEOMETRY_COLUMN: &str = "geom";

/// Destination for projected feature rows
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert `rows` into `table`; each row lines up with `columns`.
    ///
    /// `srid` is the EPSG code of the geometry column, when there is one.
    /// Returns the number of rows written.
    async fn insert_records(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
        srid: Option<u32>,
    ) -> Result<u64>;
}

/// Features projected onto an endpoint's output columns
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRows {
    /// Column names, `geom` last when present
    pub columns: Vec<String>,
    /// One row per feature
    pub rows: Vec<Vec<Value>>,
}

impl FeatureRows {
    /// Project `collection` onto `endpoint.output_fields`.
    ///
    /// Missing properties become null. With geometry enabled a trailing
    /// `geom` column carries the GeoJSON geometry serialized as text.
    pub fn from_collection(endpoint: &EndpointConfig, collection: &FeatureCollection) -> Self {
        let mut columns = endpoint.output_fields.clone();
        if endpoint.has_geometry {
            columns.push(GEOMETRY_COLUMN.to_string());
        }

        let rows = collection
            .features
            .iter()
            .map(|feature| {
                let mut row: Vec<Value> = endpoint
                    .output_fields
                    .iter()
                    .map(|field| feature.properties.get(field).cloned().unwrap_or(Value::Null))
                    .collect();
                if endpoint.has_geometry {
                    row.push(match &feature.geometry {
                        Some(geometry) if !geometry.is_null() => {
                            Value::String(geometry.to_string())
                        }
                        _ => Value::Null,
                    });
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Table name for a registered service
pub fn table_name(region: &str, service: &str) -> String {
    format!("s_{region}_{service}")
}

/// What one harvest wrote
#[derive(Clone, Debug)]
pub struct HarvestOutcome {
    /// Destination table
    pub table: String,
    /// Rows the sink reported as written
    pub inserted: u64,
    /// The underlying fetch report
    pub report: FetchReport,
}

/// Fetch a registered service and insert its rows into `s_{region}_{service}`.
///
/// Disabled endpoints are skipped and yield `Ok(None)`. A fetch that leaves
/// windows unresolved still inserts what it got; the report says what is
/// missing.
pub async fn harvest(
    registry: &EndpointRegistry,
    coordinator: &FetchCoordinator,
    sink: &dyn RecordSink,
    region: &str,
    service: &str,
) -> Result<Option<HarvestOutcome>> {
    let endpoint = registry.get(region, service)?;
    if !endpoint.fetch_enabled {
        tracing::info!(region, service, "Skipping disabled endpoint");
        return Ok(None);
    }

    let report = coordinator
        .fetch(&endpoint, FetchOptions::default())
        .await?;
    let table = table_name(region, service);
    let rows = FeatureRows::from_collection(&endpoint, &report.collection);

    let inserted = if rows.is_empty() {
        tracing::info!(table = %table, "No rows to insert");
        0
    } else {
        sink.insert_records(
            &table,
            &rows.columns,
            rows.rows,
            endpoint.spatial_reference_id,
        )
        .await?
    };

    tracing::info!(
        table = %table,
        inserted,
        complete = report.is_complete(),
        "Harvest finished"
    );

    Ok(Some(HarvestOutcome {
        table,
        inserted,
        report,
    }))
}
