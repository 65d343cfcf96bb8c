//! Core value types shared by the planner, workers, coordinator and ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// One page of a feature service's result set
///
/// `size` is always the requested page size, even for the final window; the
/// remote service decides how many features actually come back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchWindow {
    /// Value sent as `resultOffset`
    pub offset: u64,
    /// Value sent as `resultRecordCount`
    pub size: u64,
}

impl BatchWindow {
    /// Create a window
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }
}

/// Terminal status of one window's attempt loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// A features payload was received
    Success,
    /// The attempt budget ran out (or a non-retryable failure occurred)
    Failed,
}

/// Result of running one window through a worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Window offset
    pub offset: u64,
    /// Window size as requested
    pub size: u64,
    /// Attempts spent, including the successful one
    pub attempts: u32,
    /// Success or failure
    pub status: BatchStatus,
    /// Description of the last failure (failed outcomes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Features returned (empty for failures)
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl BatchOutcome {
    /// The window this outcome belongs to
    pub fn window(&self) -> BatchWindow {
        BatchWindow::new(self.offset, self.size)
    }

    /// Whether the window was fetched
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    pub(crate) fn success(window: BatchWindow, attempts: u32, features: Vec<Feature>) -> Self {
        Self {
            offset: window.offset,
            size: window.size,
            attempts,
            status: BatchStatus::Success,
            error: None,
            features,
        }
    }

    pub(crate) fn failed(window: BatchWindow, attempts: u32, error: String) -> Self {
        Self {
            offset: window.offset,
            size: window.size,
            attempts,
            status: BatchStatus::Failed,
            error: Some(error),
            features: Vec::new(),
        }
    }
}

/// A GeoJSON feature, forwarded without interpretation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Attribute values (`"properties": null` decodes as empty)
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Geometry, if the service returned one
    #[serde(default)]
    pub geometry: Option<serde_json::Value>,
    /// Any other members (`type`, `id`, ...) preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty_map<'de, D>(
    deserializer: D,
) -> std::result::Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// Accumulated result of a fetch run; order is not significant
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// Always "FeatureCollection"
    #[serde(rename = "type", default = "feature_collection_type")]
    pub kind: String,
    /// Union of all successful outcomes' features
    pub features: Vec<Feature>,
}

fn feature_collection_type() -> String {
    "FeatureCollection".to_string()
}

impl FeatureCollection {
    /// An empty collection
    pub fn new() -> Self {
        Self {
            kind: feature_collection_type(),
            features: Vec::new(),
        }
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the collection holds no features
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Append the features of a successful outcome
    pub fn absorb(&mut self, outcome: BatchOutcome) {
        self.features.extend(outcome.features);
    }

    /// Write the collection as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), features = self.len(), "Feature collection saved");
        Ok(())
    }

    /// Read a collection previously written with [`save`](Self::save)
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Query parameters sent with every data page request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// SQL filter clause
    #[serde(rename = "where")]
    pub where_clause: String,
    /// Output fields (`*` for all)
    #[serde(rename = "outFields")]
    pub out_fields: String,
    /// Whether geometry is requested
    #[serde(rename = "returnGeometry")]
    pub return_geometry: bool,
    /// Response format
    #[serde(rename = "f")]
    pub format: String,
    /// Additional parameters forwarded verbatim
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            where_clause: "1=1".to_string(),
            out_fields: "*".to_string(),
            return_geometry: true,
            format: "geojson".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl QueryParams {
    /// Pairs for one data page covering `window`
    pub fn page_pairs(&self, window: BatchWindow) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("where".to_string(), self.where_clause.clone()),
            ("outFields".to_string(), self.out_fields.clone()),
            ("returnGeometry".to_string(), self.return_geometry.to_string()),
            ("f".to_string(), self.format.clone()),
        ];
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs.push(("resultOffset".to_string(), window.offset.to_string()));
        pairs.push(("resultRecordCount".to_string(), window.size.to_string()));
        pairs
    }

    /// Pairs for the count-only query (same filter, JSON format)
    pub fn count_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("where".to_string(), self.where_clause.clone()),
            ("returnCountOnly".to_string(), "true".to_string()),
            ("f".to_string(), "json".to_string()),
        ];
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

/// Outcome of a complete fetch run
///
/// A run with unresolved batches is a degraded success: the collection holds
/// everything that was fetched and `ledger_path` points at the record of
/// what is missing.
#[derive(Clone, Debug)]
pub struct FetchReport {
    /// Service URL
    pub url: String,
    /// Count reported by the service before planning
    pub total_count: u64,
    /// Windows planned
    pub total_batches: usize,
    /// Windows fetched across both waves
    pub successful_batches: usize,
    /// Merged features
    pub collection: FeatureCollection,
    /// Windows still failing after the recovery wave
    pub unresolved: Vec<BatchOutcome>,
    /// Ledger file recording `unresolved`, if one was written
    pub ledger_path: Option<PathBuf>,
}

impl FetchReport {
    /// True when every planned window was fetched
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Windows that were never fetched
    pub fn missing_batches(&self) -> Vec<BatchWindow> {
        self.unresolved.iter().map(BatchOutcome::window).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_pairs_carry_window_and_extras() {
        let mut params = QueryParams::default();
        params.extra.insert("outSR".to_string(), "4326".to_string());

        let pairs = params.page_pairs(BatchWindow::new(4000, 2000));
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("where"), Some("1=1"));
        assert_eq!(get("outFields"), Some("*"));
        assert_eq!(get("returnGeometry"), Some("true"));
        assert_eq!(get("f"), Some("geojson"));
        assert_eq!(get("outSR"), Some("4326"));
        assert_eq!(get("resultOffset"), Some("4000"));
        assert_eq!(get("resultRecordCount"), Some("2000"));
    }

    #[test]
    fn count_pairs_request_json_count_only() {
        let params = QueryParams {
            where_clause: "COUNTY = 'LANE'".to_string(),
            ..QueryParams::default()
        };
        let pairs = params.count_pairs();
        assert!(pairs.contains(&("where".to_string(), "COUNTY = 'LANE'".to_string())));
        assert!(pairs.contains(&("returnCountOnly".to_string(), "true".to_string())));
        assert!(pairs.contains(&("f".to_string(), "json".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "resultOffset"));
    }

    #[test]
    fn params_serialize_with_wire_names() {
        let value = serde_json::to_value(QueryParams::default()).unwrap();
        assert_eq!(
            value,
            json!({"where": "1=1", "outFields": "*", "returnGeometry": true, "f": "geojson"})
        );
    }

    #[test]
    fn feature_preserves_unknown_members() {
        let raw = json!({
            "type": "Feature",
            "id": 17,
            "properties": {"TAXLOT": "A1"},
            "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}
        });
        let feature: Feature = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(feature.properties["TAXLOT"], json!("A1"));
        assert_eq!(feature.extra["id"], json!(17));
        assert_eq!(serde_json::to_value(&feature).unwrap(), raw);
    }

    #[test]
    fn null_properties_decode_as_empty() {
        let feature: Feature = serde_json::from_value(json!({
            "type": "Feature",
            "properties": null,
            "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}
        }))
        .unwrap();
        assert!(feature.properties.is_empty());
        assert_eq!(feature.extra["type"], json!("Feature"));
        assert!(feature.geometry.is_some());
    }

    #[test]
    fn collection_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.geojson");
        let mut collection = FeatureCollection::new();
        collection.absorb(BatchOutcome::success(
            BatchWindow::new(0, 10),
            1,
            vec![Feature::default(), Feature::default()],
        ));

        collection.save(&path).unwrap();
        let loaded = FeatureCollection::load(&path).unwrap();

        assert_eq!(loaded.kind, "FeatureCollection");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn failed_outcome_serializes_error_and_no_features() {
        let outcome = BatchOutcome::failed(BatchWindow::new(2000, 2000), 5, "boom".to_string());
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], json!("failed"));
        assert_eq!(value["error"], json!("boom"));
        assert_eq!(value["features"], json!([]));
        assert_eq!(outcome.window(), BatchWindow::new(2000, 2000));
    }
}
