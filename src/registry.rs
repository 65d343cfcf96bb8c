//! Endpoint registry: region → named feature services.
//!
//! The registry document is YAML, one key per region holding a list of
//! single-entry maps:
//!
//! ```yaml
//! oregon:
//!   - taxlots:
//!       url: https://example.com/arcgis/rest/services/Taxlots/FeatureServer/0/query
//!       description: Statewide taxlots
//!       where: "1=1"
//!       outfields: "TAXLOT,ACRES"
//!       dtypes: "VARCHAR(32),FLOAT"
//!       epsg: 2992
//!       max_records: 2000
//!       max_processes: 4
//!       geom: true
//! ```
//!
//! Lookups go through [`EndpointRegistry::get`]. Entries are handed out as
//! `Arc<EndpointConfig>`, so a [`reload`](EndpointRegistry::reload) swaps
//! the registry's snapshot without touching configs an in-flight fetch
//! already holds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::QueryParams;

/// Page size used when an entry has no `max_records`
pub const DEFAULT_MAX_RECORDS: u64 = 2000;

/// Static description of one remote feature service
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointConfig {
    /// Region the service is registered under
    pub region: String,
    /// Service name within the region
    pub name: String,
    /// Query URL
    pub url: String,
    /// Human-readable description
    pub description: String,
    /// SQL filter clause (None = every record)
    pub where_clause: Option<String>,
    /// Attribute names kept for downstream storage
    pub output_fields: Vec<String>,
    /// Column types matching `output_fields`
    pub field_types: Vec<String>,
    /// EPSG code of the service's geometry
    pub spatial_reference_id: Option<u32>,
    /// Records per request
    pub page_size: u64,
    /// Worker count hint
    pub max_concurrency: Option<usize>,
    /// False when the service is catalogued but must not be fetched
    pub fetch_enabled: bool,
    /// Whether features carry geometry worth keeping
    pub has_geometry: bool,
}

impl EndpointConfig {
    /// Minimal config for an ad-hoc URL
    pub fn for_url(region: &str, name: &str, url: &str) -> Self {
        Self {
            region: region.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            description: String::new(),
            where_clause: None,
            output_fields: Vec::new(),
            field_types: Vec::new(),
            spatial_reference_id: None,
            page_size: DEFAULT_MAX_RECORDS,
            max_concurrency: None,
            fetch_enabled: true,
            has_geometry: true,
        }
    }

    /// Data query parameters for this service
    pub fn query_params(&self) -> QueryParams {
        QueryParams {
            where_clause: self
                .where_clause
                .clone()
                .unwrap_or_else(|| "1=1".to_string()),
            return_geometry: self.has_geometry,
            ..QueryParams::default()
        }
    }
}

/// Service entry as written in the registry document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Query URL
    pub url: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// SQL filter clause
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    /// Comma-separated attribute names
    #[serde(default)]
    pub outfields: String,
    /// Comma-separated column types
    #[serde(default)]
    pub dtypes: String,
    /// EPSG code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsg: Option<u32>,
    /// Records per request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<u64>,
    /// Worker count hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
    /// Whether the service may be fetched (default: true)
    #[serde(default = "default_true")]
    pub fetch: bool,
    /// Whether the service has geometry (default: false)
    #[serde(default)]
    pub geom: bool,
}

fn default_true() -> bool {
    true
}

type RawRegistry = BTreeMap<String, Vec<BTreeMap<String, ServiceEntry>>>;
type Snapshot = BTreeMap<String, BTreeMap<String, Arc<EndpointConfig>>>;

/// Keyed, reloadable catalogue of endpoint configurations
#[derive(Debug)]
pub struct EndpointRegistry {
    path: Option<PathBuf>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl EndpointRegistry {
    /// Load the registry from a YAML file, failing fast on any problem
    pub fn load(path: &Path) -> Result<Self> {
        let snapshot = read_snapshot(path)?;
        tracing::info!(
            path = %path.display(),
            regions = snapshot.len(),
            "Endpoint registry loaded"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Build a registry from YAML text (cannot be reloaded)
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(Self {
            path: None,
            snapshot: RwLock::new(Arc::new(parse_snapshot(yaml)?)),
        })
    }

    /// Re-read the backing file and swap in the new snapshot.
    ///
    /// On error the previous snapshot stays in place.
    pub fn reload(&self) -> Result<()> {
        let path = self.path.as_deref().ok_or_else(|| Error::Config {
            message: "registry was not loaded from a file".to_string(),
            key: None,
        })?;
        let fresh = Arc::new(read_snapshot(path)?);
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = fresh;
        tracing::info!(path = %path.display(), "Endpoint registry reloaded");
        Ok(())
    }

    fn current(&self) -> Arc<Snapshot> {
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    /// Look up one endpoint
    pub fn get(&self, region: &str, service: &str) -> Result<Arc<EndpointConfig>> {
        self.current()
            .get(region)
            .and_then(|services| services.get(service))
            .cloned()
            .ok_or_else(|| Error::EndpointNotFound {
                region: region.to_string(),
                service: service.to_string(),
            })
    }

    /// Registered region names
    pub fn regions(&self) -> Vec<String> {
        self.current().keys().cloned().collect()
    }

    /// Service names and descriptions within a region
    pub fn services(&self, region: &str) -> Option<BTreeMap<String, String>> {
        self.current().get(region).map(|services| {
            services
                .iter()
                .map(|(name, endpoint)| (name.clone(), endpoint.description.clone()))
                .collect()
        })
    }

    /// Every endpoint, optionally restricted to one region
    pub fn endpoints(&self, region: Option<&str>) -> Result<Vec<Arc<EndpointConfig>>> {
        let snapshot = self.current();
        match region {
            Some(region) => snapshot
                .get(region)
                .map(|services| services.values().cloned().collect())
                .ok_or_else(|| Error::Config {
                    message: format!("unknown region: {region}"),
                    key: Some(region.to_string()),
                }),
            None => Ok(snapshot
                .values()
                .flat_map(|services| services.values().cloned())
                .collect()),
        }
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!(
            "endpoint registry not readable at {}: {}",
            path.display(),
            e
        ),
        key: None,
    })?;
    parse_snapshot(&content)
}

fn parse_snapshot(yaml: &str) -> Result<Snapshot> {
    let raw: RawRegistry = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
        message: format!("malformed endpoint registry: {e}"),
        key: None,
    })?;

    let mut snapshot = Snapshot::new();
    for (region, entries) in raw {
        let services = snapshot.entry(region.clone()).or_default();
        for entry in entries {
            for (name, service) in entry {
                let endpoint = build_endpoint(&region, &name, service)?;
                if services.insert(name.clone(), Arc::new(endpoint)).is_some() {
                    return Err(Error::config(
                        format!("duplicate service {name} in region {region}"),
                        format!("{region}.{name}"),
                    ));
                }
            }
        }
    }
    Ok(snapshot)
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_endpoint(region: &str, name: &str, entry: ServiceEntry) -> Result<EndpointConfig> {
    let key = format!("{region}.{name}");

    let parsed = url::Url::parse(&entry.url)
        .map_err(|e| Error::config(format!("invalid url {:?}: {e}", entry.url), format!("{key}.url")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::config(
            format!("url must be http or https, got {}", parsed.scheme()),
            format!("{key}.url"),
        ));
    }

    let output_fields = split_list(&entry.outfields);
    let field_types = split_list(&entry.dtypes);
    if !output_fields.is_empty()
        && !field_types.is_empty()
        && output_fields.len() != field_types.len()
    {
        return Err(Error::config(
            format!(
                "outfields ({}) and dtypes ({}) count mismatch",
                output_fields.len(),
                field_types.len()
            ),
            format!("{key}.dtypes"),
        ));
    }

    let page_size = entry.max_records.unwrap_or(DEFAULT_MAX_RECORDS);
    if page_size == 0 {
        return Err(Error::config(
            "max_records must be positive",
            format!("{key}.max_records"),
        ));
    }
    if entry.max_processes == Some(0) {
        return Err(Error::config(
            "max_processes must be positive",
            format!("{key}.max_processes"),
        ));
    }

    Ok(EndpointConfig {
        region: region.to_string(),
        name: name.to_string(),
        url: entry.url,
        description: entry.description,
        where_clause: entry.where_clause.filter(|w| !w.trim().is_empty()),
        output_fields,
        field_types,
        spatial_reference_id: entry.epsg,
        page_size,
        max_concurrency: entry.max_processes,
        fetch_enabled: entry.fetch,
        has_geometry: entry.geom,
    })
}
