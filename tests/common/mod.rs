//! Common test utilities for arcgis-harvest integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use arcgis_harvest::{Config, RetryConfig};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Engine config with no waiting and a small retry budget
pub fn fast_config(ledger_dir: &Path, max_attempts: u32) -> Config {
    let mut config = Config::default();
    config.retry = RetryConfig {
        max_attempts,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 2.0,
        max_jitter: Duration::ZERO,
    };
    config.fetch.pacing_min = Duration::ZERO;
    config.fetch.pacing_max = Duration::ZERO;
    config.fetch.request_timeout = Duration::from_secs(5);
    config.fetch.count_timeout = Duration::from_secs(5);
    config.fetch.ledger_dir = ledger_dir.to_path_buf();
    config
}

/// GeoJSON page holding `n` point features numbered from `offset`
pub fn page_body(offset: u64, n: u64) -> Value {
    let features: Vec<Value> = (offset..offset + n)
        .map(|id| {
            json!({
                "type": "Feature",
                "id": id,
                "properties": {"OBJECTID": id, "NAME": format!("parcel-{id}")},
                "geometry": {"type": "Point", "coordinates": [id as f64, 45.0]}
            })
        })
        .collect();
    json!({"type": "FeatureCollection", "features": features})
}

/// Answer the count-only query on `layer_path` with `count`
pub async fn mount_count(server: &MockServer, layer_path: &str, count: u64) {
    Mock::given(method("GET"))
        .and(path(layer_path))
        .and(query_param("returnCountOnly", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": count})))
        .mount(server)
        .await;
}

/// Answer the page starting at `offset` with `n` features
pub async fn mount_page(server: &MockServer, layer_path: &str, offset: u64, n: u64) {
    Mock::given(method("GET"))
        .and(path(layer_path))
        .and(query_param("resultOffset", offset.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(offset, n)))
        .mount(server)
        .await;
}

/// Answer the page starting at `offset` with a bare HTTP `status`
pub async fn mount_failing_page(server: &MockServer, layer_path: &str, offset: u64, status: u16) {
    Mock::given(method("GET"))
        .and(path(layer_path))
        .and(query_param("resultOffset", offset.to_string()))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Registry document with one enabled and one disabled service on `server`
pub fn registry_yaml(server: &MockServer) -> String {
    format!(
        r#"
oregon:
  - parcels:
      url: {uri}/arcgis/rest/services/Parcels/FeatureServer/0/query
      description: County parcels
      outfields: "OBJECTID,NAME"
      dtypes: "BIGINT,VARCHAR(64)"
      epsg: 4326
      max_records: 2
      max_processes: 2
      geom: true
  - zoning:
      url: {uri}/arcgis/rest/services/Zoning/FeatureServer/0/query
      fetch: false
"#,
        uri = server.uri()
    )
}

/// Path of the parcels layer's query endpoint
pub const PARCELS_QUERY: &str = "/arcgis/rest/services/Parcels/FeatureServer/0/query";
