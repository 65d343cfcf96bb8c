//! Layer metadata discovery.
//!
//! Reads a feature layer's self-description (`<layer>?f=json`) and turns it
//! into a ready-to-edit registry entry: field names, column types, EPSG code
//! and the page size the server allows.

use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::registry::{DEFAULT_MAX_RECORDS, ServiceEntry};
use crate::source::{SourceError, decode_body};

/// Largest page size ever suggested, whatever the server advertises
pub const MAX_RECORDS_CAP: u64 = 10_000;

const DESCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// What a layer says about itself
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceMetadata {
    /// Query URL the description was derived from
    pub url: String,
    /// Layer name, if the server reports one
    pub name: Option<String>,
    /// Attribute names in server order
    pub fields: Vec<String>,
    /// Column types matching `fields`
    pub dtypes: Vec<String>,
    /// EPSG code of the layer geometry
    pub epsg: Option<u32>,
    /// Page size to request
    pub max_records: u64,
}

impl ServiceMetadata {
    /// Registry entry for this layer, enabled and with geometry
    pub fn to_endpoint_entry(&self, description: impl Into<String>) -> ServiceEntry {
        ServiceEntry {
            url: self.url.clone(),
            description: description.into(),
            where_clause: None,
            outfields: self.fields.join(","),
            dtypes: self.dtypes.join(","),
            epsg: self.epsg,
            max_records: Some(self.max_records),
            max_processes: None,
            fetch: true,
            geom: true,
        }
    }

    /// Registry-friendly name derived from the URL
    pub fn suggested_name(&self) -> String {
        let from_url = self
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .find(|segment| {
                !segment.is_empty()
                    && !segment.eq_ignore_ascii_case("query")
                    && !segment.chars().all(|c| c.is_ascii_digit())
                    && !segment.eq_ignore_ascii_case("FeatureServer")
                    && !segment.eq_ignore_ascii_case("MapServer")
            });
        from_url
            .or(self.name.as_deref())
            .unwrap_or("service")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }
}

/// Fetch and interpret the description of the layer behind `url`.
///
/// `url` may be the layer's `/query` endpoint; the suffix is dropped before
/// asking for the description.
pub async fn describe_service(client: &reqwest::Client, url: &str) -> Result<ServiceMetadata> {
    let layer_url = url
        .trim_end_matches('/')
        .strip_suffix("/query")
        .unwrap_or_else(|| url.trim_end_matches('/'));

    let wrap = |source: SourceError| Error::Metadata {
        url: url.to_string(),
        source,
    };

    let response = client
        .get(layer_url)
        .query(&[("f", "json")])
        .timeout(DESCRIBE_TIMEOUT)
        .send()
        .await
        .map_err(|e| wrap(e.into()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(wrap(SourceError::Http {
            status: status.as_u16(),
        }));
    }
    let body = response.bytes().await.map_err(|e| wrap(e.into()))?;
    let info = decode_body(&body).map_err(wrap)?;

    let (fields, dtypes): (Vec<String>, Vec<String>) = info
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| fields.iter().map(field_column).unzip())
        .unwrap_or_default();

    let metadata = ServiceMetadata {
        url: url.to_string(),
        name: info.get("name").and_then(Value::as_str).map(str::to_string),
        fields,
        dtypes,
        epsg: spatial_reference(&info),
        max_records: max_records(&info),
    };
    tracing::debug!(
        url = %url,
        fields = metadata.fields.len(),
        epsg = ?metadata.epsg,
        max_records = metadata.max_records,
        "Service described"
    );
    Ok(metadata)
}

fn field_column(field: &Value) -> (String, String) {
    let name = field
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let esri_type = field.get("type").and_then(Value::as_str).unwrap_or_default();
    let length = field.get("length").and_then(Value::as_u64);
    (name, sql_type(esri_type, length))
}

/// Column type for an esri field type; VARCHAR types honour `length`
pub fn sql_type(esri_type: &str, length: Option<u64>) -> String {
    let base = match esri_type {
        "esriFieldTypeSmallInteger" => "SMALLINT",
        "esriFieldTypeInteger" => "INTEGER",
        "esriFieldTypeDouble" | "esriFieldTypeSingle" => "FLOAT",
        "esriFieldTypeDate" => "DATE",
        "esriFieldTypeOID" => "BIGINT",
        "esriFieldTypeGeometry" => "GEOMETRY",
        "esriFieldTypeBlob" | "esriFieldTypeRaster" => "BYTEA",
        "esriFieldTypeGUID" | "esriFieldTypeGlobalID" => "VARCHAR(38)",
        "esriFieldTypeXML" => "TEXT",
        _ => "VARCHAR(255)",
    };
    match length {
        Some(length) if base.starts_with("VARCHAR") => format!("VARCHAR({length})"),
        _ => base.to_string(),
    }
}

fn spatial_reference(info: &Value) -> Option<u32> {
    let reference = info
        .get("spatialReference")
        .or_else(|| info.pointer("/extent/spatialReference"))?;
    ["wkid", "latestWkid"].iter().find_map(|key| {
        reference
            .get(*key)
            .and_then(Value::as_u64)
            .filter(|wkid| *wkid > 0)
            .and_then(|wkid| u32::try_from(wkid).ok())
    })
}

fn max_records(info: &Value) -> u64 {
    info.get("maxRecordCount")
        .and_then(Value::as_u64)
        .filter(|n| *n > 0)
        .or_else(|| {
            info.pointer("/advancedQueryCapabilities/maxRecordCount")
                .and_then(Value::as_u64)
                .filter(|n| *n > 0)
        })
        .map(|n| n.min(MAX_RECORDS_CAP))
        .unwrap_or(DEFAULT_MAX_RECORDS)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn esri_types_map_to_columns() {
        assert_eq!(sql_type("esriFieldTypeOID", None), "BIGINT");
        assert_eq!(sql_type("esriFieldTypeString", Some(50)), "VARCHAR(50)");
        assert_eq!(sql_type("esriFieldTypeString", None), "VARCHAR(255)");
        assert_eq!(sql_type("esriFieldTypeGlobalID", None), "VARCHAR(38)");
        assert_eq!(sql_type("esriFieldTypeGlobalID", Some(38)), "VARCHAR(38)");
        assert_eq!(sql_type("esriFieldTypeDouble", Some(8)), "FLOAT");
        assert_eq!(sql_type("esriFieldTypeRaster", None), "BYTEA");
        assert_eq!(sql_type("somethingNew", None), "VARCHAR(255)");
    }

    #[test]
    fn max_records_falls_back_and_caps() {
        assert_eq!(max_records(&json!({"maxRecordCount": 1000})), 1000);
        assert_eq!(max_records(&json!({"maxRecordCount": 50000})), MAX_RECORDS_CAP);
        assert_eq!(
            max_records(&json!({"advancedQueryCapabilities": {"maxRecordCount": 4000}})),
            4000
        );
        assert_eq!(max_records(&json!({})), DEFAULT_MAX_RECORDS);
    }

    #[test]
    fn epsg_prefers_wkid() {
        assert_eq!(
            spatial_reference(&json!({"spatialReference": {"wkid": 102100, "latestWkid": 3857}})),
            Some(102100)
        );
        assert_eq!(
            spatial_reference(&json!({"extent": {"spatialReference": {"latestWkid": 2992}}})),
            Some(2992)
        );
        assert_eq!(spatial_reference(&json!({})), None);
    }

    #[tokio::test]
    async fn describes_layer_behind_query_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/arcgis/rest/services/Taxlots/FeatureServer/0"))
            .and(query_param("f", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Taxlots",
                "maxRecordCount": 2000,
                "extent": {"spatialReference": {"wkid": 2992}},
                "fields": [
                    {"name": "OBJECTID", "type": "esriFieldTypeOID"},
                    {"name": "TAXLOT", "type": "esriFieldTypeString", "length": 32},
                    {"name": "ACRES", "type": "esriFieldTypeDouble"}
                ]
            })))
            .mount(&server)
            .await;
        let url = format!(
            "{}/arcgis/rest/services/Taxlots/FeatureServer/0/query",
            server.uri()
        );

        let metadata = describe_service(&reqwest::Client::new(), &url)
            .await
            .unwrap();

        assert_eq!(metadata.fields, vec!["OBJECTID", "TAXLOT", "ACRES"]);
        assert_eq!(metadata.dtypes, vec!["BIGINT", "VARCHAR(32)", "FLOAT"]);
        assert_eq!(metadata.epsg, Some(2992));
        assert_eq!(metadata.max_records, 2000);
        assert_eq!(metadata.suggested_name(), "taxlots");

        let entry = metadata.to_endpoint_entry("Statewide taxlots");
        assert_eq!(entry.url, url);
        assert_eq!(entry.outfields, "OBJECTID,TAXLOT,ACRES");
        assert_eq!(entry.dtypes, "BIGINT,VARCHAR(32),FLOAT");
        assert_eq!(entry.epsg, Some(2992));
        assert_eq!(entry.max_records, Some(2000));
        assert!(entry.fetch);
        assert!(entry.geom);
    }

    #[tokio::test]
    async fn service_error_payload_is_metadata_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": {"code": 400, "message": "Invalid URL"}})),
            )
            .mount(&server)
            .await;

        let err = describe_service(&reqwest::Client::new(), &format!("{}/bad/0", server.uri()))
            .await
            .unwrap_err();

        match err {
            Error::Metadata { source, .. } => assert!(matches!(
                source,
                SourceError::Service {
                    code: Some(400),
                    ..
                }
            )),
            other => panic!("expected Metadata, got {other:?}"),
        }
    }
}
