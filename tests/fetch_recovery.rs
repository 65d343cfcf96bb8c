//! End-to-end fetch, failure ledger and recovery against a mock feature service
//!
//! These tests drive the public API over real HTTP: registry lookup, count,
//! batch fan-out, the automatic recovery wave, ledger persistence and a later
//! manual replay of the ledger.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Mutex};

use arcgis_harvest::{
    BatchWindow, ConnectivityProbe, EndpointRegistry, Error, FailureLedger, FeatureCollection,
    FetchCoordinator, FetchOptions, ProbeConfig, RecordSink, harvest,
};
use common::{
    PARCELS_QUERY, fast_config, mount_count, mount_failing_page, mount_page, registry_yaml,
};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn complete_fetch_merges_every_page() {
    let server = MockServer::start().await;
    mount_count(&server, PARCELS_QUERY, 5).await;
    mount_page(&server, PARCELS_QUERY, 0, 2).await;
    mount_page(&server, PARCELS_QUERY, 2, 2).await;
    mount_page(&server, PARCELS_QUERY, 4, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let registry = EndpointRegistry::from_yaml_str(&registry_yaml(&server)).unwrap();
    let coordinator = FetchCoordinator::http(fast_config(&dir.path().join("ledger"), 3)).unwrap();
    let endpoint = registry.get("oregon", "parcels").unwrap();

    let report = coordinator
        .fetch(&endpoint, FetchOptions::default())
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.total_count, 5);
    assert_eq!(report.total_batches, 3);
    assert_eq!(report.successful_batches, 3);
    assert!(report.ledger_path.is_none());

    let mut ids: Vec<u64> = report
        .collection
        .features
        .iter()
        .map(|f| f.properties["OBJECTID"].as_u64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert!(!dir.path().join("ledger").exists());

    let output = dir.path().join("out").join("parcels.geojson");
    report.collection.save(&output).unwrap();
    let reloaded = FeatureCollection::load(&output).unwrap();
    assert_eq!(reloaded, report.collection);
    assert_eq!(reloaded.features[0].extra["type"], json!("Feature"));
}

#[tokio::test]
async fn persistent_failure_is_ledgered_then_recovered() {
    let server = MockServer::start().await;
    mount_count(&server, PARCELS_QUERY, 5).await;
    mount_page(&server, PARCELS_QUERY, 0, 2).await;
    mount_failing_page(&server, PARCELS_QUERY, 2, 503).await;
    mount_page(&server, PARCELS_QUERY, 4, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let registry = EndpointRegistry::from_yaml_str(&registry_yaml(&server)).unwrap();
    let coordinator = FetchCoordinator::http(fast_config(dir.path(), 2)).unwrap();
    let endpoint = registry.get("oregon", "parcels").unwrap();

    let report = coordinator
        .fetch(&endpoint, FetchOptions::default())
        .await
        .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.collection.len(), 3);
    assert_eq!(report.successful_batches, 2);
    assert_eq!(report.missing_batches(), vec![BatchWindow::new(2, 2)]);
    let error = report.unresolved[0].error.clone().unwrap();
    assert!(error.contains("503"), "{error}");

    // two attempts in the first wave, two more in the recovery wave
    let failing_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.query().unwrap_or_default().contains("resultOffset=2"))
        .count();
    assert_eq!(failing_requests, 4);

    let ledger_path = report.ledger_path.clone().unwrap();
    assert!(ledger_path.starts_with(dir.path()));
    let entry = FailureLedger::load(&ledger_path).unwrap();
    assert_eq!(entry.total_batches, 3);
    assert_eq!(entry.successful_batches, 2);
    assert_eq!(entry.windows(), vec![BatchWindow::new(2, 2)]);
    assert!(entry.service_url.ends_with(PARCELS_QUERY));

    // the service comes back; replay the ledger
    server.reset().await;
    mount_page(&server, PARCELS_QUERY, 2, 2).await;

    let recovery = FailureLedger::recover(&ledger_path, &coordinator, Some(1))
        .await
        .unwrap();

    assert!(recovery.is_complete());
    assert_eq!(recovery.recovered, vec![BatchWindow::new(2, 2)]);
    assert_eq!(recovery.collection.len(), 2);
    assert_eq!(FailureLedger::load(&ledger_path).unwrap(), entry);
}

#[tokio::test]
async fn count_failure_aborts_before_any_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PARCELS_QUERY))
        .and(query_param("returnCountOnly", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"error": {"code": 500, "message": "Unable to complete operation."}})),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let registry = EndpointRegistry::from_yaml_str(&registry_yaml(&server)).unwrap();
    let coordinator = FetchCoordinator::http(fast_config(dir.path(), 2)).unwrap();
    let endpoint = registry.get("oregon", "parcels").unwrap();

    let err = coordinator
        .fetch(&endpoint, FetchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Count { .. }), "{err:?}");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[derive(Default)]
struct CollectingSink {
    rows: Mutex<Vec<(String, Vec<String>, Vec<Vec<Value>>)>>,
}

#[async_trait::async_trait]
impl RecordSink for CollectingSink {
    async fn insert_records(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
        _srid: Option<u32>,
    ) -> arcgis_harvest::Result<u64> {
        let n = rows.len() as u64;
        self.rows
            .lock()
            .unwrap()
            .push((table.to_string(), columns.to_vec(), rows));
        Ok(n)
    }
}

#[tokio::test]
async fn harvest_projects_rows_for_the_sink() {
    let server = MockServer::start().await;
    mount_count(&server, PARCELS_QUERY, 3).await;
    mount_page(&server, PARCELS_QUERY, 0, 2).await;
    mount_page(&server, PARCELS_QUERY, 2, 1).await;

    let dir = tempfile::tempdir().unwrap();
    let registry = EndpointRegistry::from_yaml_str(&registry_yaml(&server)).unwrap();
    let coordinator = FetchCoordinator::http(fast_config(dir.path(), 2)).unwrap();
    let sink = CollectingSink::default();

    let outcome = harvest(&registry, &coordinator, &sink, "oregon", "parcels")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.table, "s_oregon_parcels");
    assert_eq!(outcome.inserted, 3);
    let rows = sink.rows.lock().unwrap();
    assert_eq!(rows[0].1, vec!["OBJECTID", "NAME", "geom"]);
    assert!(rows[0].2.iter().all(|row| row[2].is_string()));

    let skipped = harvest(&registry, &coordinator, &sink, "oregon", "zoning")
        .await
        .unwrap();
    assert!(skipped.is_none());
}

#[tokio::test]
async fn probe_reports_each_registered_endpoint() {
    let server = MockServer::start().await;
    mount_count(&server, PARCELS_QUERY, 10).await;

    let registry = EndpointRegistry::from_yaml_str(&registry_yaml(&server)).unwrap();
    let probe = ConnectivityProbe::new(ProbeConfig::default()).unwrap();

    let report = probe.test_registry(&registry, None).await.unwrap();

    assert_eq!(report.summary.total_endpoints, 2);
    assert_eq!(report.summary.successful, 1);
    let parcels = &report.results["oregon"]["parcels"];
    assert!(parcels.is_success());
    assert_eq!(parcels.count, Some(10));
    let zoning = &report.results["oregon"]["zoning"];
    assert_eq!(zoning.status_code, Some(404));
}

#[tokio::test]
async fn shared_coordinator_serves_concurrent_fetches() {
    let server = MockServer::start().await;
    mount_count(&server, PARCELS_QUERY, 4).await;
    mount_page(&server, PARCELS_QUERY, 0, 2).await;
    mount_page(&server, PARCELS_QUERY, 2, 2).await;

    let dir = tempfile::tempdir().unwrap();
    let registry = EndpointRegistry::from_yaml_str(&registry_yaml(&server)).unwrap();
    let coordinator = Arc::new(FetchCoordinator::http(fast_config(dir.path(), 2)).unwrap());
    let endpoint = registry.get("oregon", "parcels").unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move {
                coordinator
                    .fetch(&endpoint, FetchOptions::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(report.is_complete());
        assert_eq!(report.collection.len(), 4);
    }
}
