//! The reference scenario against a real ClickHouse.
//!
//! Requires Docker (or `ATTRIBUTION_TEST_CLICKHOUSE_URL`); run with
//! `--ignored`.

use std::sync::Arc;

use axum_test::TestServer;
use clickhouse_client::{init_schema, ClickHouseClient, ClickHouseStore};
use event_store::{DerivedStore, RawEventStore};
use integration_tests::containers::TestContainers;
use integration_tests::fixtures::{refresh_request, scenario_batch, scenario_range};
use integration_tests::setup::{fast_retry, TestContext};
use serde_json::Value;

#[tokio::test]
#[ignore = "starts a ClickHouse container"]
async fn test_scenario_round_trip_through_clickhouse() {
    let containers = TestContainers::start().await;
    let client = ClickHouseClient::new(containers.clickhouse_config())
        .expect("Failed to create ClickHouse client");
    init_schema(&client).await.expect("Failed to initialize schema");

    let store = Arc::new(ClickHouseStore::new(client));
    let raw: Arc<dyn RawEventStore> = store.clone();
    let derived: Arc<dyn DerivedStore> = store.clone();
    let ctx = TestContext::with_stores(raw, derived, fast_retry(3));
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server
        .post("/ingest")
        .content_type("application/json")
        .bytes(scenario_batch().into())
        .await
        .assert_status_ok();

    // Twice: the second publish must replace the first, not add to it.
    for _ in 0..2 {
        let response = server
            .post("/refresh")
            .json(&refresh_request(scenario_range(), Some(30_000)))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "committed");
    }

    let installs = store.attributed_installs(Some(scenario_range())).await.unwrap();
    assert_eq!(installs.len(), 2);

    let summary = store.attribution_summary().await.unwrap();
    let total: u64 = summary.iter().map(|r| r.installs).sum();
    assert_eq!(total, 2);

    let totals = store.overview_totals(Some(scenario_range())).await.unwrap();
    assert_eq!(totals.impressions, 1);
    assert_eq!(totals.clicks, 1);
    assert_eq!(totals.installs, 2);
}
