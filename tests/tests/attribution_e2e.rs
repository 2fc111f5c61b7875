//! End-to-end: ingest the reference scenario, refresh, and query.

use axum::http::StatusCode;
use axum_test::TestServer;
use engine_core::rollup::UserDxAttributedRow;
use engine_core::DateRange;
use event_store::MemoryStore;
use integration_tests::fixtures::{
    app_open, batch, refresh_request, scenario_batch, scenario_day, scenario_range, scenario_records,
};
use integration_tests::setup::TestContext;
use serde_json::Value;

fn summary_count(rows: &[Value], attribution_type: &str, network: &str) -> u64 {
    rows.iter()
        .find(|r| r["attribution_type"] == attribution_type && r["network"] == network)
        .and_then(|r| r["installs"].as_u64())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_scenario_attributes_click_and_organic() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(scenario_batch().into())
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["accepted"], 4);
    assert_eq!(store.raw_counts(), (1, 1, 2));

    let response = server
        .post("/refresh")
        .json(&refresh_request(scenario_range(), None))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "committed");
    assert_eq!(body["attributed"], 2);

    let response = server.get("/attribution/summary").await;
    response.assert_status_ok();
    let rows: Vec<Value> = response.json();
    assert_eq!(summary_count(&rows, "click", "meta"), 1);
    assert_eq!(summary_count(&rows, "Organic", "Organic"), 1);
    assert_eq!(summary_count(&rows, "impression", "meta"), 0);

    let response = server.get("/overview/totals").await;
    response.assert_status_ok();
    let totals: Value = response.json();
    assert_eq!(totals["impressions"], 1);
    assert_eq!(totals["clicks"], 1);
    assert_eq!(totals["installs"], 2);
}

#[tokio::test]
async fn test_installs_query_lists_each_user_once() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    server
        .post("/ingest")
        .content_type("application/json")
        .bytes(scenario_batch().into())
        .await
        .assert_status_ok();

    // Refreshing twice replaces the range rather than adding to it.
    for _ in 0..2 {
        server
            .post("/refresh")
            .json(&refresh_request(scenario_range(), None))
            .await
            .assert_status_ok();
    }

    let response = server
        .get("/attribution/installs")
        .add_query_param("start", "2025-01-15")
        .add_query_param("end", "2025-01-16")
        .await;
    response.assert_status_ok();
    let installs: Vec<Value> = response.json();
    assert_eq!(installs.len(), 2);

    let u1 = installs
        .iter()
        .find(|r| r["org_user_id"] == "u-1")
        .expect("u-1 attributed");
    assert_eq!(u1["attribution_type"], "click");
    assert_eq!(u1["campaign_id"], "c-100");

    let response = server.get("/overview/totals").await;
    let totals: Value = response.json();
    assert_eq!(totals["installs"], 2);
}

#[tokio::test]
async fn test_daily_overview_requires_a_range() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/overview/daily").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALID_003");

    let response = server
        .get("/overview/daily")
        .add_query_param("start", "2025-01-15")
        .add_query_param("end", "2025-01-16")
        .await;
    response.assert_status_ok();
    let rows: Vec<Value> = response.json();
    assert!(rows.is_empty());
}

type DxKey = (String, String, String, String, u32, u64, u64);

fn dx_rows(store: &MemoryStore) -> Vec<DxKey> {
    let mut rows: Vec<DxKey> = store
        .user_dx_attributed()
        .into_iter()
        .map(|r: UserDxAttributedRow| {
            (
                r.activity_date.to_string(),
                r.install_date.to_string(),
                r.attribution_type.as_str().to_string(),
                r.network,
                r.dx,
                r.active_users,
                r.app_opens,
            )
        })
        .collect();
    rows.sort();
    rows
}

/// The scenario plus a second-day open by `u-1`.
async fn ingest_two_days(server: &TestServer) {
    let mut records = scenario_records();
    records.push(app_open("ifa-1", "u-1", "2025-01-16T09:00:00Z"));
    server
        .post("/ingest")
        .content_type("application/json")
        .bytes(batch(records).into())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_day_by_day_refreshes_match_one_refresh() {
    let day15 = scenario_range();
    let day16 = DateRange::day(day15.end);
    let both = DateRange::new(scenario_day(), day16.end).unwrap();

    let (split_store, split) = TestContext::new();
    let split_server = TestServer::new(split.router.clone()).expect("Failed to create test server");
    ingest_two_days(&split_server).await;
    for range in [day15, day16] {
        split_server
            .post("/refresh")
            .json(&refresh_request(range, None))
            .await
            .assert_status_ok();
    }

    let (whole_store, whole) = TestContext::new();
    let whole_server = TestServer::new(whole.router.clone()).expect("Failed to create test server");
    ingest_two_days(&whole_server).await;
    whole_server
        .post("/refresh")
        .json(&refresh_request(both, None))
        .await
        .assert_status_ok();

    let expected = dx_rows(&whole_store);
    assert_eq!(dx_rows(&split_store), expected);
    assert!(expected
        .iter()
        .any(|(activity, install, kind, _, dx, users, _)| {
            activity == "2025-01-16" && install == "2025-01-15" && kind == "click" && *dx == 1 && *users == 1
        }));

    let split_totals: Value = split_server.get("/overview/totals").await.json();
    let whole_totals: Value = whole_server.get("/overview/totals").await.json();
    assert_eq!(split_totals, whole_totals);
}

#[tokio::test]
async fn test_cached_reads_are_replaced_by_a_waited_refresh() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    server
        .post("/ingest")
        .content_type("application/json")
        .bytes(scenario_batch().into())
        .await
        .assert_status_ok();

    // fill the cache with pre-refresh numbers
    let before: Value = server.get("/overview/totals").await.json();
    assert_eq!(before["installs"], 0);
    let rows: Vec<Value> = server.get("/attribution/summary").await.json();
    assert!(rows.is_empty());

    server
        .post("/refresh")
        .json(&refresh_request(scenario_range(), None))
        .await
        .assert_status_ok();

    let after: Value = server.get("/overview/totals").await.json();
    assert_eq!(after["installs"], 2);
    let rows: Vec<Value> = server.get("/attribution/summary").await.json();
    assert_eq!(summary_count(&rows, "click", "meta"), 1);
}
