//! Refresh behavior under concurrency, timeouts and store failures.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use engine_core::DateRange;
use event_store::{DerivedStore, MemoryStore, RawEventStore};
use integration_tests::fixtures::{refresh_request, scenario_batch, scenario_range};
use integration_tests::mocks::{FlakyStore, OverlapStore};
use integration_tests::setup::{fast_retry, TestContext};
use serde_json::{json, Value};
use worker::{RefreshMode, RefreshStatus};

async fn ingest_scenario(server: &TestServer) {
    server
        .post("/ingest")
        .content_type("application/json")
        .bytes(scenario_batch().into())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_concurrent_refreshes_of_one_range_agree() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ingest_scenario(&server).await;

    let mode = RefreshMode::Immediate {
        timeout: Duration::from_secs(10),
    };
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = ctx.orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(scenario_range(), mode).await })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("refresh task panicked"));
    }

    for result in results {
        let RefreshStatus::Committed(summary) = result.expect("refresh succeeds") else {
            panic!("expected a committed refresh");
        };
        assert_eq!(summary.attributed, 2);
    }
    assert!(ctx.orchestrator.tokens().held().is_empty());

    let installs = store.attributed_installs(Some(scenario_range())).await.unwrap();
    assert_eq!(installs.len(), 2);
    assert_eq!(store.overview_totals(None).await.unwrap().installs, 2);
}

fn overlap_context() -> (Arc<OverlapStore>, TestContext) {
    let store = Arc::new(OverlapStore::new(
        Arc::new(MemoryStore::new()),
        Duration::from_millis(25),
    ));
    let raw: Arc<dyn RawEventStore> = store.clone();
    let derived: Arc<dyn DerivedStore> = store.clone();
    (store, TestContext::with_stores(raw, derived, fast_retry(4)))
}

async fn refresh_all(ctx: &TestContext, ranges: Vec<DateRange>) {
    let mode = RefreshMode::Immediate {
        timeout: Duration::from_secs(10),
    };
    let handles: Vec<_> = ranges
        .into_iter()
        .map(|range| {
            let orchestrator = ctx.orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(range, mode).await })
        })
        .collect();
    for handle in handles {
        handle
            .await
            .expect("refresh task panicked")
            .expect("refresh succeeds");
    }
}

#[tokio::test]
async fn test_overlapping_refreshes_never_interleave() {
    let (store, ctx) = overlap_context();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ingest_scenario(&server).await;

    let week = DateRange::trailing(scenario_range().start, 3);
    refresh_all(&ctx, vec![scenario_range(), week, scenario_range(), week]).await;

    assert_eq!(store.peak(), 1);
    assert_eq!(store.inner().attributed_installs(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_disjoint_refreshes_run_in_parallel() {
    let (store, ctx) = overlap_context();
    let next_day = DateRange::day(scenario_range().end);

    refresh_all(&ctx, vec![scenario_range(), next_day]).await;

    assert_eq!(store.peak(), 2);
}

#[tokio::test]
async fn test_overlong_range_is_rejected() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/refresh")
        .json(&json!({"start": "1900-01-01", "end": "2100-01-01"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALID_003");
}

#[tokio::test]
async fn test_refresh_wait_times_out_with_504_and_still_commits() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ingest_scenario(&server).await;

    let held = ctx
        .orchestrator
        .tokens()
        .try_acquire(scenario_range())
        .expect("range is free");
    let mut commits = ctx.orchestrator.subscribe();

    let response = server
        .post("/refresh")
        .json(&refresh_request(scenario_range(), Some(20)))
        .await;
    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json();
    assert_eq!(body["code"], "REFRESH_001");

    drop(held);
    let commit = tokio::time::timeout(Duration::from_secs(5), commits.recv())
        .await
        .expect("refresh commits after the timeout")
        .unwrap();
    assert_eq!(commit.range, scenario_range());
    assert_eq!(store.attributed_installs(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unwaited_refresh_is_accepted() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ingest_scenario(&server).await;
    let mut commits = ctx.orchestrator.subscribe();

    let response = server
        .post("/refresh")
        .json(&json!({"start": "2025-01-15", "end": "2025-01-16", "wait": false}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "accepted");

    tokio::time::timeout(Duration::from_secs(5), commits.recv())
        .await
        .expect("scheduled refresh commits")
        .unwrap();
    assert_eq!(store.overview_totals(None).await.unwrap().installs, 2);
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/refresh")
        .json(&json!({"start": "2025-01-16", "end": "2025-01-15"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALID_003");
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new()), 0));
    let raw: Arc<dyn RawEventStore> = flaky.clone();
    let derived: Arc<dyn DerivedStore> = flaky.clone();
    let ctx = TestContext::with_stores(raw, derived, fast_retry(4));
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ingest_scenario(&server).await;

    flaky.fail_next(2);
    let response = server
        .post("/refresh")
        .json(&refresh_request(scenario_range(), None))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "committed");
    assert_eq!(flaky.failures_seen(), 2);
    assert_eq!(flaky.inner().attributed_installs(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_store_failure_returns_503_and_publishes_nothing() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new()), 0));
    let raw: Arc<dyn RawEventStore> = flaky.clone();
    let derived: Arc<dyn DerivedStore> = flaky.clone();
    let ctx = TestContext::with_stores(raw, derived, fast_retry(2));
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    ingest_scenario(&server).await;

    flaky.fail_next(10);
    let response = server
        .post("/refresh")
        .json(&refresh_request(scenario_range(), None))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "STORE_001");
    assert!(flaky.inner().attributed_installs(None).await.unwrap().is_empty());
}
