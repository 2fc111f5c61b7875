//! Tests for health check endpoints.
//!
//! The health registry is process-wide, so every scenario runs inside one
//! test to keep them sequential.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use event_store::{DerivedStore, MemoryStore, RawEventStore};
use integration_tests::mocks::DownStore;
use integration_tests::setup::{fast_retry, TestContext};

#[tokio::test]
async fn test_health_reports_each_store() {
    // Both stores answering
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["raw_store"]["healthy"], true);
    assert_eq!(body["checks"]["derived_store"]["healthy"], true);
    assert!(
        body["checks"].get("redpanda").is_none(),
        "disabled consumer should not be reported"
    );

    server.get("/health/ready").await.assert_status_ok();
    server.get("/health/live").await.assert_status_ok();

    // Derived store down: still serving, but not ready
    let raw: Arc<dyn RawEventStore> = Arc::new(MemoryStore::new());
    let derived: Arc<dyn DerivedStore> = Arc::new(DownStore);
    let ctx = TestContext::with_stores(raw, derived, fast_retry(1));
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["raw_store"]["healthy"], true);
    assert_eq!(body["checks"]["derived_store"]["healthy"], false);
    assert!(body["checks"]["derived_store"]["detail"]
        .as_str()
        .unwrap_or_default()
        .contains("down"));

    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server.get("/health/live").await.assert_status_ok();

    // Queries surface the outage as STORE_001
    let response = server.get("/attribution/summary").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "STORE_001");
}
