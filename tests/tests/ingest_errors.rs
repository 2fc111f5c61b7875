//! Tests for error handling in the ingest pipeline.
//!
//! A rejected batch must leave the raw tables untouched.

use axum::http::StatusCode;
use axum_test::TestServer;
use engine_core::limits::MAX_BATCH_SIZE_BYTES;
use integration_tests::{fixtures, setup::TestContext};
use serde_json::json;

/// One invalid record rejects the whole batch with VALID_001
#[tokio::test]
async fn test_missing_org_user_id_rejects_batch() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let mut bad_open = fixtures::app_open("ifa-1", "u-1", "2025-01-15T10:00:00Z");
    bad_open
        .as_object_mut()
        .expect("app_open is an object")
        .remove("org_user_id");
    let payload = fixtures::batch(vec![
        fixtures::click("ifa-1", "2025-01-15T09:00:00Z"),
        bad_open,
    ]);

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(payload.into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    let details = body["details"].as_array().expect("details listed");
    assert_eq!(details.len(), 1);
    assert!(details[0].as_str().unwrap_or_default().starts_with("record[1]"));

    assert_eq!(store.raw_counts(), (0, 0, 0));
}

/// Event times past the allowed clock skew are rejected
#[tokio::test]
async fn test_future_event_time_rejects_batch() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let payload = fixtures::batch(vec![fixtures::click("ifa-1", "2999-01-01T00:00:00Z")]);
    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(payload.into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert_eq!(store.raw_counts(), (0, 0, 0));
}

/// Unparseable JSON returns VALID_003
#[tokio::test]
async fn test_malformed_json_returns_format_error() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(b"{\"records\": [".to_vec().into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_003");
}

/// Unknown record kinds are a format error, not a partial accept
#[tokio::test]
async fn test_unknown_kind_returns_format_error() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let payload = fixtures::batch(vec![
        fixtures::click("ifa-1", "2025-01-15T09:00:00Z"),
        json!({"kind": "postback", "event_time": "2025-01-15T09:00:00Z"}),
    ]);
    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(payload.into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_003");
    assert_eq!(store.raw_counts(), (0, 0, 0));
}

/// An empty batch is rejected
#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let (_, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(fixtures::batch(Vec::new()).into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_003");
}

/// Payloads over the size limit return VALID_002
#[tokio::test]
async fn test_oversized_payload_returns_413() {
    let (store, ctx) = TestContext::new();
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let payload = vec![b' '; MAX_BATCH_SIZE_BYTES + 1];
    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes(payload.into())
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_002");
    assert_eq!(store.raw_counts(), (0, 0, 0));
}
