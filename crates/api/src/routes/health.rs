//! Health check endpoints.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use telemetry::health;

use crate::response::{CheckResult, HealthResponse};
use crate::state::AppState;

/// Pings both stores and records the outcome in the health registry.
async fn probe(state: &AppState) {
    let h = health();
    h.raw_store.record(state.raw.ping().await);
    h.derived_store.record(state.derived.ping().await);
}

/// GET /health - status per component.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    probe(&state).await;
    let report = health().report();

    let checks: BTreeMap<String, CheckResult> = report
        .components
        .into_iter()
        .map(|c| {
            let detail = c.message.unwrap_or_else(|| "ok".to_string());
            let check = CheckResult {
                healthy: c.healthy,
                detail,
                checked_at: c.checked_at,
            };
            (c.name, check)
        })
        .collect();

    let code = if report.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthResponse { status: report.status, checks }))
}

/// GET /health/ready - Readiness probe (can accept traffic).
pub async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    probe(&state).await;
    if health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - Liveness probe (service is running).
pub async fn live_handler() -> StatusCode {
    if health().is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
