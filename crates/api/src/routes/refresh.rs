//! Refresh trigger endpoint.

use std::time::Duration;

use axum::{body::Bytes, extract::State, Json};
use chrono::NaiveDate;
use engine_core::DateRange;
use serde::Deserialize;
use worker::{RefreshMode, RefreshStatus};

use crate::response::{ApiError, RefreshResponse};
use crate::state::AppState;

fn default_wait() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub start: NaiveDate,
    /// Exclusive
    pub end: NaiveDate,
    /// Block until the range is committed
    #[serde(default = "default_wait")]
    pub wait: bool,
    pub timeout_ms: Option<u64>,
}

/// POST /refresh
pub async fn refresh_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RefreshResponse>, ApiError> {
    let req: RefreshRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid refresh request: {}", e)))?;
    let range = DateRange::new(req.start, req.end)?;

    let mode = if req.wait {
        let timeout = req
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| state.orchestrator.default_timeout());
        RefreshMode::Immediate { timeout }
    } else {
        RefreshMode::Scheduled
    };

    let response = match state.orchestrator.refresh(range, mode).await? {
        RefreshStatus::Committed(summary) => {
            state.cache.invalidate_all();
            RefreshResponse {
                success: true,
                range,
                status: "committed".into(),
                attributed: Some(summary.attributed),
                duration_ms: Some(summary.duration_ms),
            }
        }
        RefreshStatus::Accepted => RefreshResponse {
            success: true,
            range,
            status: "accepted".into(),
            attributed: None,
            duration_ms: None,
        },
    };
    Ok(Json(response))
}
