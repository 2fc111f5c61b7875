//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine_core::{DateRange, ValidationErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Success response for ingestion.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub accepted: usize,
    pub impressions: usize,
    pub clicks: usize,
    pub app_events: usize,
}

impl From<event_store::IngestReceipt> for IngestResponse {
    fn from(r: event_store::IngestReceipt) -> Self {
        Self {
            success: true,
            accepted: r.accepted,
            impressions: r.impressions,
            clicks: r.clicks,
            app_events: r.app_events,
        }
    }
}

/// Response to `POST /refresh`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub range: DateRange,
    /// `committed` when the caller waited, `accepted` otherwise
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// One dependency check.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub healthy: bool,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` or `unhealthy`
    pub status: telemetry::HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// API error carrying a stable error code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse {
                error: msg.into(),
                code: code.into(),
                details: Vec::new(),
            },
        }
    }

    /// Malformed query or body outside the record schema.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(
            StatusCode::BAD_REQUEST,
            ValidationErrorCode::InvalidFormat.code(),
            msg,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.response)).into_response()
    }
}

impl From<engine_core::Error> for ApiError {
    fn from(err: engine_core::Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut api = ApiError::with_code(status, err.code(), err.to_string());
        api.response.details = err.details().to_vec();
        api
    }
}
