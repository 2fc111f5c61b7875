//! Ingestion endpoint handler.
//!
//! Accepts a JSON array of raw records or `{"records": [...]}`. Each record
//! carries a `kind` of `impression`, `click` or `app_event`. The batch is
//! accepted or rejected as a whole.

use axum::{body::Bytes, extract::State, Json};
use tracing::{debug, info};

use crate::response::{ApiError, IngestResponse};
use crate::state::AppState;

/// POST /ingest
pub async fn ingest_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    debug!(payload_size = body.len(), "Received record batch");

    let receipt = state.funnel.ingest_bytes(&body).await?;

    info!(
        accepted = receipt.accepted,
        impressions = receipt.impressions,
        clicks = receipt.clicks,
        app_events = receipt.app_events,
        "Batch ingested"
    );
    Ok(Json(receipt.into()))
}
