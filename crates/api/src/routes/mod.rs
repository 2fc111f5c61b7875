//! API routes.

pub mod health;
pub mod ingest;
pub mod query;
pub mod refresh;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use engine_core::limits::MAX_BATCH_SIZE_BYTES;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(ingest::ingest_handler))
        .route("/refresh", post(refresh::refresh_handler))
        .route("/attribution/summary", get(query::attribution_summary_handler))
        .route("/attribution/installs", get(query::attributed_installs_handler))
        .route("/overview/totals", get(query::overview_totals_handler))
        .route("/overview/daily", get(query::daily_overview_handler))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        // Oversized batches reach the funnel, which rejects them with VALID_002.
        .layer(DefaultBodyLimit::max(MAX_BATCH_SIZE_BYTES * 2))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
