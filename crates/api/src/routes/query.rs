//! Read-only queries over the derived tables.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use engine_core::rollup::DailyOverviewRow;
use engine_core::{AttributionRecord, AttributionSummaryRow, DateRange, OverviewTotals};
use serde::Deserialize;

use crate::response::ApiError;
use crate::state::AppState;

/// Optional `?start=&end=` date filter.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl RangeQuery {
    fn range(&self) -> Result<Option<DateRange>, ApiError> {
        match (self.start, self.end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Ok(Some(DateRange::new(start, end)?)),
            _ => Err(ApiError::bad_request("start and end must be given together")),
        }
    }

    fn required(&self) -> Result<DateRange, ApiError> {
        self.range()?
            .ok_or_else(|| ApiError::bad_request("start and end are required"))
    }
}

/// GET /attribution/summary
pub async fn attribution_summary_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<AttributionSummaryRow>>, ApiError> {
    let generation = state.cache.generation();
    if let Some(rows) = state.cache.summary(generation).await {
        return Ok(Json(rows.as_ref().clone()));
    }
    let rows = Arc::new(state.derived.attribution_summary().await?);
    state.cache.put_summary(generation, rows.clone()).await;
    Ok(Json(rows.as_ref().clone()))
}

/// GET /attribution/installs?start&end
pub async fn attributed_installs_handler(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<AttributionRecord>>, ApiError> {
    let range = q.range()?;
    Ok(Json(state.derived.attributed_installs(range).await?))
}

/// GET /overview/totals?start&end
pub async fn overview_totals_handler(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<OverviewTotals>, ApiError> {
    let range = q.range()?;
    let generation = state.cache.generation();
    if let Some(totals) = state.cache.totals(generation, range).await {
        return Ok(Json(totals));
    }
    let totals = state.derived.overview_totals(range).await?;
    state.cache.put_totals(generation, range, totals.clone()).await;
    Ok(Json(totals))
}

/// GET /overview/daily?start&end
pub async fn daily_overview_handler(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<DailyOverviewRow>>, ApiError> {
    let range = q.required()?;
    Ok(Json(state.derived.daily_overview(range).await?))
}
