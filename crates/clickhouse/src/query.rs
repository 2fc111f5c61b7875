//! Read queries: refresh snapshots and reporting.

use crate::client::{map_error, ClickHouseClient};
use crate::insert::{date_to_days, AppEventRow, AttributionRow, DailyOverviewChRow, TouchpointRow};
use chrono::{Duration, NaiveDate};
use clickhouse::Row;
use engine_core::rollup::DailyOverviewRow;
use engine_core::{
    AttributionRecord, AttributionSummaryRow, AttributionType, DateRange, OverviewTotals,
    RawSnapshot, Result, APP_OPEN,
};
use serde::Deserialize;
use tracing::debug;

const TOUCHPOINT_COLUMNS: &str = "toUnixTimestamp64Milli(event_time), store_id, network, \
     campaign_name, campaign_id, ad_name, ad_id, device_id, client_ip, country_iso, \
     state_iso, city_name, link_uid, toUnixTimestamp64Milli(received_at)";

const EVENT_COLUMNS: &str = "toUnixTimestamp64Milli(event_time), store_id, event_id, revenue, \
     device_id, org_user_id, client_ip, country_iso, state_iso, city_name, event_uid, \
     toUnixTimestamp64Milli(received_at), errors";

const ATTRIBUTION_COLUMNS: &str = "install_date, org_user_id, device_id, store_id, \
     attribution_type, network, campaign_id, ad_id, toUnixTimestamp64Milli(attributed_at)";

async fn touchpoints(
    client: &ClickHouseClient,
    table: &str,
    from_ms: i64,
    to_ms: i64,
) -> Result<Vec<TouchpointRow>> {
    let sql = format!(
        "SELECT {} FROM {} \
         WHERE event_time >= fromUnixTimestamp64Milli(?, 'UTC') \
           AND event_time < fromUnixTimestamp64Milli(?, 'UTC')",
        TOUCHPOINT_COLUMNS, table
    );
    client
        .inner()
        .query(&sql)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all()
        .await
        .map_err(|e| map_error("snapshot touchpoints", e))
}

/// Reads everything a refresh of `range` needs.
///
/// `prior_opens` holds only the earliest `app_open` before the range for
/// users who open the app inside it.
pub async fn fetch_snapshot(
    client: &ClickHouseClient,
    range: DateRange,
    lookback: Duration,
) -> Result<RawSnapshot> {
    let start_ms = range.start_time().timestamp_millis();
    let end_ms = range.end_time().timestamp_millis();
    let touch_ms = range.touch_start(lookback).timestamp_millis();

    let impressions = touchpoints(client, "impressions", touch_ms, end_ms).await?;
    let clicks = touchpoints(client, "clicks", touch_ms, end_ms).await?;

    let events_sql = format!(
        "SELECT {} FROM events \
         WHERE event_time >= fromUnixTimestamp64Milli(?, 'UTC') \
           AND event_time < fromUnixTimestamp64Milli(?, 'UTC')",
        EVENT_COLUMNS
    );
    let app_events: Vec<AppEventRow> = client
        .inner()
        .query(&events_sql)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all()
        .await
        .map_err(|e| map_error("snapshot events", e))?;

    let prior_sql = format!(
        "SELECT {} FROM events \
         WHERE event_id = ? \
           AND event_time < fromUnixTimestamp64Milli(?, 'UTC') \
           AND org_user_id IN ( \
               SELECT org_user_id FROM events \
               WHERE event_id = ? \
                 AND event_time >= fromUnixTimestamp64Milli(?, 'UTC') \
                 AND event_time < fromUnixTimestamp64Milli(?, 'UTC')) \
         ORDER BY event_time, received_at, event_uid \
         LIMIT 1 BY org_user_id",
        EVENT_COLUMNS
    );
    let prior_opens: Vec<AppEventRow> = client
        .inner()
        .query(&prior_sql)
        .bind(APP_OPEN)
        .bind(start_ms)
        .bind(APP_OPEN)
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all()
        .await
        .map_err(|e| map_error("snapshot prior opens", e))?;

    let mut snapshot = RawSnapshot::empty(range, lookback);
    snapshot.impressions = impressions.into_iter().map(Into::into).collect();
    snapshot.clicks = clicks.into_iter().map(Into::into).collect();
    snapshot.app_events = app_events.into_iter().map(Into::into).collect();
    snapshot.prior_opens = prior_opens.into_iter().map(Into::into).collect();

    debug!(range = %range, records = snapshot.len(), "ClickHouse snapshot");
    Ok(snapshot)
}

/// Stored attribution for `org_user_ids` with installs before `before`.
pub async fn prior_attribution(
    client: &ClickHouseClient,
    org_user_ids: &[String],
    before: NaiveDate,
) -> Result<Vec<AttributionRecord>> {
    if org_user_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM attributed_installs \
         WHERE has(?, org_user_id) AND install_date < ? \
         ORDER BY attributed_at \
         LIMIT 1 BY org_user_id",
        ATTRIBUTION_COLUMNS
    );
    let rows: Vec<AttributionRow> = client
        .inner()
        .query(&sql)
        .bind(org_user_ids)
        .bind(date_to_days(before))
        .fetch_all()
        .await
        .map_err(|e| map_error("prior attribution", e))?;

    rows.into_iter().map(AttributionRecord::try_from).collect()
}

pub async fn attributed_installs(
    client: &ClickHouseClient,
    range: Option<DateRange>,
) -> Result<Vec<AttributionRecord>> {
    let (start, end) = day_bounds(range);
    let sql = format!(
        "SELECT {} FROM attributed_installs \
         WHERE install_date >= ? AND install_date < ? \
         ORDER BY attributed_at, org_user_id \
         LIMIT 1 BY org_user_id",
        ATTRIBUTION_COLUMNS
    );
    let rows: Vec<AttributionRow> = client
        .inner()
        .query(&sql)
        .bind(start)
        .bind(end)
        .fetch_all()
        .await
        .map_err(|e| map_error("attributed installs", e))?;

    rows.into_iter().map(AttributionRecord::try_from).collect()
}

#[derive(Debug, Clone, Row, Deserialize)]
struct SummaryRow {
    attribution_type: String,
    network: String,
    installs: u64,
}

/// Installs grouped by `(attribution_type, network)`.
pub async fn attribution_summary(client: &ClickHouseClient) -> Result<Vec<AttributionSummaryRow>> {
    let rows: Vec<SummaryRow> = client
        .inner()
        .query(
            "SELECT attribution_type, network, count() AS installs \
             FROM ( \
                 SELECT org_user_id, attribution_type, network FROM attributed_installs \
                 ORDER BY attributed_at \
                 LIMIT 1 BY org_user_id) \
             GROUP BY attribution_type, network",
        )
        .fetch_all()
        .await
        .map_err(|e| map_error("attribution summary", e))?;

    let mut summary = rows
        .into_iter()
        .map(|row| {
            Ok(AttributionSummaryRow {
                attribution_type: row.attribution_type.parse::<AttributionType>()?,
                network: row.network,
                installs: row.installs,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    summary.sort_by(|a, b| (a.attribution_type, &a.network).cmp(&(b.attribution_type, &b.network)));
    Ok(summary)
}

pub async fn daily_overview(client: &ClickHouseClient, range: DateRange) -> Result<Vec<DailyOverviewRow>> {
    let rows: Vec<DailyOverviewChRow> = client
        .inner()
        .query(
            "SELECT date, store_id, network, campaign_id, impressions, clicks, installs, revenue \
             FROM daily_overview \
             WHERE date >= ? AND date < ? \
             ORDER BY date, store_id, network, campaign_id",
        )
        .bind(date_to_days(range.start))
        .bind(date_to_days(range.end))
        .fetch_all()
        .await
        .map_err(|e| map_error("daily overview", e))?;

    Ok(rows.into_iter().map(Into::into).collect())
}

#[derive(Debug, Clone, Row, Deserialize)]
struct TotalsRow {
    impressions: u64,
    clicks: u64,
    installs: u64,
    revenue: f64,
}

pub async fn overview_totals(client: &ClickHouseClient, range: Option<DateRange>) -> Result<OverviewTotals> {
    let (start, end) = day_bounds(range);
    let row: TotalsRow = client
        .inner()
        .query(
            "SELECT sum(impressions), sum(clicks), sum(installs), sum(revenue) \
             FROM daily_overview \
             WHERE date >= ? AND date < ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one()
        .await
        .map_err(|e| map_error("overview totals", e))?;

    Ok(OverviewTotals {
        impressions: row.impressions,
        clicks: row.clicks,
        installs: row.installs,
        revenue: row.revenue,
    })
}

/// `[start, end)` in epoch days; `None` spans every representable date.
fn day_bounds(range: Option<DateRange>) -> (u16, u16) {
    match range {
        Some(r) => (date_to_days(r.start), date_to_days(r.end)),
        None => (0, u16::MAX),
    }
}

/// Row counts per raw table: `(impressions, clicks, events)`.
pub async fn raw_counts(client: &ClickHouseClient) -> Result<(u64, u64, u64)> {
    let mut counts = [0u64; 3];
    for (i, table) in ["impressions", "clicks", "events"].iter().enumerate() {
        counts[i] = client
            .inner()
            .query(&format!("SELECT count() FROM {}", table))
            .fetch_one()
            .await
            .map_err(|e| map_error("count", e))?;
    }
    Ok((counts[0], counts[1], counts[2]))
}
