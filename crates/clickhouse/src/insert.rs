//! Row codecs and batch insert helpers for ClickHouse.
//!
//! `Date` columns travel as days since the Unix epoch (u16), DateTime64(3)
//! as milliseconds since the epoch (i64).

use crate::client::{map_error, ClickHouseClient};
use chrono::{DateTime, NaiveDate, Utc};
use clickhouse::Row;
use engine_core::events::{AppEvent, Geo, Touchpoint};
use engine_core::rollup::{
    DailyOverviewRow, InstallsBaseRow, UserDailyAppOpensRow, UserDailyEventsAttributedRow,
    UserDailyEventsRow, UserDxActivityRow, UserDxAttributedRow,
};
use engine_core::{AttributionRecord, Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use telemetry::metrics;
use tracing::debug;
use uuid::Uuid;

const EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(d) => d,
    None => panic!("invalid epoch"),
};

pub fn date_to_days(date: NaiveDate) -> u16 {
    (date - EPOCH).num_days().clamp(0, i64::from(u16::MAX)) as u16
}

pub fn days_to_date(days: u16) -> NaiveDate {
    EPOCH + chrono::Days::new(u64::from(days))
}

pub fn millis_to_time(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Row for the `impressions` and `clicks` tables.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct TouchpointRow {
    pub event_time: i64,
    pub store_id: String,
    pub network: String,
    pub campaign_name: String,
    pub campaign_id: String,
    pub ad_name: String,
    pub ad_id: String,
    pub device_id: String,
    pub client_ip: String,
    pub country_iso: String,
    pub state_iso: String,
    pub city_name: String,
    pub link_uid: String,
    pub received_at: i64,
}

impl From<&Touchpoint> for TouchpointRow {
    fn from(tp: &Touchpoint) -> Self {
        Self {
            event_time: tp.event_time.timestamp_millis(),
            store_id: tp.store_id.clone(),
            network: tp.network.clone(),
            campaign_name: tp.campaign_name.clone(),
            campaign_id: tp.campaign_id.clone(),
            ad_name: tp.ad_name.clone(),
            ad_id: tp.ad_id.clone(),
            device_id: tp.device_id.clone(),
            client_ip: tp.client_ip.clone(),
            country_iso: tp.geo.country.clone(),
            state_iso: tp.geo.state.clone(),
            city_name: tp.geo.city.clone(),
            link_uid: tp.link_uid.map(|u| u.to_string()).unwrap_or_default(),
            received_at: tp
                .received_at
                .unwrap_or(tp.event_time)
                .timestamp_millis(),
        }
    }
}

impl From<TouchpointRow> for Touchpoint {
    fn from(row: TouchpointRow) -> Self {
        Self {
            event_time: millis_to_time(row.event_time),
            store_id: row.store_id,
            network: row.network,
            campaign_name: row.campaign_name,
            campaign_id: row.campaign_id,
            ad_name: row.ad_name,
            ad_id: row.ad_id,
            device_id: row.device_id,
            client_ip: row.client_ip,
            geo: Geo {
                country: row.country_iso,
                state: row.state_iso,
                city: row.city_name,
            },
            link_uid: Uuid::parse_str(&row.link_uid).ok(),
            received_at: Some(millis_to_time(row.received_at)),
        }
    }
}

/// Row for the `events` table.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct AppEventRow {
    pub event_time: i64,
    pub store_id: String,
    pub event_id: String,
    pub revenue: Option<f64>,
    pub device_id: String,
    pub org_user_id: String,
    pub client_ip: String,
    pub country_iso: String,
    pub state_iso: String,
    pub city_name: String,
    pub event_uid: String,
    pub received_at: i64,
    pub errors: String,
}

impl From<&AppEvent> for AppEventRow {
    fn from(e: &AppEvent) -> Self {
        Self {
            event_time: e.event_time.timestamp_millis(),
            store_id: e.store_id.clone(),
            event_id: e.event_id.clone(),
            revenue: e.revenue,
            device_id: e.device_id.clone(),
            org_user_id: e.org_user_id.clone(),
            client_ip: e.client_ip.clone(),
            country_iso: e.geo.country.clone(),
            state_iso: e.geo.state.clone(),
            city_name: e.geo.city.clone(),
            event_uid: e.event_uid.to_string(),
            received_at: e.received_at.unwrap_or(e.event_time).timestamp_millis(),
            errors: e.errors.clone(),
        }
    }
}

impl From<AppEventRow> for AppEvent {
    fn from(row: AppEventRow) -> Self {
        Self {
            event_time: millis_to_time(row.event_time),
            store_id: row.store_id,
            event_id: row.event_id,
            revenue: row.revenue,
            device_id: row.device_id,
            org_user_id: row.org_user_id,
            client_ip: row.client_ip,
            geo: Geo {
                country: row.country_iso,
                state: row.state_iso,
                city: row.city_name,
            },
            event_uid: Uuid::parse_str(&row.event_uid).unwrap_or_default(),
            received_at: Some(millis_to_time(row.received_at)),
            errors: row.errors,
        }
    }
}

/// Row for `attributed_installs`.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct AttributionRow {
    pub install_date: u16,
    pub org_user_id: String,
    pub device_id: String,
    pub store_id: String,
    pub attribution_type: String,
    pub network: String,
    pub campaign_id: String,
    pub ad_id: String,
    pub attributed_at: i64,
}

impl From<&AttributionRecord> for AttributionRow {
    fn from(r: &AttributionRecord) -> Self {
        Self {
            install_date: date_to_days(r.install_date()),
            org_user_id: r.org_user_id.clone(),
            device_id: r.device_id.clone(),
            store_id: r.store_id.clone(),
            attribution_type: r.attribution_type.as_str().to_string(),
            network: r.network.clone(),
            campaign_id: r.campaign_id.clone(),
            ad_id: r.ad_id.clone(),
            attributed_at: r.attributed_at.timestamp_millis(),
        }
    }
}

impl TryFrom<AttributionRow> for AttributionRecord {
    type Error = Error;

    fn try_from(row: AttributionRow) -> Result<Self> {
        Ok(Self {
            attribution_type: row.attribution_type.parse()?,
            org_user_id: row.org_user_id,
            device_id: row.device_id,
            store_id: row.store_id,
            network: row.network,
            campaign_id: row.campaign_id,
            ad_id: row.ad_id,
            attributed_at: millis_to_time(row.attributed_at),
        })
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct InstallsBaseChRow {
    pub date: u16,
    pub store_id: String,
    pub org_user_id: String,
    pub device_id: String,
    pub installed_at: i64,
}

impl From<&InstallsBaseRow> for InstallsBaseChRow {
    fn from(r: &InstallsBaseRow) -> Self {
        Self {
            date: date_to_days(r.date),
            store_id: r.store_id.clone(),
            org_user_id: r.org_user_id.clone(),
            device_id: r.device_id.clone(),
            installed_at: r.installed_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserDailyAppOpensChRow {
    pub date: u16,
    pub store_id: String,
    pub org_user_id: String,
    pub app_opens: u64,
}

impl From<&UserDailyAppOpensRow> for UserDailyAppOpensChRow {
    fn from(r: &UserDailyAppOpensRow) -> Self {
        Self {
            date: date_to_days(r.date),
            store_id: r.store_id.clone(),
            org_user_id: r.org_user_id.clone(),
            app_opens: r.app_opens,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserDxActivityChRow {
    pub activity_date: u16,
    pub install_date: u16,
    pub store_id: String,
    pub org_user_id: String,
    pub dx: u32,
    pub app_opens: u64,
}

impl From<&UserDxActivityRow> for UserDxActivityChRow {
    fn from(r: &UserDxActivityRow) -> Self {
        Self {
            activity_date: date_to_days(r.activity_date),
            install_date: date_to_days(r.install_date),
            store_id: r.store_id.clone(),
            org_user_id: r.org_user_id.clone(),
            dx: r.dx,
            app_opens: r.app_opens,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserDxAttributedChRow {
    pub activity_date: u16,
    pub install_date: u16,
    pub store_id: String,
    pub attribution_type: String,
    pub network: String,
    pub campaign_id: String,
    pub dx: u32,
    pub active_users: u64,
    pub app_opens: u64,
}

impl From<&UserDxAttributedRow> for UserDxAttributedChRow {
    fn from(r: &UserDxAttributedRow) -> Self {
        Self {
            activity_date: date_to_days(r.activity_date),
            install_date: date_to_days(r.install_date),
            store_id: r.store_id.clone(),
            attribution_type: r.attribution_type.as_str().to_string(),
            network: r.network.clone(),
            campaign_id: r.campaign_id.clone(),
            dx: r.dx,
            active_users: r.active_users,
            app_opens: r.app_opens,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserDailyEventsChRow {
    pub date: u16,
    pub store_id: String,
    pub org_user_id: String,
    pub event_id: String,
    pub events: u64,
    pub revenue: f64,
}

impl From<&UserDailyEventsRow> for UserDailyEventsChRow {
    fn from(r: &UserDailyEventsRow) -> Self {
        Self {
            date: date_to_days(r.date),
            store_id: r.store_id.clone(),
            org_user_id: r.org_user_id.clone(),
            event_id: r.event_id.clone(),
            events: r.events,
            revenue: r.revenue,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct UserDailyEventsAttributedChRow {
    pub date: u16,
    pub store_id: String,
    pub network: String,
    pub campaign_id: String,
    pub event_id: String,
    pub events: u64,
    pub users: u64,
    pub revenue: f64,
}

impl From<&UserDailyEventsAttributedRow> for UserDailyEventsAttributedChRow {
    fn from(r: &UserDailyEventsAttributedRow) -> Self {
        Self {
            date: date_to_days(r.date),
            store_id: r.store_id.clone(),
            network: r.network.clone(),
            campaign_id: r.campaign_id.clone(),
            event_id: r.event_id.clone(),
            events: r.events,
            users: r.users,
            revenue: r.revenue,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct DailyOverviewChRow {
    pub date: u16,
    pub store_id: String,
    pub network: String,
    pub campaign_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub installs: u64,
    pub revenue: f64,
}

impl From<&DailyOverviewRow> for DailyOverviewChRow {
    fn from(r: &DailyOverviewRow) -> Self {
        Self {
            date: date_to_days(r.date),
            store_id: r.store_id.clone(),
            network: r.network.clone(),
            campaign_id: r.campaign_id.clone(),
            impressions: r.impressions,
            clicks: r.clicks,
            installs: r.installs,
            revenue: r.revenue,
        }
    }
}

impl From<DailyOverviewChRow> for DailyOverviewRow {
    fn from(r: DailyOverviewChRow) -> Self {
        Self {
            date: days_to_date(r.date),
            store_id: r.store_id,
            network: r.network,
            campaign_id: r.campaign_id,
            impressions: r.impressions,
            clicks: r.clicks,
            installs: r.installs,
            revenue: r.revenue,
        }
    }
}

/// Inserts rows into `table` in a single INSERT statement.
pub async fn insert_rows<T>(client: &ClickHouseClient, table: &str, rows: &[T]) -> Result<usize>
where
    T: Row + Serialize + DeserializeOwned,
{
    if rows.is_empty() {
        return Ok(0);
    }

    let count = rows.len();
    let start = std::time::Instant::now();

    let mut insert = client
        .inner()
        .insert::<T>(table)
        .map_err(|e| map_error("insert", e))?;

    for row in rows {
        insert.write(row).await.map_err(|e| map_error("write", e))?;
    }

    insert.end().await.map_err(|e| map_error("end", e))?;

    let elapsed = start.elapsed();
    metrics().store_latency_ms.observe(elapsed.as_millis() as u64);

    debug!(
        table = table,
        count = count,
        latency_ms = %elapsed.as_millis(),
        "Inserted rows to ClickHouse"
    );

    Ok(count)
}

/// Converts and inserts domain rows.
pub async fn insert_as<'a, S, T>(client: &ClickHouseClient, table: &str, rows: &'a [S]) -> Result<usize>
where
    T: Row + Serialize + DeserializeOwned + From<&'a S>,
{
    let converted: Vec<T> = rows.iter().map(T::from).collect();
    insert_rows(client, table, &converted).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_days() {
        let d: NaiveDate = "2025-01-15".parse().unwrap();
        assert_eq!(date_to_days(d), 20103);
        assert_eq!(days_to_date(20103), d);
    }

    #[test]
    fn test_touchpoint_row_keeps_missing_link_uid_empty() {
        let tp = Touchpoint {
            event_time: "2025-01-15T09:00:00.123Z".parse().unwrap(),
            store_id: "s".into(),
            network: "meta".into(),
            campaign_name: String::new(),
            campaign_id: "c".into(),
            ad_name: String::new(),
            ad_id: "a".into(),
            device_id: "ifa-1".into(),
            client_ip: String::new(),
            geo: Geo::default(),
            link_uid: None,
            received_at: None,
        };
        let row = TouchpointRow::from(&tp);
        assert!(row.link_uid.is_empty());
        assert_eq!(row.received_at, row.event_time);

        let back = Touchpoint::from(row);
        assert_eq!(back.event_time, tp.event_time);
        assert_eq!(back.link_uid, None);
    }
}
