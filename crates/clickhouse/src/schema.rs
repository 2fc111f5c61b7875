//! ClickHouse table schemas.
//!
//! Tables are created unqualified in the client's database:
//! - raw tables (`impressions`, `clicks`, `events`) are append-only
//! - derived tables are partitioned by their date column so a refresh can
//!   swap whole days in with `REPLACE PARTITION` from a `_staging` twin
//! - DateTime64(3, 'UTC') for millisecond precision

use crate::client::ClickHouseClient;
use engine_core::Result;
use engine_core::RollupStage;

/// Derived table holding one attribution record per install.
pub const ATTRIBUTED_INSTALLS: &str = "attributed_installs";

pub const CREATE_IMPRESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS impressions (
    event_time DateTime64(3, 'UTC'),
    store_id LowCardinality(String),
    network LowCardinality(String),
    campaign_name String,
    campaign_id String,
    ad_name String,
    ad_id String,
    device_id String,
    client_ip String,
    country_iso LowCardinality(String),
    state_iso LowCardinality(String),
    city_name String,
    link_uid String,
    received_at DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(event_time)
ORDER BY (device_id, event_time)
"#;

pub const CREATE_CLICKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS clicks (
    event_time DateTime64(3, 'UTC'),
    store_id LowCardinality(String),
    network LowCardinality(String),
    campaign_name String,
    campaign_id String,
    ad_name String,
    ad_id String,
    device_id String,
    client_ip String,
    country_iso LowCardinality(String),
    state_iso LowCardinality(String),
    city_name String,
    link_uid String,
    received_at DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(event_time)
ORDER BY (device_id, event_time)
"#;

pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_time DateTime64(3, 'UTC'),
    store_id LowCardinality(String),
    event_id LowCardinality(String),
    revenue Nullable(Float64),
    device_id String,
    org_user_id String,
    client_ip String,
    country_iso LowCardinality(String),
    state_iso LowCardinality(String),
    city_name String,
    event_uid String,
    received_at DateTime64(3, 'UTC'),
    errors String
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(event_time)
ORDER BY (org_user_id, event_time, event_uid)
"#;

pub const CREATE_ATTRIBUTED_INSTALLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS attributed_installs (
    install_date Date,
    org_user_id String,
    device_id String,
    store_id LowCardinality(String),
    attribution_type LowCardinality(String),
    network LowCardinality(String),
    campaign_id String,
    ad_id String,
    attributed_at DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY install_date
ORDER BY (org_user_id)
"#;

pub const CREATE_INSTALLS_BASE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS installs_base (
    date Date,
    store_id LowCardinality(String),
    org_user_id String,
    device_id String,
    installed_at DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY date
ORDER BY (store_id, org_user_id)
"#;

pub const CREATE_USER_DAILY_APP_OPENS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_daily_app_opens (
    date Date,
    store_id LowCardinality(String),
    org_user_id String,
    app_opens UInt64
)
ENGINE = MergeTree()
PARTITION BY date
ORDER BY (store_id, org_user_id)
"#;

pub const CREATE_USER_DX_ACTIVITY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_dx_activity (
    activity_date Date,
    install_date Date,
    store_id LowCardinality(String),
    org_user_id String,
    dx UInt32,
    app_opens UInt64
)
ENGINE = MergeTree()
PARTITION BY activity_date
ORDER BY (store_id, org_user_id, install_date, dx)
"#;

pub const CREATE_USER_DX_ATTRIBUTED_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_dx_attributed (
    activity_date Date,
    install_date Date,
    store_id LowCardinality(String),
    attribution_type LowCardinality(String),
    network LowCardinality(String),
    campaign_id String,
    dx UInt32,
    active_users UInt64,
    app_opens UInt64
)
ENGINE = MergeTree()
PARTITION BY activity_date
ORDER BY (store_id, install_date, attribution_type, network, campaign_id, dx)
"#;

pub const CREATE_USER_DAILY_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_daily_events (
    date Date,
    store_id LowCardinality(String),
    org_user_id String,
    event_id LowCardinality(String),
    events UInt64,
    revenue Float64
)
ENGINE = MergeTree()
PARTITION BY date
ORDER BY (store_id, org_user_id, event_id)
"#;

pub const CREATE_USER_DAILY_EVENTS_ATTRIBUTED_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_daily_events_attributed (
    date Date,
    store_id LowCardinality(String),
    network LowCardinality(String),
    campaign_id String,
    event_id LowCardinality(String),
    events UInt64,
    users UInt64,
    revenue Float64
)
ENGINE = MergeTree()
PARTITION BY date
ORDER BY (store_id, network, campaign_id, event_id)
"#;

pub const CREATE_DAILY_OVERVIEW_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daily_overview (
    date Date,
    store_id LowCardinality(String),
    network LowCardinality(String),
    campaign_id String,
    impressions UInt64,
    clicks UInt64,
    installs UInt64,
    revenue Float64
)
ENGINE = MergeTree()
PARTITION BY date
ORDER BY (store_id, network, campaign_id)
"#;

/// Derived tables replaced per refresh, with their partition column.
pub fn derived_tables() -> Vec<(&'static str, &'static str)> {
    let mut tables = vec![(ATTRIBUTED_INSTALLS, "install_date")];
    for stage in RollupStage::ALL {
        let column = match stage {
            RollupStage::UserDxActivity | RollupStage::UserDxAttributed => "activity_date",
            _ => "date",
        };
        tables.push((stage.table(), column));
    }
    tables
}

/// Name of the staging twin of a derived table.
pub fn staging_table(table: &str) -> String {
    format!("{}_staging", table)
}

/// All table creation statements, staging twins last.
pub fn all_tables() -> Vec<String> {
    let mut ddl: Vec<String> = [
        CREATE_IMPRESSIONS_TABLE,
        CREATE_CLICKS_TABLE,
        CREATE_EVENTS_TABLE,
        CREATE_ATTRIBUTED_INSTALLS_TABLE,
        CREATE_INSTALLS_BASE_TABLE,
        CREATE_USER_DAILY_APP_OPENS_TABLE,
        CREATE_USER_DX_ACTIVITY_TABLE,
        CREATE_USER_DX_ATTRIBUTED_TABLE,
        CREATE_USER_DAILY_EVENTS_TABLE,
        CREATE_USER_DAILY_EVENTS_ATTRIBUTED_TABLE,
        CREATE_DAILY_OVERVIEW_TABLE,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for (table, _) in derived_tables() {
        ddl.push(format!(
            "CREATE TABLE IF NOT EXISTS {} AS {}",
            staging_table(table),
            table
        ));
    }
    ddl
}

/// Initialize the database schema.
///
/// Creates all tables if they don't exist.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    for sql in all_tables() {
        client.execute(&sql).await?;
    }
    Ok(())
}
