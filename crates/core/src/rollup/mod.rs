//! Dependency-ordered rollups derived from raw facts and attribution records.
//!
//! Stage chain:
//! ```text
//! installs_base ──────────┬──> user_dx_activity ──> user_dx_attributed
//! user_daily_app_opens ───┘
//! user_daily_events ──> user_daily_events_attributed ──┐
//! installs_base ───────────────────────────────────────┴──> daily_overview
//! ```

mod engine;
mod graph;

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::attribution::AttributionType;
use crate::limits::DEFAULT_MAX_DX;
use crate::query::{overview_totals, OverviewTotals};
use crate::range::DateRange;

pub use engine::{AggregationEngine, AggregationInput};
pub use graph::StageGraph;

/// One derived table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupStage {
    InstallsBase,
    UserDailyAppOpens,
    UserDxActivity,
    UserDxAttributed,
    UserDailyEvents,
    UserDailyEventsAttributed,
    DailyOverview,
}

impl RollupStage {
    pub const ALL: [RollupStage; 7] = [
        Self::InstallsBase,
        Self::UserDailyAppOpens,
        Self::UserDxActivity,
        Self::UserDxAttributed,
        Self::UserDailyEvents,
        Self::UserDailyEventsAttributed,
        Self::DailyOverview,
    ];

    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::InstallsBase => "installs_base",
            Self::UserDailyAppOpens => "user_daily_app_opens",
            Self::UserDxActivity => "user_dx_activity",
            Self::UserDxAttributed => "user_dx_attributed",
            Self::UserDailyEvents => "user_daily_events",
            Self::UserDailyEventsAttributed => "user_daily_events_attributed",
            Self::DailyOverview => "daily_overview",
        }
    }

    /// Stages whose output this stage reads.
    pub fn dependencies(&self) -> &'static [RollupStage] {
        match self {
            Self::InstallsBase | Self::UserDailyAppOpens | Self::UserDailyEvents => &[],
            Self::UserDxActivity => &[Self::InstallsBase, Self::UserDailyAppOpens],
            Self::UserDxAttributed => &[Self::UserDxActivity],
            Self::UserDailyEventsAttributed => &[Self::UserDailyEvents],
            Self::DailyOverview => &[Self::InstallsBase, Self::UserDailyEventsAttributed],
        }
    }
}

impl fmt::Display for RollupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

fn default_max_dx() -> u32 {
    DEFAULT_MAX_DX
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Largest day-N tracked by the dx tables
    #[serde(default = "default_max_dx")]
    pub max_dx: u32,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            max_dx: DEFAULT_MAX_DX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallsBaseRow {
    pub date: NaiveDate,
    pub store_id: String,
    pub org_user_id: String,
    pub device_id: String,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDailyAppOpensRow {
    pub date: NaiveDate,
    pub store_id: String,
    pub org_user_id: String,
    pub app_opens: u64,
}

/// Keyed and partitioned by `activity_date`, which is `install_date + dx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDxActivityRow {
    pub activity_date: NaiveDate,
    pub install_date: NaiveDate,
    pub store_id: String,
    pub org_user_id: String,
    pub dx: u32,
    pub app_opens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDxAttributedRow {
    pub activity_date: NaiveDate,
    pub install_date: NaiveDate,
    pub store_id: String,
    pub attribution_type: AttributionType,
    pub network: String,
    pub campaign_id: String,
    pub dx: u32,
    pub active_users: u64,
    pub app_opens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDailyEventsRow {
    pub date: NaiveDate,
    pub store_id: String,
    pub org_user_id: String,
    pub event_id: String,
    pub events: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDailyEventsAttributedRow {
    pub date: NaiveDate,
    pub store_id: String,
    pub network: String,
    pub campaign_id: String,
    pub event_id: String,
    pub events: u64,
    pub users: u64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyOverviewRow {
    pub date: NaiveDate,
    pub store_id: String,
    pub network: String,
    pub campaign_id: String,
    pub impressions: u64,
    pub clicks: u64,
    pub installs: u64,
    pub revenue: f64,
}

/// Every rollup table recomputed for one range.
///
/// Rows are sorted by key and each row's date lies in `range`; for the dx
/// tables that date is the activity date, so installs before the range
/// still get rows for their activity inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupSet {
    pub range: DateRange,
    pub installs_base: Vec<InstallsBaseRow>,
    pub user_daily_app_opens: Vec<UserDailyAppOpensRow>,
    pub user_dx_activity: Vec<UserDxActivityRow>,
    pub user_dx_attributed: Vec<UserDxAttributedRow>,
    pub user_daily_events: Vec<UserDailyEventsRow>,
    pub user_daily_events_attributed: Vec<UserDailyEventsAttributedRow>,
    pub daily_overview: Vec<DailyOverviewRow>,
}

impl RollupSet {
    pub fn empty(range: DateRange) -> Self {
        Self {
            range,
            installs_base: Vec::new(),
            user_daily_app_opens: Vec::new(),
            user_dx_activity: Vec::new(),
            user_dx_attributed: Vec::new(),
            user_daily_events: Vec::new(),
            user_daily_events_attributed: Vec::new(),
            daily_overview: Vec::new(),
        }
    }

    pub fn overview_totals(&self) -> OverviewTotals {
        overview_totals(&self.daily_overview)
    }

    /// Row count per table, in stage order.
    pub fn row_counts(&self) -> [(RollupStage, usize); 7] {
        [
            (RollupStage::InstallsBase, self.installs_base.len()),
            (RollupStage::UserDailyAppOpens, self.user_daily_app_opens.len()),
            (RollupStage::UserDxActivity, self.user_dx_activity.len()),
            (RollupStage::UserDxAttributed, self.user_dx_attributed.len()),
            (RollupStage::UserDailyEvents, self.user_daily_events.len()),
            (RollupStage::UserDailyEventsAttributed, self.user_daily_events_attributed.len()),
            (RollupStage::DailyOverview, self.daily_overview.len()),
        ]
    }
}
