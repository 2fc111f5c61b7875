//! Storage traits shared by the in-memory and ClickHouse backends.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use engine_core::rollup::DailyOverviewRow;
use engine_core::{
    AttributionRecord, AttributionSet, AttributionSummaryRow, DateRange, OverviewTotals,
    RawSnapshot, Result, RollupSet, ValidatedBatch,
};

/// Row counts confirmed by an append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub impressions: usize,
    pub clicks: usize,
    pub app_events: usize,
}

impl AppendReceipt {
    pub fn for_batch(batch: &ValidatedBatch) -> Self {
        Self {
            impressions: batch.impressions().len(),
            clicks: batch.clicks().len(),
            app_events: batch.app_events().len(),
        }
    }

    pub fn total(&self) -> usize {
        self.impressions + self.clicks + self.app_events
    }
}

/// Append-only raw tables.
///
/// An append is atomic per batch: once `append` returns, every record in the
/// batch is visible to `snapshot`, and before that none is.
#[async_trait]
pub trait RawEventStore: Send + Sync {
    async fn append(&self, batch: &ValidatedBatch) -> Result<AppendReceipt>;

    /// Consistent read of everything a refresh of `range` needs, with
    /// touchpoints reaching `lookback` before the range start.
    async fn snapshot(&self, range: DateRange, lookback: Duration) -> Result<RawSnapshot>;

    /// Cheap liveness probe that reads no business data.
    async fn ping(&self) -> Result<()>;
}

/// Everything one refresh publishes for its range.
#[derive(Debug, Clone)]
pub struct DerivedCommit {
    pub range: DateRange,
    pub attribution: AttributionSet,
    pub rollups: RollupSet,
}

/// Derived tables: attribution records and rollups.
///
/// `publish` replaces all derived rows dated inside the commit's range;
/// readers see either the old or the new state, never a mix.
#[async_trait]
pub trait DerivedStore: Send + Sync {
    async fn publish(&self, commit: &DerivedCommit) -> Result<()>;

    /// Stored attribution of the given users, for installs before `before`.
    async fn prior_attribution(
        &self,
        org_user_ids: &[String],
        before: NaiveDate,
    ) -> Result<Vec<AttributionRecord>>;

    async fn attributed_installs(&self, range: Option<DateRange>) -> Result<Vec<AttributionRecord>>;

    /// Installs grouped by `(attribution_type, network)`.
    async fn attribution_summary(&self) -> Result<Vec<AttributionSummaryRow>>;

    async fn daily_overview(&self, range: DateRange) -> Result<Vec<DailyOverviewRow>>;

    async fn overview_totals(&self, range: Option<DateRange>) -> Result<OverviewTotals>;

    async fn ping(&self) -> Result<()>;
}
