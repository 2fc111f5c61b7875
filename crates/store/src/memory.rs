//! In-process store used by tests and single-node runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use parking_lot::RwLock;
use tracing::debug;

use engine_core::events::{AppEvent, Touchpoint};
use engine_core::rollup::{
    DailyOverviewRow, InstallsBaseRow, UserDailyAppOpensRow, UserDailyEventsAttributedRow,
    UserDailyEventsRow, UserDxActivityRow, UserDxAttributedRow,
};
use engine_core::{
    overview_totals, summarize_attribution, AttributionRecord, AttributionSummaryRow, DateRange,
    OverviewTotals, RawSnapshot, Result, ValidatedBatch,
};

use crate::store::{AppendReceipt, DerivedCommit, DerivedStore, RawEventStore};

#[derive(Debug, Default)]
struct RawTables {
    impressions: Vec<Touchpoint>,
    clicks: Vec<Touchpoint>,
    app_events: Vec<AppEvent>,
}

#[derive(Debug, Default, Clone)]
struct DerivedTables {
    /// Keyed by `org_user_id`; one record per user.
    attributed_installs: BTreeMap<String, AttributionRecord>,
    installs_base: Vec<InstallsBaseRow>,
    user_daily_app_opens: Vec<UserDailyAppOpensRow>,
    user_dx_activity: Vec<UserDxActivityRow>,
    user_dx_attributed: Vec<UserDxAttributedRow>,
    user_daily_events: Vec<UserDailyEventsRow>,
    user_daily_events_attributed: Vec<UserDailyEventsAttributedRow>,
    daily_overview: Vec<DailyOverviewRow>,
}

/// Drops rows dated inside `range`, then appends the replacements.
fn replace_range<T: Clone>(rows: &mut Vec<T>, range: DateRange, date: impl Fn(&T) -> NaiveDate, new: &[T]) {
    rows.retain(|row| !range.contains(date(row)));
    rows.extend_from_slice(new);
}

impl DerivedTables {
    fn apply(&mut self, commit: &DerivedCommit) {
        let range = commit.range;
        let rollups = &commit.rollups;

        self.attributed_installs
            .retain(|_, r| !range.contains(r.install_date()));
        for record in &commit.attribution.records {
            self.attributed_installs
                .insert(record.org_user_id.clone(), record.clone());
        }

        replace_range(&mut self.installs_base, range, |r| r.date, &rollups.installs_base);
        replace_range(&mut self.user_daily_app_opens, range, |r| r.date, &rollups.user_daily_app_opens);
        replace_range(&mut self.user_dx_activity, range, |r| r.activity_date, &rollups.user_dx_activity);
        replace_range(&mut self.user_dx_attributed, range, |r| r.activity_date, &rollups.user_dx_attributed);
        replace_range(&mut self.user_daily_events, range, |r| r.date, &rollups.user_daily_events);
        replace_range(
            &mut self.user_daily_events_attributed,
            range,
            |r| r.date,
            &rollups.user_daily_events_attributed,
        );
        replace_range(&mut self.daily_overview, range, |r| r.date, &rollups.daily_overview);
    }
}

/// Memory-backed raw and derived store.
///
/// Raw tables are append-only vectors behind one lock, so a snapshot taken
/// under the read lock never sees half a batch. Derived tables are an
/// immutable `Arc` swapped whole on publish.
#[derive(Debug, Default)]
pub struct MemoryStore {
    raw: RwLock<RawTables>,
    derived: RwLock<Arc<DerivedTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn derived(&self) -> Arc<DerivedTables> {
        self.derived.read().clone()
    }

    /// Raw row counts: `(impressions, clicks, app_events)`.
    pub fn raw_counts(&self) -> (usize, usize, usize) {
        let raw = self.raw.read();
        (raw.impressions.len(), raw.clicks.len(), raw.app_events.len())
    }

    pub fn installs_base(&self) -> Vec<InstallsBaseRow> {
        self.derived().installs_base.clone()
    }

    pub fn user_dx_attributed(&self) -> Vec<UserDxAttributedRow> {
        self.derived().user_dx_attributed.clone()
    }

    pub fn user_daily_events_attributed(&self) -> Vec<UserDailyEventsAttributedRow> {
        self.derived().user_daily_events_attributed.clone()
    }
}

#[async_trait]
impl RawEventStore for MemoryStore {
    async fn append(&self, batch: &ValidatedBatch) -> Result<AppendReceipt> {
        let mut raw = self.raw.write();
        raw.impressions.extend_from_slice(batch.impressions());
        raw.clicks.extend_from_slice(batch.clicks());
        raw.app_events.extend_from_slice(batch.app_events());
        Ok(AppendReceipt::for_batch(batch))
    }

    async fn snapshot(&self, range: DateRange, lookback: Duration) -> Result<RawSnapshot> {
        let raw = self.raw.read();
        let snapshot = RawSnapshot::from_tables(range, lookback, &raw.impressions, &raw.clicks, &raw.app_events);
        debug!(range = %range, records = snapshot.len(), "memory snapshot");
        Ok(snapshot)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DerivedStore for MemoryStore {
    async fn publish(&self, commit: &DerivedCommit) -> Result<()> {
        let mut current = self.derived.write();
        let mut next = DerivedTables::clone(&current);
        next.apply(commit);
        *current = Arc::new(next);
        Ok(())
    }

    async fn prior_attribution(
        &self,
        org_user_ids: &[String],
        before: NaiveDate,
    ) -> Result<Vec<AttributionRecord>> {
        let wanted: HashSet<&str> = org_user_ids.iter().map(String::as_str).collect();
        let derived = self.derived();
        Ok(derived
            .attributed_installs
            .values()
            .filter(|r| wanted.contains(r.org_user_id.as_str()) && r.install_date() < before)
            .cloned()
            .collect())
    }

    async fn attributed_installs(&self, range: Option<DateRange>) -> Result<Vec<AttributionRecord>> {
        let derived = self.derived();
        let mut records: Vec<AttributionRecord> = derived
            .attributed_installs
            .values()
            .filter(|r| range.map_or(true, |range| range.contains(r.install_date())))
            .cloned()
            .collect();
        records.sort_by(|a, b| (a.attributed_at, &a.org_user_id).cmp(&(b.attributed_at, &b.org_user_id)));
        Ok(records)
    }

    async fn attribution_summary(&self) -> Result<Vec<AttributionSummaryRow>> {
        let derived = self.derived();
        Ok(summarize_attribution(derived.attributed_installs.values()))
    }

    async fn daily_overview(&self, range: DateRange) -> Result<Vec<DailyOverviewRow>> {
        let derived = self.derived();
        let mut rows: Vec<DailyOverviewRow> = derived
            .daily_overview
            .iter()
            .filter(|r| range.contains(r.date))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.date, &a.store_id, &a.network, &a.campaign_id).cmp(&(b.date, &b.store_id, &b.network, &b.campaign_id))
        });
        Ok(rows)
    }

    async fn overview_totals(&self, range: Option<DateRange>) -> Result<OverviewTotals> {
        let derived = self.derived();
        Ok(overview_totals(
            derived
                .daily_overview
                .iter()
                .filter(|r| range.map_or(true, |range| range.contains(r.date))),
        ))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
