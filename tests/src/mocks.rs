//! Store doubles for failure-path and concurrency tests.
//!
//! The wrapping doubles delegate to a [`MemoryStore`] and implement the raw
//! and derived store traits, so they drop into [`AppState`](api::AppState)
//! in its place.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use engine_core::rollup::DailyOverviewRow;
use engine_core::{
    AttributionRecord, AttributionSummaryRow, DateRange, Error, OverviewTotals, RawSnapshot,
    Result, ValidatedBatch,
};
use event_store::{AppendReceipt, DerivedCommit, DerivedStore, MemoryStore, RawEventStore};
use parking_lot::Mutex;

/// Fails the next `n` snapshot and publish calls with `Unavailable`.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures_left: Mutex<u32>,
    failures_seen: Mutex<u32>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: Mutex::new(failures),
            failures_seen: Mutex::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// Failures returned so far.
    pub fn failures_seen(&self) -> u32 {
        *self.failures_seen.lock()
    }

    pub fn fail_next(&self, n: u32) {
        *self.failures_left.lock() = n;
    }

    fn maybe_fail(&self, op: &str) -> Result<()> {
        let mut left = self.failures_left.lock();
        if *left == 0 {
            return Ok(());
        }
        *left -= 1;
        *self.failures_seen.lock() += 1;
        Err(Error::unavailable(format!("{}: injected failure", op)))
    }
}

#[async_trait]
impl RawEventStore for FlakyStore {
    async fn append(&self, batch: &ValidatedBatch) -> Result<AppendReceipt> {
        self.inner.append(batch).await
    }

    async fn snapshot(&self, range: DateRange, lookback: Duration) -> Result<RawSnapshot> {
        self.maybe_fail("snapshot")?;
        self.inner.snapshot(range, lookback).await
    }

    async fn ping(&self) -> Result<()> {
        RawEventStore::ping(self.inner.as_ref()).await
    }
}

#[async_trait]
impl DerivedStore for FlakyStore {
    async fn publish(&self, commit: &DerivedCommit) -> Result<()> {
        self.maybe_fail("publish")?;
        self.inner.publish(commit).await
    }

    async fn prior_attribution(
        &self,
        org_user_ids: &[String],
        before: NaiveDate,
    ) -> Result<Vec<AttributionRecord>> {
        self.inner.prior_attribution(org_user_ids, before).await
    }

    async fn attributed_installs(&self, range: Option<DateRange>) -> Result<Vec<AttributionRecord>> {
        self.inner.attributed_installs(range).await
    }

    async fn attribution_summary(&self) -> Result<Vec<AttributionSummaryRow>> {
        self.inner.attribution_summary().await
    }

    async fn daily_overview(&self, range: DateRange) -> Result<Vec<DailyOverviewRow>> {
        self.inner.daily_overview(range).await
    }

    async fn overview_totals(&self, range: Option<DateRange>) -> Result<OverviewTotals> {
        self.inner.overview_totals(range).await
    }

    async fn ping(&self) -> Result<()> {
        DerivedStore::ping(self.inner.as_ref()).await
    }
}

/// Counts refreshes between their snapshot and their publish.
///
/// Each snapshot is held for `hold` so that runs allowed to overlap do.
pub struct OverlapStore {
    inner: Arc<MemoryStore>,
    hold: std::time::Duration,
    active: Mutex<usize>,
    peak: Mutex<usize>,
}

impl OverlapStore {
    pub fn new(inner: Arc<MemoryStore>, hold: std::time::Duration) -> Self {
        Self {
            inner,
            hold,
            active: Mutex::new(0),
            peak: Mutex::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// Most runs ever seen inside a snapshot-to-publish window at once.
    pub fn peak(&self) -> usize {
        *self.peak.lock()
    }
}

#[async_trait]
impl RawEventStore for OverlapStore {
    async fn append(&self, batch: &ValidatedBatch) -> Result<AppendReceipt> {
        self.inner.append(batch).await
    }

    async fn snapshot(&self, range: DateRange, lookback: Duration) -> Result<RawSnapshot> {
        {
            let mut active = self.active.lock();
            *active += 1;
            let mut peak = self.peak.lock();
            *peak = (*peak).max(*active);
        }
        tokio::time::sleep(self.hold).await;
        self.inner.snapshot(range, lookback).await
    }

    async fn ping(&self) -> Result<()> {
        RawEventStore::ping(self.inner.as_ref()).await
    }
}

#[async_trait]
impl DerivedStore for OverlapStore {
    async fn publish(&self, commit: &DerivedCommit) -> Result<()> {
        let result = self.inner.publish(commit).await;
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        result
    }

    async fn prior_attribution(
        &self,
        org_user_ids: &[String],
        before: NaiveDate,
    ) -> Result<Vec<AttributionRecord>> {
        self.inner.prior_attribution(org_user_ids, before).await
    }

    async fn attributed_installs(&self, range: Option<DateRange>) -> Result<Vec<AttributionRecord>> {
        self.inner.attributed_installs(range).await
    }

    async fn attribution_summary(&self) -> Result<Vec<AttributionSummaryRow>> {
        self.inner.attribution_summary().await
    }

    async fn daily_overview(&self, range: DateRange) -> Result<Vec<DailyOverviewRow>> {
        self.inner.daily_overview(range).await
    }

    async fn overview_totals(&self, range: Option<DateRange>) -> Result<OverviewTotals> {
        self.inner.overview_totals(range).await
    }

    async fn ping(&self) -> Result<()> {
        DerivedStore::ping(self.inner.as_ref()).await
    }
}

/// A derived store whose every call fails with `Unavailable`.
#[derive(Debug, Default)]
pub struct DownStore;

impl DownStore {
    fn down<T>() -> Result<T> {
        Err(Error::unavailable("derived store is down"))
    }
}

#[async_trait]
impl DerivedStore for DownStore {
    async fn publish(&self, _commit: &DerivedCommit) -> Result<()> {
        Self::down()
    }

    async fn prior_attribution(
        &self,
        _org_user_ids: &[String],
        _before: NaiveDate,
    ) -> Result<Vec<AttributionRecord>> {
        Self::down()
    }

    async fn attributed_installs(&self, _range: Option<DateRange>) -> Result<Vec<AttributionRecord>> {
        Self::down()
    }

    async fn attribution_summary(&self) -> Result<Vec<AttributionSummaryRow>> {
        Self::down()
    }

    async fn daily_overview(&self, _range: DateRange) -> Result<Vec<DailyOverviewRow>> {
        Self::down()
    }

    async fn overview_totals(&self, _range: Option<DateRange>) -> Result<OverviewTotals> {
        Self::down()
    }

    async fn ping(&self) -> Result<()> {
        Self::down()
    }
}
