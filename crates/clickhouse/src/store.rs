//! ClickHouse-backed raw and derived stores.

use crate::client::ClickHouseClient;
use crate::insert::{
    insert_as, AppEventRow, AttributionRow, DailyOverviewChRow, InstallsBaseChRow, TouchpointRow,
    UserDailyAppOpensChRow, UserDailyEventsAttributedChRow, UserDailyEventsChRow,
    UserDxActivityChRow, UserDxAttributedChRow,
};
use crate::query;
use crate::schema::{derived_tables, staging_table, ATTRIBUTED_INSTALLS};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use engine_core::rollup::DailyOverviewRow;
use engine_core::{
    AttributionRecord, AttributionSummaryRow, DateRange, OverviewTotals, RawSnapshot, Result,
    RollupStage, ValidatedBatch,
};
use event_store::{AppendReceipt, DerivedCommit, DerivedStore, RawEventStore};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Both stores on one ClickHouse database.
///
/// Raw appends are one INSERT per table. A publish loads every derived table's
/// staging twin and then swaps each day of the range in with
/// `REPLACE PARTITION`, so readers see a day either before or after the swap.
pub struct ClickHouseStore {
    client: ClickHouseClient,
    publish_lock: Mutex<()>,
}

impl ClickHouseStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self {
            client,
            publish_lock: Mutex::new(()),
        }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    async fn stage(&self, commit: &DerivedCommit) -> Result<()> {
        let c = &self.client;
        let r = &commit.rollups;

        for (table, _) in derived_tables() {
            c.execute(&format!("TRUNCATE TABLE IF EXISTS {}", staging_table(table)))
                .await?;
        }

        insert_as::<_, AttributionRow>(c, &staging_table(ATTRIBUTED_INSTALLS), &commit.attribution.records).await?;
        insert_as::<_, InstallsBaseChRow>(c, &staging_table(RollupStage::InstallsBase.table()), &r.installs_base)
            .await?;
        insert_as::<_, UserDailyAppOpensChRow>(
            c,
            &staging_table(RollupStage::UserDailyAppOpens.table()),
            &r.user_daily_app_opens,
        )
        .await?;
        insert_as::<_, UserDxActivityChRow>(
            c,
            &staging_table(RollupStage::UserDxActivity.table()),
            &r.user_dx_activity,
        )
        .await?;
        insert_as::<_, UserDxAttributedChRow>(
            c,
            &staging_table(RollupStage::UserDxAttributed.table()),
            &r.user_dx_attributed,
        )
        .await?;
        insert_as::<_, UserDailyEventsChRow>(
            c,
            &staging_table(RollupStage::UserDailyEvents.table()),
            &r.user_daily_events,
        )
        .await?;
        insert_as::<_, UserDailyEventsAttributedChRow>(
            c,
            &staging_table(RollupStage::UserDailyEventsAttributed.table()),
            &r.user_daily_events_attributed,
        )
        .await?;
        insert_as::<_, DailyOverviewChRow>(
            c,
            &staging_table(RollupStage::DailyOverview.table()),
            &r.daily_overview,
        )
        .await?;
        Ok(())
    }

    async fn swap_day(&self, table: &str, day: NaiveDate) -> Result<()> {
        self.client
            .execute(&format!(
                "ALTER TABLE {} REPLACE PARTITION toDate('{}') FROM {}",
                table,
                day.format("%Y-%m-%d"),
                staging_table(table)
            ))
            .await
    }
}

#[async_trait]
impl RawEventStore for ClickHouseStore {
    async fn append(&self, batch: &ValidatedBatch) -> Result<AppendReceipt> {
        let c = &self.client;
        insert_as::<_, TouchpointRow>(c, "impressions", batch.impressions()).await?;
        insert_as::<_, TouchpointRow>(c, "clicks", batch.clicks()).await?;
        insert_as::<_, AppEventRow>(c, "events", batch.app_events()).await?;
        Ok(AppendReceipt::for_batch(batch))
    }

    async fn snapshot(&self, range: DateRange, lookback: Duration) -> Result<RawSnapshot> {
        query::fetch_snapshot(&self.client, range, lookback).await
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }
}

#[async_trait]
impl DerivedStore for ClickHouseStore {
    async fn publish(&self, commit: &DerivedCommit) -> Result<()> {
        let _guard = self.publish_lock.lock().await;

        self.stage(commit).await?;

        // Days absent from staging become empty partitions after the swap.
        for (table, _) in derived_tables() {
            for day in commit.range.days() {
                self.swap_day(table, day).await?;
            }
        }

        info!(
            range = %commit.range,
            installs = commit.attribution.len(),
            overview_rows = commit.rollups.daily_overview.len(),
            "Published derived tables"
        );
        Ok(())
    }

    async fn prior_attribution(
        &self,
        org_user_ids: &[String],
        before: NaiveDate,
    ) -> Result<Vec<AttributionRecord>> {
        let records = query::prior_attribution(&self.client, org_user_ids, before).await?;
        debug!(requested = org_user_ids.len(), found = records.len(), "Prior attribution");
        Ok(records)
    }

    async fn attributed_installs(&self, range: Option<DateRange>) -> Result<Vec<AttributionRecord>> {
        query::attributed_installs(&self.client, range).await
    }

    async fn attribution_summary(&self) -> Result<Vec<AttributionSummaryRow>> {
        query::attribution_summary(&self.client).await
    }

    async fn daily_overview(&self, range: DateRange) -> Result<Vec<DailyOverviewRow>> {
        query::daily_overview(&self.client, range).await
    }

    async fn overview_totals(&self, range: Option<DateRange>) -> Result<OverviewTotals> {
        query::overview_totals(&self.client, range).await
    }

    async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }
}
