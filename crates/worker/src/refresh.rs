//! Refresh orchestration: snapshot → resolve → aggregate → publish.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use engine_core::{
    AggregationEngine, AggregationInput, AttributionConfig, AttributionResolver, DateRange, Error,
    ErrorKind, Result, RollupConfig, ValidationErrorCode,
};
use event_store::{DerivedCommit, DerivedStore, RawEventStore, RetryPolicy};
use telemetry::metrics;

use crate::range_lock::RangeTokens;

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_range_days() -> u32 {
    366
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default)]
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Wait used by immediate refreshes that name no timeout
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Longest range a single refresh may recompute
    #[serde(default = "default_max_range_days")]
    pub max_range_days: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            attribution: AttributionConfig::default(),
            rollup: RollupConfig::default(),
            retry: RetryPolicy::default(),
            default_timeout_ms: default_timeout_ms(),
            max_range_days: default_max_range_days(),
        }
    }
}

impl RefreshConfig {
    /// How far before a range start the snapshot reads touchpoints: the
    /// attribution window behind the oldest install whose day-N activity can
    /// still fall in range.
    pub fn snapshot_lookback(&self) -> chrono::Duration {
        self.attribution.lookback() + chrono::Duration::days(i64::from(self.rollup.max_dx))
    }

    /// Rejects ranges a refresh cannot process.
    pub fn check_range(&self, range: DateRange) -> Result<()> {
        if range.num_days() > i64::from(self.max_range_days) {
            return Err(Error::validation(
                ValidationErrorCode::InvalidFormat,
                format!(
                    "range {} spans {} days, more than the {} allowed",
                    range,
                    range.num_days(),
                    self.max_range_days
                ),
            ));
        }
        if range.start_time().checked_sub_signed(self.snapshot_lookback()).is_none() {
            return Err(Error::validation(
                ValidationErrorCode::InvalidFormat,
                format!("range {} starts too early", range),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Run in the background; the call returns once the run is accepted.
    Scheduled,
    /// Run the whole chain and wait up to `timeout` for the commit.
    Immediate { timeout: Duration },
}

/// What a committed run published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub range: DateRange,
    pub attributed: usize,
    pub skipped: usize,
    pub overview_rows: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshStatus {
    Committed(RefreshSummary),
    Accepted,
}

/// Broadcast after every committed refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshCommitted {
    pub range: DateRange,
    pub committed_at: DateTime<Utc>,
}

struct Inner {
    raw: Arc<dyn RawEventStore>,
    derived: Arc<dyn DerivedStore>,
    resolver: AttributionResolver,
    engine: AggregationEngine,
    config: RefreshConfig,
    tokens: RangeTokens,
    commits: broadcast::Sender<RefreshCommitted>,
}

/// Drives attribution and rollups for date ranges.
///
/// Overlapping ranges never recompute concurrently; see [`RangeTokens`].
#[derive(Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<Inner>,
}

impl RefreshOrchestrator {
    pub fn new(
        raw: Arc<dyn RawEventStore>,
        derived: Arc<dyn DerivedStore>,
        config: RefreshConfig,
    ) -> Result<Self> {
        let (commits, _) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(Inner {
                raw,
                derived,
                resolver: AttributionResolver::new(config.attribution)?,
                engine: AggregationEngine::new(config.rollup)?,
                config,
                tokens: RangeTokens::new(),
                commits,
            }),
        })
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.default_timeout_ms)
    }

    /// Receives a message per committed refresh.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshCommitted> {
        self.inner.commits.subscribe()
    }

    pub fn tokens(&self) -> &RangeTokens {
        &self.inner.tokens
    }

    /// Recomputes `range`.
    ///
    /// In `Immediate` mode a timeout returns `Timeout` while the run keeps
    /// going and still commits.
    pub async fn refresh(&self, range: DateRange, mode: RefreshMode) -> Result<RefreshStatus> {
        self.inner.config.check_range(range)?;
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_cycle(range).await });

        match mode {
            RefreshMode::Scheduled => Ok(RefreshStatus::Accepted),
            RefreshMode::Immediate { timeout } => match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => result.map(RefreshStatus::Committed),
                Ok(Err(join)) => Err(Error::internal(format!("refresh task failed: {}", join))),
                Err(_) => {
                    metrics().refresh_timeouts.inc();
                    warn!(range = %range, timeout_ms = %timeout.as_millis(), "Refresh wait timed out");
                    Err(Error::timeout(format!(
                        "refresh of {} still running after {}ms",
                        range,
                        timeout.as_millis()
                    )))
                }
            },
        }
    }

    async fn run_cycle(&self, range: DateRange) -> Result<RefreshSummary> {
        let m = metrics();
        let _token = self.inner.tokens.acquire(range).await;

        m.refreshes_started.inc();
        let in_flight = m.refreshes_in_flight.track();
        let start = Instant::now();
        let result = self.recompute(range, start).await;
        drop(in_flight);
        m.refresh_latency_ms.observe(start.elapsed().as_millis() as u64);

        match &result {
            Ok(summary) => {
                m.refreshes_committed.inc();
                m.installs_attributed.inc_by(summary.attributed as u64);
                info!(
                    range = %range,
                    attributed = summary.attributed,
                    skipped = summary.skipped,
                    duration_ms = summary.duration_ms,
                    "Refresh committed"
                );
                let _ = self.inner.commits.send(RefreshCommitted {
                    range,
                    committed_at: Utc::now(),
                });
            }
            Err(e) if e.kind() == ErrorKind::Inconsistent => {
                m.refreshes_inconsistent.inc();
                warn!(range = %range, error = %e, "Refresh found inconsistent state");
            }
            Err(e) => {
                m.refreshes_failed.inc();
                error!(range = %range, code = e.code(), error = %e, "Refresh failed");
            }
        }
        result
    }

    async fn recompute(&self, range: DateRange, start: Instant) -> Result<RefreshSummary> {
        let inner = &self.inner;
        let retry = inner.config.retry;
        let lookback = inner.config.snapshot_lookback();
        let horizon = inner.config.rollup.max_dx;

        let snapshot = retry
            .run("snapshot", || inner.raw.snapshot(range, lookback))
            .await?;

        let resolution = inner.resolver.resolve_all(&snapshot);
        if resolution.skipped > 0 {
            metrics().records_skipped.inc_by(resolution.skipped as u64);
        }

        let carried = inner.resolver.resolve_carried(&snapshot, horizon);

        // Users active in range who installed before the dx horizon.
        let installed: HashSet<&str> = resolution
            .attribution
            .records
            .iter()
            .chain(carried.iter())
            .map(|r| r.org_user_id.as_str())
            .collect();
        let active: Vec<String> = snapshot
            .app_events
            .iter()
            .map(|e| e.org_user_id.as_str())
            .filter(|user| !installed.contains(user))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut prior = retry
            .run("prior_attribution", || {
                inner.derived.prior_attribution(&active, range.start)
            })
            .await?;
        debug!(range = %range, carried = carried.len(), stored = prior.len(), "Prior installs loaded");
        prior.extend(carried);

        let rollups = inner.engine.aggregate(AggregationInput {
            snapshot: &snapshot,
            attribution: &resolution.attribution,
            prior_attribution: &prior,
        })?;
        for (stage, rows) in rollups.row_counts() {
            debug!(range = %range, table = stage.table(), rows = rows, "Rollup computed");
        }

        let commit = DerivedCommit {
            range,
            attribution: resolution.attribution,
            rollups,
        };
        retry.run("publish", || inner.derived.publish(&commit)).await?;

        Ok(RefreshSummary {
            range,
            attributed: commit.attribution.len(),
            skipped: resolution.skipped,
            overview_rows: commit.rollups.daily_overview.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::schema::validate_batch;
    use engine_core::RecordBatch;
    use event_store::MemoryStore;

    fn orchestrator() -> (Arc<MemoryStore>, RefreshOrchestrator) {
        let store = Arc::new(MemoryStore::new());
        let orch = RefreshOrchestrator::new(store.clone(), store.clone(), RefreshConfig::default()).unwrap();
        (store, orch)
    }

    async fn seed(store: &MemoryStore) {
        let payload = serde_json::json!([
            {"kind": "click", "event_time": "2025-01-15T09:00:00Z", "store_id": "s", "network": "meta", "campaign_id": "c-1", "device_id": "ifa-1"},
            {"kind": "app_event", "event_time": "2025-01-15T10:00:00Z", "store_id": "s", "event_id": "app_open", "device_id": "ifa-1", "org_user_id": "u-1"},
            {"kind": "app_event", "event_time": "2025-01-15T11:00:00Z", "store_id": "s", "event_id": "app_open", "device_id": "ifa-2", "org_user_id": "u-2"}
        ]);
        let batch = RecordBatch::new(serde_json::from_value(payload).unwrap());
        let validated = validate_batch(
            batch,
            "2025-01-16T00:00:00Z".parse().unwrap(),
            chrono::Duration::seconds(300),
        )
        .unwrap();
        store.append(&validated).await.unwrap();
    }

    fn day() -> DateRange {
        DateRange::day("2025-01-15".parse().unwrap())
    }

    #[tokio::test]
    async fn test_immediate_refresh_commits_before_returning() {
        let (store, orch) = orchestrator();
        seed(&store).await;
        let mut commits = orch.subscribe();

        let status = orch
            .refresh(day(), RefreshMode::Immediate { timeout: Duration::from_secs(5) })
            .await
            .unwrap();
        let RefreshStatus::Committed(summary) = status else {
            panic!("expected a committed refresh");
        };
        assert_eq!(summary.attributed, 2);

        let totals = store.overview_totals(Some(day())).await.unwrap();
        assert_eq!(totals.clicks, 1);
        assert_eq!(totals.installs, 2);
        assert_eq!(commits.recv().await.unwrap().range, day());
    }

    #[tokio::test]
    async fn test_immediate_refresh_times_out_but_still_commits() {
        let (store, orch) = orchestrator();
        seed(&store).await;

        // Hold the range so the run cannot start within the deadline.
        let held = orch.tokens().try_acquire(day()).unwrap();
        let err = orch
            .refresh(day(), RefreshMode::Immediate { timeout: Duration::from_millis(20) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "REFRESH_001");

        let mut commits = orch.subscribe();
        drop(held);
        tokio::time::timeout(Duration::from_secs(5), commits.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.attributed_installs(Some(day())).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scheduled_refresh_returns_accepted() {
        let (store, orch) = orchestrator();
        seed(&store).await;
        let mut commits = orch.subscribe();

        let status = orch.refresh(day(), RefreshMode::Scheduled).await.unwrap();
        assert_eq!(status, RefreshStatus::Accepted);
        tokio::time::timeout(Duration::from_secs(5), commits.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.overview_totals(None).await.unwrap().installs, 2);
    }

    #[tokio::test]
    async fn test_ranges_beyond_limits_are_rejected() {
        let (_store, orch) = orchestrator();
        let mode = RefreshMode::Immediate { timeout: Duration::from_secs(5) };

        let centuries = DateRange::new("1800-01-01".parse().unwrap(), "2200-01-01".parse().unwrap()).unwrap();
        let err = orch.refresh(centuries, mode).await.unwrap_err();
        assert_eq!(err.code(), "VALID_003");

        let earliest = DateRange::day(chrono::NaiveDate::MIN);
        let err = orch.refresh(earliest, mode).await.unwrap_err();
        assert_eq!(err.code(), "VALID_003");
        assert!(orch.tokens().held().is_empty());
    }

    #[test]
    fn test_snapshot_lookback_reaches_past_dx_horizon() {
        let config = RefreshConfig::default();
        assert_eq!(
            config.snapshot_lookback(),
            config.attribution.lookback() + chrono::Duration::days(30)
        );
        let year = DateRange::new("2025-01-01".parse().unwrap(), "2026-01-02".parse().unwrap()).unwrap();
        assert!(config.check_range(year).is_ok());
    }
}
