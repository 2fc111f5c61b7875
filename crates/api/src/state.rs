//! Application state shared across handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_core::{AttributionSummaryRow, DateRange, OverviewTotals};
use event_store::{DerivedStore, IngestFunnel, RawEventStore};
use moka::future::Cache;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use worker::RefreshOrchestrator;

/// Cache TTL for query responses.
const QUERY_CACHE_TTL: Duration = Duration::from_secs(5);

const QUERY_CACHE_MAX_CAPACITY: u64 = 1_000;

/// Short-lived cache of read-side query results.
///
/// Entries are keyed by the commit generation current when their read
/// started. A commit bumps the generation, so a read that raced with it can
/// only fill an entry nobody looks up any more.
#[derive(Clone)]
pub struct QueryCache {
    generation: Arc<AtomicU64>,
    summary: Cache<u64, Arc<Vec<AttributionSummaryRow>>>,
    totals: Cache<(u64, Option<DateRange>), OverviewTotals>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            summary: Cache::builder().max_capacity(16).time_to_live(ttl).build(),
            totals: Cache::builder()
                .max_capacity(QUERY_CACHE_MAX_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Read before querying the store; pass to the lookup and the fill.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn summary(&self, generation: u64) -> Option<Arc<Vec<AttributionSummaryRow>>> {
        self.summary.get(&generation).await
    }

    pub async fn put_summary(&self, generation: u64, rows: Arc<Vec<AttributionSummaryRow>>) {
        self.summary.insert(generation, rows).await;
    }

    pub async fn totals(&self, generation: u64, range: Option<DateRange>) -> Option<OverviewTotals> {
        self.totals.get(&(generation, range)).await
    }

    pub async fn put_totals(&self, generation: u64, range: Option<DateRange>, totals: OverviewTotals) {
        self.totals.insert((generation, range), totals).await;
    }

    /// Called once a commit is visible in the derived store.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.summary.invalidate_all();
        self.totals.invalidate_all();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QUERY_CACHE_TTL)
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub funnel: IngestFunnel,
    pub orchestrator: RefreshOrchestrator,
    pub raw: Arc<dyn RawEventStore>,
    pub derived: Arc<dyn DerivedStore>,
    pub cache: QueryCache,
}

impl AppState {
    pub fn new(
        funnel: IngestFunnel,
        orchestrator: RefreshOrchestrator,
        raw: Arc<dyn RawEventStore>,
        derived: Arc<dyn DerivedStore>,
    ) -> Self {
        Self {
            funnel,
            orchestrator,
            raw,
            derived,
            cache: QueryCache::default(),
        }
    }

    /// Clears the query cache after every committed refresh, including
    /// scheduled ones.
    pub fn start_cache_invalidation(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.cache.clone();
        let mut commits = self.orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match commits.recv().await {
                    Ok(commit) => {
                        debug!(range = %commit.range, "Invalidating query cache");
                        cache.invalidate_all();
                    }
                    Err(RecvError::Lagged(_)) => cache.invalidate_all(),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
