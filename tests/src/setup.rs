//! Common test setup functions.

use std::sync::Arc;

use api::{router, AppState};
use axum::Router;
use event_store::{DerivedStore, FunnelConfig, IngestFunnel, MemoryStore, RawEventStore, RetryPolicy};
use worker::{RefreshConfig, RefreshOrchestrator};

/// Retries fast enough for tests.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

/// Real router and orchestrator over the given stores.
///
/// Runs the same code paths as the binary: the Axum router with all its
/// layers, the ingestion funnel and the refresh orchestrator.
pub struct TestContext {
    pub raw: Arc<dyn RawEventStore>,
    pub derived: Arc<dyn DerivedStore>,
    pub orchestrator: RefreshOrchestrator,
    pub router: Router,
}

impl TestContext {
    /// Context backed by a fresh [`MemoryStore`].
    pub fn new() -> (Arc<MemoryStore>, Self) {
        let store = Arc::new(MemoryStore::new());
        let ctx = Self::with_stores(store.clone(), store.clone(), fast_retry(4));
        (store, ctx)
    }

    pub fn with_stores(
        raw: Arc<dyn RawEventStore>,
        derived: Arc<dyn DerivedStore>,
        retry: RetryPolicy,
    ) -> Self {
        let funnel = IngestFunnel::new(
            raw.clone(),
            FunnelConfig {
                retry,
                ..FunnelConfig::default()
            },
        );
        let orchestrator = RefreshOrchestrator::new(
            raw.clone(),
            derived.clone(),
            RefreshConfig {
                retry,
                ..RefreshConfig::default()
            },
        )
        .expect("default refresh config is valid");

        let state = AppState::new(funnel, orchestrator.clone(), raw.clone(), derived.clone());
        let router = router(state);

        Self {
            raw,
            derived,
            orchestrator,
            router,
        }
    }
}
