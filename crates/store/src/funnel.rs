//! Ingestion funnel: validate, stamp, append.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use engine_core::limits::DEFAULT_FUTURE_SKEW_SECS;
use engine_core::schema::{validate_batch, validate_batch_size};
use engine_core::{RecordBatch, Result};
use telemetry::metrics;

use crate::retry::RetryPolicy;
use crate::store::RawEventStore;

fn default_clock_skew_secs() -> i64 {
    DEFAULT_FUTURE_SKEW_SECS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelConfig {
    /// Tolerated lead of `event_time` over the server clock
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: DEFAULT_FUTURE_SKEW_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of an accepted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub accepted: usize,
    pub impressions: usize,
    pub clicks: usize,
    pub app_events: usize,
}

/// Validates batches and appends them to the raw store.
///
/// A batch is all-or-nothing: any invalid record rejects it before the store
/// is touched. Concurrent callers need no coordination beyond the store's
/// per-batch atomicity.
#[derive(Clone)]
pub struct IngestFunnel {
    store: Arc<dyn RawEventStore>,
    config: FunnelConfig,
}

impl IngestFunnel {
    pub fn new(store: Arc<dyn RawEventStore>, config: FunnelConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn RawEventStore> {
        &self.store
    }

    /// Parses and ingests a raw JSON payload.
    pub async fn ingest_bytes(&self, bytes: &[u8]) -> Result<IngestReceipt> {
        let parsed = validate_batch_size(bytes).and_then(|_| RecordBatch::parse(bytes));
        match parsed {
            Ok(batch) => self.ingest(batch).await,
            Err(e) => {
                metrics().batches_received.inc();
                metrics().batches_rejected.inc();
                warn!(code = e.code(), error = %e, "Rejected unparseable batch");
                Err(e)
            }
        }
    }

    /// Validates and appends one batch.
    pub async fn ingest(&self, batch: RecordBatch) -> Result<IngestReceipt> {
        let start = Instant::now();
        let m = metrics();
        let count = batch.len();
        m.batches_received.inc();
        m.records_received.inc_by(count as u64);

        let skew = chrono::Duration::seconds(self.config.clock_skew_secs);
        let validated = match validate_batch(batch, Utc::now(), skew) {
            Ok(v) => v,
            Err(e) => {
                m.batches_rejected.inc();
                m.records_rejected.inc_by(count as u64);
                warn!(
                    code = e.code(),
                    records = count,
                    invalid = e.details().len(),
                    "Rejected batch"
                );
                return Err(e);
            }
        };

        let store_start = Instant::now();
        let appended = self
            .config
            .retry
            .run("append", || self.store.append(&validated))
            .await;
        m.store_latency_ms
            .observe(store_start.elapsed().as_millis() as u64);

        let receipt = match appended {
            Ok(receipt) => receipt,
            Err(e) => {
                m.batches_rejected.inc();
                warn!(records = count, error = %e, "Failed to append batch");
                return Err(e);
            }
        };

        m.records_accepted.inc_by(receipt.total() as u64);
        m.ingest_latency_ms.observe(start.elapsed().as_millis() as u64);
        debug!(
            impressions = receipt.impressions,
            clicks = receipt.clicks,
            app_events = receipt.app_events,
            "Batch appended"
        );

        Ok(IngestReceipt {
            accepted: receipt.total(),
            impressions: receipt.impressions,
            clicks: receipt.clicks,
            app_events: receipt.app_events,
        })
    }
}
