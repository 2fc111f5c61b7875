//! Internal metrics collection.
//!
//! Collects metrics in-memory; the worker scheduler logs a snapshot periodically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Up/down gauge, floored at zero.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    /// Increments now and decrements when the guard drops.
    pub fn track(&self) -> GaugeGuard<'_> {
        self.inc();
        GaugeGuard(self)
    }
}

pub struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Millisecond latency histogram with fixed upper bounds.
///
/// The last bucket also takes everything above its bound.
#[derive(Debug)]
pub struct Histogram {
    buckets: [AtomicU64; 12],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    /// Refreshes run from milliseconds (one quiet day in memory) to minutes
    /// (a trailing week against ClickHouse).
    const BUCKET_BOUNDS: [u64; 12] = [1, 5, 10, 25, 50, 100, 250, 500, 1_000, 5_000, 30_000, 120_000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let last = Self::BUCKET_BOUNDS.len() - 1;
        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(last);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Upper bound of the bucket holding the `q` quantile; 0 when empty.
    pub fn quantile(&self, q: f64) -> u64 {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        let rank = ((count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (bound, bucket) in Self::BUCKET_BOUNDS.iter().zip(&self.buckets) {
            seen += bucket.load(Ordering::Relaxed);
            if seen >= rank {
                return *bound;
            }
        }
        Self::BUCKET_BOUNDS[Self::BUCKET_BOUNDS.len() - 1]
    }
}

/// Collected metrics for the attribution engine.
#[derive(Debug, Default)]
pub struct Metrics {
    // Ingestion funnel
    pub records_received: Counter,
    pub records_accepted: Counter,
    pub records_rejected: Counter,
    pub batches_received: Counter,
    pub batches_rejected: Counter,

    // Redpanda consumer
    pub records_consumed: Counter,
    pub consumer_errors: Counter,

    // Storage
    pub store_retries: Counter,
    pub store_errors: Counter,

    // Refresh orchestrator
    pub refreshes_started: Counter,
    pub refreshes_committed: Counter,
    pub refreshes_failed: Counter,
    pub refreshes_inconsistent: Counter,
    pub refresh_timeouts: Counter,
    pub installs_attributed: Counter,
    pub records_skipped: Counter,

    // Downstream cache refresh
    pub cache_notifications_sent: Counter,
    pub cache_notifications_failed: Counter,

    // Latency histograms
    pub ingest_latency_ms: Histogram,
    pub refresh_latency_ms: Histogram,
    pub store_latency_ms: Histogram,

    // Gauges
    pub refreshes_in_flight: Gauge,
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub records_received: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub batches_rejected: u64,
    pub records_consumed: u64,
    pub store_retries: u64,
    pub refreshes_committed: u64,
    pub refreshes_failed: u64,
    pub refresh_timeouts: u64,
    pub installs_attributed: u64,
    pub cache_notifications_failed: u64,
    pub ingest_latency_mean_ms: f64,
    pub refresh_latency_mean_ms: f64,
    pub refresh_latency_p95_ms: u64,
    pub store_latency_mean_ms: f64,
    pub refreshes_in_flight: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            records_received: self.records_received.get(),
            records_accepted: self.records_accepted.get(),
            records_rejected: self.records_rejected.get(),
            batches_rejected: self.batches_rejected.get(),
            records_consumed: self.records_consumed.get(),
            store_retries: self.store_retries.get(),
            refreshes_committed: self.refreshes_committed.get(),
            refreshes_failed: self.refreshes_failed.get(),
            refresh_timeouts: self.refresh_timeouts.get(),
            installs_attributed: self.installs_attributed.get(),
            cache_notifications_failed: self.cache_notifications_failed.get(),
            ingest_latency_mean_ms: self.ingest_latency_ms.mean(),
            refresh_latency_mean_ms: self.refresh_latency_ms.mean(),
            refresh_latency_p95_ms: self.refresh_latency_ms.quantile(0.95),
            store_latency_mean_ms: self.store_latency_ms.mean(),
            refreshes_in_flight: self.refreshes_in_flight.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::default);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
