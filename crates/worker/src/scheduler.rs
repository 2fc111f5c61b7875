//! Worker scheduler for background tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use engine_core::DateRange;
use event_store::IngestFunnel;
use redpanda::Consumer;
use telemetry::metrics;

use crate::cache_refresh::CacheNotifier;
use crate::consumer::{ConsumerWorker, ConsumerWorkerConfig};
use crate::refresh::{RefreshMode, RefreshOrchestrator};

/// A periodic refresh of today and the `lookback_days` before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSchedule {
    pub name: String,
    pub interval_secs: u64,
    pub lookback_days: u32,
}

impl RefreshSchedule {
    pub fn new(name: impl Into<String>, interval_secs: u64, lookback_days: u32) -> Self {
        Self {
            name: name.into(),
            interval_secs,
            lookback_days,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Range covered by a tick at `today`.
    pub fn range(&self, today: chrono::NaiveDate) -> DateRange {
        DateRange::trailing(today, self.lookback_days)
    }
}

fn default_schedules() -> Vec<RefreshSchedule> {
    vec![
        RefreshSchedule::new("intraday", 60, 1),
        RefreshSchedule::new("trailing", 3600, 7),
    ]
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

fn default_consumer_error_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_schedules")]
    pub schedules: Vec<RefreshSchedule>,
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,
    /// Pause after a failed Redpanda fetch or ingest
    #[serde(default = "default_consumer_error_backoff_ms")]
    pub consumer_error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            schedules: default_schedules(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
            consumer_error_backoff_ms: default_consumer_error_backoff_ms(),
        }
    }
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    orchestrator: RefreshOrchestrator,
    consumer: Option<(Arc<Consumer>, IngestFunnel)>,
    notifier: Option<CacheNotifier>,
}

impl WorkerScheduler {
    pub fn new(config: WorkerConfig, orchestrator: RefreshOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
            consumer: None,
            notifier: None,
        }
    }

    /// Adds the Redpanda → funnel pipeline.
    pub fn with_consumer(mut self, consumer: Arc<Consumer>, funnel: IngestFunnel) -> Self {
        self.consumer = Some((consumer, funnel));
        self
    }

    pub fn with_cache_notifier(mut self, notifier: CacheNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Starts all background workers.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some((consumer, funnel)) = self.consumer.clone() {
            let worker = ConsumerWorker::new(consumer, funnel).with_config(ConsumerWorkerConfig {
                error_backoff: Duration::from_millis(self.config.consumer_error_backoff_ms),
            });
            handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
            info!("Consumer worker started");
        }

        if let Some(notifier) = self.notifier.clone().filter(CacheNotifier::is_enabled) {
            handles.push(notifier.spawn(self.orchestrator.subscribe()));
        }

        for schedule in self.config.schedules.clone() {
            let scheduler = self.clone();
            info!(
                schedule = %schedule.name,
                interval_secs = schedule.interval_secs,
                lookback_days = schedule.lookback_days,
                "Refresh schedule started"
            );
            handles.push(tokio::spawn(async move {
                scheduler.run_schedule(schedule).await;
            }));
        }

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_log().await;
        }));

        info!("Background workers started");
        handles
    }

    async fn run_schedule(&self, schedule: RefreshSchedule) {
        let mut ticker = interval(schedule.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let range = schedule.range(Utc::now().date_naive());
            let busy = self
                .orchestrator
                .tokens()
                .held()
                .iter()
                .any(|held| held.overlaps(&range));
            if busy {
                debug!(schedule = %schedule.name, range = %range, "Overlapping refresh in flight, skipping tick");
                continue;
            }

            if let Err(e) = self.orchestrator.refresh(range, RefreshMode::Scheduled).await {
                error!(schedule = %schedule.name, "Scheduled refresh error: {}", e);
            }
        }
    }

    async fn run_metrics_log(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.metrics_log_interval_secs.max(1)));

        loop {
            ticker.tick().await;
            let s = metrics().snapshot();
            info!(
                records_received = s.records_received,
                records_accepted = s.records_accepted,
                records_rejected = s.records_rejected,
                records_consumed = s.records_consumed,
                store_retries = s.store_retries,
                refreshes_committed = s.refreshes_committed,
                refreshes_failed = s.refreshes_failed,
                refresh_timeouts = s.refresh_timeouts,
                installs_attributed = s.installs_attributed,
                cache_notifications_failed = s.cache_notifications_failed,
                refresh_latency_mean_ms = s.refresh_latency_mean_ms,
                refresh_latency_p95_ms = s.refresh_latency_p95_ms,
                refreshes_in_flight = s.refreshes_in_flight,
                "Metrics"
            );
        }
    }
}
