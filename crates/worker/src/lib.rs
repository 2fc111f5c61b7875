//! Background workers for the attribution engine.
//!
//! - Refresh orchestration (range tokens, immediate and scheduled runs)
//! - Refresh schedules and periodic metrics logging
//! - Consumer (Redpanda → Ingestion Funnel)
//! - Downstream cache refresh after each commit

pub mod cache_refresh;
pub mod consumer;
pub mod range_lock;
pub mod refresh;
pub mod scheduler;

pub use cache_refresh::{CacheNotifier, CacheRefreshConfig};
pub use consumer::{ConsumerWorker, ConsumerWorkerConfig};
pub use range_lock::{RangeToken, RangeTokens};
pub use refresh::{
    RefreshCommitted, RefreshConfig, RefreshMode, RefreshOrchestrator, RefreshStatus,
    RefreshSummary,
};
pub use scheduler::{RefreshSchedule, WorkerConfig, WorkerScheduler};
