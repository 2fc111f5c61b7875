//! Downstream cache refresh after committed refreshes.
//!
//! Each commit is POSTed as JSON to every configured endpoint. Failures are
//! retried with backoff, then counted and logged; they never reach the
//! refresh caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use engine_core::{Error, Result};
use event_store::RetryPolicy;
use telemetry::metrics;

use crate::refresh::RefreshCommitted;

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRefreshConfig {
    /// URLs to POST to after each commit
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for CacheRefreshConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Posts commit notifications to downstream caches.
#[derive(Clone)]
pub struct CacheNotifier {
    client: reqwest::Client,
    config: CacheRefreshConfig,
}

impl CacheNotifier {
    pub fn new(config: CacheRefreshConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::internal(format!("cache refresh client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.endpoints.is_empty()
    }

    /// Notifies every endpoint; returns whether all of them accepted.
    pub async fn notify(&self, commit: &RefreshCommitted) -> bool {
        let mut all_ok = true;
        for url in &self.config.endpoints {
            if self.post_with_retry(url, commit).await {
                metrics().cache_notifications_sent.inc();
            } else {
                metrics().cache_notifications_failed.inc();
                all_ok = false;
            }
        }
        all_ok
    }

    async fn post_with_retry(&self, url: &str, commit: &RefreshCommitted) -> bool {
        let max_attempts = self.config.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let outcome = self
                .client
                .post(url)
                .json(commit)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match outcome {
                Ok(_) => {
                    debug!(url = url, range = %commit.range, "Cache refresh triggered");
                    return true;
                }
                Err(e) if attempt < max_attempts => {
                    let backoff = self.config.retry.backoff(attempt);
                    warn!(
                        url = url,
                        attempt = attempt,
                        backoff_ms = %backoff.as_millis(),
                        error = %e,
                        "Cache refresh failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(url = url, attempts = attempt, error = %e, "Cache refresh failed");
                }
            }
        }
        false
    }

    /// Forwards every commit on `commits` until the sender is dropped.
    pub fn spawn(self, mut commits: broadcast::Receiver<RefreshCommitted>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(endpoints = self.config.endpoints.len(), "Cache refresh notifier started");
            loop {
                match commits.recv().await {
                    Ok(commit) => {
                        self.notify(&commit).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed = missed, "Cache notifier lagged behind commits");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
