//! Consumer worker: Redpanda → Ingestion Funnel.
//!
//! 1. Fetch decoded batches from Redpanda
//! 2. Ingest each through the funnel
//! 3. Commit the offset (at-least-once)
//!
//! Rejected batches are committed past; an unavailable store is not, so the
//! same messages are fetched again after a pause.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use engine_core::{ErrorKind, Result};
use event_store::IngestFunnel;
use redpanda::Consumer;

#[derive(Debug, Clone)]
pub struct ConsumerWorkerConfig {
    /// Pause after a failed fetch or ingest
    pub error_backoff: Duration,
}

impl Default for ConsumerWorkerConfig {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(1),
        }
    }
}

pub struct ConsumerWorker {
    consumer: Arc<Consumer>,
    funnel: IngestFunnel,
    config: ConsumerWorkerConfig,
}

impl ConsumerWorker {
    pub fn new(consumer: Arc<Consumer>, funnel: IngestFunnel) -> Self {
        Self {
            consumer,
            funnel,
            config: ConsumerWorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerWorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs until the task is aborted.
    pub async fn run(&self) {
        info!(
            topic = %self.consumer.config().topic,
            group_id = %self.consumer.config().group_id,
            "Consumer worker starting"
        );

        loop {
            match self.process_batch().await {
                Ok(count) if count > 0 => debug!(count = count, "Processed batch"),
                Ok(_) => {}
                Err(e) => {
                    error!(code = e.code(), "Batch processing error: {}", e);
                    tokio::time::sleep(self.config.error_backoff).await;
                    self.consumer.reset_connection().await;
                }
            }
        }
    }

    /// Fetch → ingest → commit. Returns the number of accepted records.
    async fn process_batch(&self) -> Result<usize> {
        let (batches, offset) = self.consumer.fetch_batch().await?;
        let mut accepted = 0;

        for consumed in batches {
            match self.funnel.ingest(consumed.batch).await {
                Ok(receipt) => accepted += receipt.accepted,
                Err(e) if e.kind() == ErrorKind::Validation => {
                    warn!(
                        offset = consumed.offset,
                        code = e.code(),
                        details = ?e.details(),
                        "Skipping rejected message"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(offset) = offset {
            self.consumer.commit(offset);
        }
        Ok(accepted)
    }
}
