//! Redpanda consumer of raw attribution records.
//!
//! Each message value is JSON: a single raw record, an array of records, or
//! `{"records": [...]}`. Every message becomes one ingest batch so a bad
//! message never takes its neighbours down with it.
//!
//! Offsets are tracked in-process and advanced only by [`Consumer::commit`],
//! giving at-least-once delivery into the funnel.

use crate::config::{ConsumerConfig, RedpandaConfig};
use engine_core::{Error, RawRecord, RecordBatch, Result};
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::metrics;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Decodes one message value into a batch.
pub fn decode_message(value: &[u8]) -> Result<RecordBatch> {
    match serde_json::from_slice::<RawRecord>(value) {
        Ok(record) => Ok(RecordBatch::new(vec![record])),
        Err(_) => RecordBatch::parse(value),
    }
}

/// Offset tracking for manual commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset {
    pub partition: i32,
    pub offset: i64,
}

/// One decoded message.
#[derive(Debug, Clone)]
pub struct ConsumedBatch {
    pub offset: i64,
    pub batch: RecordBatch,
}

/// Consumer for reading raw records from Redpanda.
pub struct Consumer {
    config: RedpandaConfig,
    /// Partition client (partition 0)
    partition_client: RwLock<Option<Arc<PartitionClient>>>,
    /// Next offset to read
    current_offset: AtomicI64,
    initialized: AtomicBool,
}

impl Consumer {
    pub fn new(config: RedpandaConfig) -> Self {
        info!(
            brokers = ?config.brokers,
            group_id = %config.consumer.group_id,
            topic = %config.consumer.topic,
            batch_size = config.consumer.batch_size,
            "Creating Redpanda consumer"
        );

        Self {
            config,
            partition_client: RwLock::new(None),
            current_offset: AtomicI64::new(-1),
            initialized: AtomicBool::new(false),
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<PartitionClient>> {
        {
            let client = self.partition_client.read().await;
            if let Some(ref c) = *client {
                return Ok(c.clone());
            }
        }

        let consumer = &self.config.consumer;
        let client = self
            .config
            .client_builder()
            .build()
            .await
            .map_err(|e| Error::unavailable(format!("Failed to connect to Redpanda: {}", e)))?;

        let partition_client = client
            .partition_client(consumer.topic.clone(), 0, UnknownTopicHandling::Error)
            .await
            .map_err(|e| Error::unavailable(format!("Failed to get partition client: {}", e)))?;

        let partition_client = Arc::new(partition_client);

        if !self.initialized.load(Ordering::SeqCst) {
            let at = if consumer.from_earliest {
                OffsetAt::Earliest
            } else {
                OffsetAt::Latest
            };
            let offset = partition_client
                .get_offset(at)
                .await
                .map_err(|e| Error::unavailable(format!("Failed to get offset: {}", e)))?;

            self.current_offset.store(offset, Ordering::SeqCst);
            self.initialized.store(true, Ordering::SeqCst);

            info!(
                topic = %consumer.topic,
                partition = 0,
                offset = offset,
                "Consumer initialized at offset"
            );
        }

        {
            let mut guard = self.partition_client.write().await;
            *guard = Some(partition_client.clone());
        }

        Ok(partition_client)
    }

    /// Fetches the next messages, decoded into batches.
    ///
    /// Undecodable messages are logged, counted and skipped; they still move
    /// the returned commit offset forward.
    pub async fn fetch_batch(&self) -> Result<(Vec<ConsumedBatch>, Option<Offset>)> {
        let client = self.ensure_connected().await?;

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(self.config.consumer.batch_timeout_ms);
        let max_bytes = (self.config.consumer.batch_size * 64 * 1024).min(i32::MAX as usize) as i32;
        let current = self.current_offset.load(Ordering::SeqCst);

        let (records, _watermark) = client
            .fetch_records(current, 1..max_bytes, timeout.as_millis() as i32)
            .await
            .map_err(|e| {
                error!("Fetch error: {}", e);
                Error::unavailable(format!("Failed to fetch records: {}", e))
            })?;

        if records.is_empty() {
            return Ok((Vec::new(), None));
        }

        let mut batches = Vec::with_capacity(records.len());
        let mut errors = 0u64;
        let mut max_offset = current;

        for record in records {
            max_offset = record.offset.max(max_offset);

            let Some(value) = record.record.value else {
                continue;
            };
            match decode_message(&value) {
                Ok(batch) => batches.push(ConsumedBatch {
                    offset: record.offset,
                    batch,
                }),
                Err(e) => {
                    errors += 1;
                    warn!(offset = record.offset, error = %e, "Failed to decode message");
                }
            }
        }

        let consumed: usize = batches.iter().map(|b| b.batch.len()).sum();
        metrics().records_consumed.inc_by(consumed as u64);
        if errors > 0 {
            metrics().consumer_errors.inc_by(errors);
        }

        debug!(
            messages = batches.len(),
            records = consumed,
            errors = errors,
            offset_start = current,
            offset_end = max_offset,
            latency_ms = %start.elapsed().as_millis(),
            "Fetched batch from Redpanda"
        );

        let commit_offset = (max_offset >= current).then_some(Offset {
            partition: 0,
            offset: max_offset + 1,
        });

        Ok((batches, commit_offset))
    }

    /// Advances the in-process offset past processed messages.
    pub fn commit(&self, offset: Offset) {
        let prev = self.current_offset.swap(offset.offset, Ordering::SeqCst);
        debug!(
            partition = offset.partition,
            prev_offset = prev,
            new_offset = offset.offset,
            "Committed offset"
        );
    }

    pub fn current_offset(&self) -> i64 {
        self.current_offset.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config.consumer
    }

    /// Drops the cached connection so the next fetch reconnects.
    pub async fn reset_connection(&self) {
        let mut client = self.partition_client.write().await;
        *client = None;
        info!("Consumer connection reset");
    }
}
