//! Retry / dead-letter strategy (C5).
//!
//! The durable queue is itself a stream topic (`dlq:<original-topic>`),
//! published through the same stream backend used for ingestion — DLQ
//! durability inherits the backend's own durability rather than a second
//! storage mechanism.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use crate::core::config::StreamConfig;
use crate::data::topics::{StreamTopicService, TopicError};
use crate::data::types::NormalizedLogRecord;

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("dead-letter queue error: {0}")]
    Queue(#[from] TopicError),

    #[error("dead-letter entry serialization failed: {0}")]
    Serialization(String),
}

/// `{records[], originalError, attemptCount, contextMetadata}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub records: Vec<NormalizedLogRecord>,
    pub original_error: String,
    pub attempt_count: u32,
    pub context_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub queue_length: u64,
}

/// Interface the batch buffer (C4) depends on, so tests can swap in a
/// failing double without a real stream backend.
#[async_trait]
pub trait RetrySink: Send + Sync {
    async fn queue_for_retry(
        &self,
        records: Vec<NormalizedLogRecord>,
        cause: String,
        context: serde_json::Value,
    ) -> Result<(), RetryError>;
    async fn get_stats(&self) -> RetryStats;
    async fn shutdown(&self);
}

/// Stream-backed dead-letter queue strategy.
pub struct RetryStrategy {
    dlq_topic: StreamTopicService,
    queue_length: AtomicU64,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl RetryStrategy {
    /// `original_topic` names the stream this strategy guards; the DLQ
    /// lives on `dlq:<original_topic>`.
    pub async fn new(original_stream: &StreamConfig) -> Result<Self, TopicError> {
        let dlq_config = StreamConfig {
            stream_name: format!("dlq:{}", original_stream.stream_name),
            consumer_group: format!("dlq:{}", original_stream.consumer_group),
            ..original_stream.clone()
        };
        let dlq_topic = StreamTopicService::new(&dlq_config).await?;
        dlq_topic.initialize().await?;

        Ok(Self {
            dlq_topic,
            queue_length: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        })
    }
}

#[async_trait]
impl RetrySink for RetryStrategy {
    /// Durable: returns only after the entry is visible to the DLQ topic.
    async fn queue_for_retry(
        &self,
        records: Vec<NormalizedLogRecord>,
        cause: String,
        context: serde_json::Value,
    ) -> Result<(), RetryError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = async {
            let entry = DeadLetterEntry {
                records,
                original_error: cause,
                attempt_count: 1,
                context_metadata: context,
            };
            let payload = serde_json::to_vec(&entry)
                .map_err(|e| RetryError::Serialization(e.to_string()))?;
            self.dlq_topic.publish(&payload).await?;
            self.queue_length.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .await;

        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
        result
    }

    async fn get_stats(&self) -> RetryStats {
        RetryStats {
            queue_length: self.queue_length.load(Ordering::SeqCst),
        }
    }

    /// Drains in-flight queuing before releasing DLQ topic resources.
    async fn shutdown(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.drained.notified().await;
        }
        self.dlq_topic.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::StreamBackendType;
    use crate::data::types::LogLevel;

    fn test_stream_config() -> StreamConfig {
        StreamConfig {
            backend: StreamBackendType::Memory,
            redis_url: None,
            stream_name: "log_records".to_string(),
            consumer_group: "log_ingest".to_string(),
            read_batch_size: 256,
            read_block_ms: 50,
            claim_min_idle_ms: 30_000,
        }
    }

    fn sample() -> NormalizedLogRecord {
        NormalizedLogRecord {
            app_id: "svc-a".to_string(),
            level: LogLevel::Error,
            message: "boom".to_string(),
            source: "api".to_string(),
            environment: None,
            metadata: None,
            trace_id: None,
            user_id: None,
            stream_message_id: Some("1-0".to_string()),
        }
    }

    #[tokio::test]
    async fn queue_for_retry_is_durable_and_counted() {
        let strategy = RetryStrategy::new(&test_stream_config()).await.unwrap();
        strategy
            .queue_for_retry(vec![sample()], "store unavailable".to_string(), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(strategy.get_stats().await.queue_length, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_before_returning() {
        let strategy = RetryStrategy::new(&test_stream_config()).await.unwrap();
        strategy
            .queue_for_retry(vec![sample()], "err".to_string(), serde_json::json!({}))
            .await
            .unwrap();
        strategy.shutdown().await;
        assert_eq!(strategy.get_stats().await.queue_length, 1);
    }
}
