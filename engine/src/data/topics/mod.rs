//! Stream queue adapter (C3) wiring.
//!
//! Provides consumer-group stream messaging with pluggable backends:
//! - In-memory (default) - local-only, for development and single-process
//! - Redis Streams (optional) - durable, for multi-process deployments

mod backend;
mod error;
mod memory;
mod redis;

pub use backend::{PendingConsumer, PendingInfo, StreamMessage, TopicBackend};
pub use error::TopicError;

use memory::MemoryTopicBackend;

use crate::core::config::{StreamBackendType, StreamConfig};

/// Stream queue service: a single stream/consumer-group pair backed by a
/// pluggable [`TopicBackend`].
pub struct StreamTopicService {
    backend: Box<dyn TopicBackend>,
    stream_name: String,
    consumer_group: String,
}

impl std::fmt::Debug for StreamTopicService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTopicService")
            .field("backend", &self.backend.backend_name())
            .field("stream_name", &self.stream_name)
            .field("consumer_group", &self.consumer_group)
            .finish()
    }
}

impl StreamTopicService {
    pub async fn new(config: &StreamConfig) -> Result<Self, TopicError> {
        let backend: Box<dyn TopicBackend> = match config.backend {
            StreamBackendType::Memory => {
                tracing::debug!(
                    stream = %config.stream_name,
                    "initializing in-memory stream backend"
                );
                Box::new(MemoryTopicBackend::new())
            }
            StreamBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    TopicError::Config("redis_url required for Redis stream backend".into())
                })?;
                Box::new(redis::RedisTopicBackend::new(url).await?)
            }
        };

        Ok(Self {
            backend,
            stream_name: config.stream_name.clone(),
            consumer_group: config.consumer_group.clone(),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Ensure the consumer group exists. Idempotent.
    pub async fn initialize(&self) -> Result<(), TopicError> {
        self.backend
            .ensure_group(&self.stream_name, &self.consumer_group)
            .await
    }

    pub async fn publish(&self, payload: &[u8]) -> Result<String, TopicError> {
        self.backend.publish(&self.stream_name, payload).await
    }

    pub async fn read(
        &self,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        self.backend
            .read(
                &self.stream_name,
                &self.consumer_group,
                consumer,
                count,
                block_ms,
            )
            .await
    }

    pub async fn read_pending(
        &self,
        consumer: &str,
        count: usize,
        start_id: &str,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        self.backend
            .read_pending(
                &self.stream_name,
                &self.consumer_group,
                consumer,
                count,
                start_id,
            )
            .await
    }

    pub async fn recover_pending_messages(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, TopicError> {
        self.backend
            .claim_stale(
                &self.stream_name,
                &self.consumer_group,
                consumer,
                min_idle_ms,
                count,
            )
            .await
    }

    pub async fn ack(&self, ids: &[String]) -> Result<(), TopicError> {
        self.backend
            .ack(&self.stream_name, &self.consumer_group, ids)
            .await
    }

    pub async fn pending_info(&self) -> Result<PendingInfo, TopicError> {
        self.backend
            .pending_info(&self.stream_name, &self.consumer_group)
            .await
    }

    pub async fn health_check(&self) -> Result<(), TopicError> {
        self.backend.health_check().await
    }

    /// Release broker resources. In-flight reads may return empty rather
    /// than erroring.
    pub async fn shutdown(&self) {
        tracing::debug!(stream = %self.stream_name, "stream topic service shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StreamConfig {
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

    #[tokio::test]
    async fn publish_read_ack_roundtrip() {
        let service = StreamTopicService::new(&test_config()).await.unwrap();
        service.initialize().await.unwrap();

        service.publish(b"payload").await.unwrap();
        let messages = service.read("consumer-1", 10, 50).await.unwrap();
        assert_eq!(messages.len(), 1);

        service
            .ack(&[messages[0].id.clone()])
            .await
            .unwrap();

        let pending = service.pending_info().await.unwrap();
        assert_eq!(pending.count, 0);
    }

    #[tokio::test]
    async fn read_pending_recovers_consumer_own_entries() {
        let service = StreamTopicService::new(&test_config()).await.unwrap();
        service.initialize().await.unwrap();
        service.publish(b"payload").await.unwrap();
        service.read("consumer-1", 10, 50).await.unwrap();

        let recovered = service.read_pending("consumer-1", 10, "0-0").await.unwrap();
        assert_eq!(recovered.len(), 1);
    }

    #[tokio::test]
    async fn health_check_ok() {
        let service = StreamTopicService::new(&test_config()).await.unwrap();
        assert!(service.health_check().await.is_ok());
    }
}
