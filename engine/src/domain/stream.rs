//! Stream queue adapter, worker-facing half (C3).
//!
//! Wraps [`StreamTopicService`] and attaches `streamMessageId` to each
//! decoded record, per §4.7's "attach streamMessageId" step. Malformed
//! payloads are acked by the caller to drain them (§4.3 edge case); this
//! adapter surfaces them as a decode error rather than failing silently.

use std::sync::Arc;

use thiserror::Error;

use crate::data::topics::{PendingInfo, StreamTopicService, TopicError};
use crate::data::types::NormalizedLogRecord;

#[derive(Error, Debug)]
pub enum StreamAdapterError {
    #[error("stream error: {0}")]
    Stream(#[from] TopicError),

    #[error("malformed stream payload for message {stream_message_id}: {reason}")]
    Malformed {
        stream_message_id: String,
        reason: String,
    },
}

/// A normalized record read back off the stream, carrying the broker id
/// needed to acknowledge it once durably persisted.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub record: NormalizedLogRecord,
    pub stream_message_id: String,
}

/// Worker-facing stream queue adapter.
pub struct StreamQueueAdapter {
    topics: Arc<StreamTopicService>,
}

impl StreamQueueAdapter {
    pub fn new(topics: Arc<StreamTopicService>) -> Self {
        Self { topics }
    }

    pub async fn initialize(&self) -> Result<(), TopicError> {
        self.topics.initialize().await
    }

    /// Serialize and publish a normalized record.
    pub async fn publish(&self, record: &NormalizedLogRecord) -> Result<String, StreamAdapterError> {
        let payload = serde_json::to_vec(record)
            .map_err(|e| StreamAdapterError::Malformed {
                stream_message_id: String::new(),
                reason: e.to_string(),
            })?;
        Ok(self.topics.publish(&payload).await?)
    }

    pub async fn read(
        &self,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<Result<StreamRecord, StreamAdapterError>>, TopicError> {
        let messages = self.topics.read(consumer, count, block_ms).await?;
        Ok(messages.into_iter().map(decode).collect())
    }

    pub async fn read_pending(
        &self,
        consumer: &str,
        count: usize,
        start_id: &str,
    ) -> Result<Vec<Result<StreamRecord, StreamAdapterError>>, TopicError> {
        let messages = self.topics.read_pending(consumer, count, start_id).await?;
        Ok(messages.into_iter().map(decode).collect())
    }

    pub async fn recover_pending_messages(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<Result<StreamRecord, StreamAdapterError>>, TopicError> {
        let messages = self
            .topics
            .recover_pending_messages(consumer, min_idle_ms, count)
            .await?;
        Ok(messages.into_iter().map(decode).collect())
    }

    pub async fn ack(&self, ids: &[String]) -> Result<(), TopicError> {
        self.topics.ack(ids).await
    }

    pub async fn pending_info(&self) -> Result<PendingInfo, TopicError> {
        self.topics.pending_info().await
    }

    pub async fn health_check(&self) -> Result<(), TopicError> {
        self.topics.health_check().await
    }

    pub async fn shutdown(&self) {
        self.topics.shutdown().await;
    }
}

fn decode(message: crate::data::topics::StreamMessage) -> Result<StreamRecord, StreamAdapterError> {
    match serde_json::from_slice::<NormalizedLogRecord>(&message.payload) {
        Ok(mut record) => {
            record.stream_message_id = Some(message.id.clone());
            Ok(StreamRecord {
                record,
                stream_message_id: message.id,
            })
        }
        Err(e) => Err(StreamAdapterError::Malformed {
            stream_message_id: message.id,
            reason: e.to_string(),
        }),
    }
}
