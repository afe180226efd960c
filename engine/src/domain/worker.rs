//! Worker (C7): wires the stream adapter, batch buffer, retry strategy,
//! and persistence adapter into one of two roles.
//!
//! State machine: `(spawning) -> (running) -> (draining) -> (stopped)`,
//! with `(running) -> (error)` observed and auto-restarted by the thread
//! manager (C8). This type only models spawning/running/draining/stopped;
//! error-and-restart is the manager's concern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::core::constants::BROKER_READ_ERROR_BACKOFF_MS;
use crate::data::types::NormalizedLogRecord;
use crate::domain::buffer::{BatchBuffer, BufferHealth, FlushAckSink};
use crate::domain::retry::RetrySink;
use crate::domain::stream::StreamQueueAdapter;

/// Role assigned at spawn time by the manager (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Reads new stream entries; recovers its own pending entries once at
    /// startup.
    Consumer,
    /// Auto-claims entries idle beyond the threshold; never calls `read`.
    Recovery,
}

/// Tunables a worker needs, a thin projection of [`crate::core::config`].
#[derive(Debug, Clone)]
pub struct WorkerTuning {
    pub poll_interval_ms: u64,
    pub recovery_interval_ms: u64,
    pub read_batch_size: usize,
    pub read_block_ms: u64,
    pub claim_min_idle_ms: u64,
    pub retry_queue_limit: usize,
    pub backpressure_cooldown_ms: u64,
}

/// Snapshot returned to the manager's health-aggregation round trip.
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    pub name: String,
    pub role: WorkerRole,
    pub buffer: BufferHealth,
}

/// Extracts `streamMessageId` from flushed records and acks them on the
/// stream adapter. Ack failures are logged, never propagated: records are
/// already durable, worst case is redelivery tolerated by the idempotent
/// schema.
struct WorkerAckSink {
    stream: Arc<StreamQueueAdapter>,
}

#[async_trait]
impl FlushAckSink for WorkerAckSink {
    async fn on_flush_success(&self, records: &[NormalizedLogRecord]) {
        let ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.stream_message_id.clone())
            .collect();
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.stream.ack(&ids).await {
            tracing::warn!(error = %e, count = ids.len(), "ack failed after flush, tolerating redelivery");
        }
    }
}

pub struct Worker {
    pub name: String,
    pub role: WorkerRole,
    stream: Arc<StreamQueueAdapter>,
    buffer: Arc<BatchBuffer>,
    retry: Arc<dyn RetrySink>,
    tuning: WorkerTuning,
}

impl Worker {
    pub fn new(
        name: String,
        role: WorkerRole,
        stream: Arc<StreamQueueAdapter>,
        persist: Arc<dyn crate::domain::persistence::PersistSink>,
        retry: Arc<dyn RetrySink>,
        buffer_config: crate::core::config::BufferConfig,
        tuning: WorkerTuning,
    ) -> Self {
        let ack = Arc::new(WorkerAckSink { stream: Arc::clone(&stream) });
        let buffer = Arc::new(BatchBuffer::new(buffer_config, persist, Arc::clone(&retry), ack));
        Self { name, role, stream, buffer, retry, tuning }
    }

    pub fn buffer(&self) -> &Arc<BatchBuffer> {
        &self.buffer
    }

    /// Run the worker's role loop until shutdown. Returns once the final
    /// flush/ack and resource release complete.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
        mut health_rx: mpsc::Receiver<oneshot::Sender<WorkerHealth>>,
    ) {
        if let Err(e) = self.stream.initialize().await {
            tracing::error!(worker = %self.name, error = %e, "failed to initialize stream adapter");
            return;
        }

        if self.role == WorkerRole::Consumer {
            self.drain_own_pending().await;
        }

        let timer_shutdown_rx = shutdown_rx.clone();
        let timer_handle = self.buffer.start_timer(timer_shutdown_rx);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                Some(reply) = health_rx.recv() => {
                    let health = WorkerHealth {
                        name: self.name.clone(),
                        role: self.role,
                        buffer: self.buffer.get_health().await,
                    };
                    let _ = reply.send(health);
                }
                _ = self.run_once() => {}
            }
        }

        timer_handle.abort();
        let summary = self.buffer.shutdown().await;
        tracing::debug!(worker = %self.name, flushed = summary.flushed, failed = summary.failed, "worker buffer drained");
        self.stream.shutdown().await;
    }

    async fn drain_own_pending(&self) {
        match self
            .stream
            .read_pending(&self.name, self.tuning.read_batch_size, "0-0")
            .await
        {
            Ok(results) => self.ingest(results).await,
            Err(e) => tracing::warn!(worker = %self.name, error = %e, "failed to drain own pending entries at startup"),
        }
    }

    /// One iteration of the role loop: backpressure check, read/claim,
    /// ingest, sleep.
    async fn run_once(&self) {
        if self.backpressure_active().await {
            tokio::time::sleep(Duration::from_millis(self.tuning.backpressure_cooldown_ms)).await;
            return;
        }

        match self.role {
            WorkerRole::Consumer => {
                match self
                    .stream
                    .read(&self.name, self.tuning.read_batch_size, self.tuning.read_block_ms)
                    .await
                {
                    Ok(results) => self.ingest(results).await,
                    Err(e) => {
                        tracing::warn!(worker = %self.name, error = %e, "stream read failed, backing off");
                        tokio::time::sleep(Duration::from_millis(BROKER_READ_ERROR_BACKOFF_MS)).await;
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(self.tuning.poll_interval_ms)).await;
            }
            WorkerRole::Recovery => {
                match self
                    .stream
                    .recover_pending_messages(
                        &self.name,
                        self.tuning.claim_min_idle_ms,
                        self.tuning.read_batch_size,
                    )
                    .await
                {
                    Ok(results) => self.ingest(results).await,
                    Err(e) => tracing::warn!(worker = %self.name, error = %e, "recovery claim failed"),
                }
                tokio::time::sleep(Duration::from_millis(self.tuning.recovery_interval_ms)).await;
            }
        }
    }

    async fn backpressure_active(&self) -> bool {
        self.retry.get_stats().await.queue_length >= self.tuning.retry_queue_limit as u64
    }

    async fn ingest(&self, results: Vec<Result<crate::domain::stream::StreamRecord, crate::domain::stream::StreamAdapterError>>) {
        if results.is_empty() {
            return;
        }
        let mut records = Vec::with_capacity(results.len());
        let mut malformed_ids = Vec::new();

        for result in results {
            match result {
                Ok(stream_record) => records.push(stream_record.record),
                Err(crate::domain::stream::StreamAdapterError::Malformed { stream_message_id, reason }) => {
                    tracing::warn!(worker = %self.name, stream_message_id = %stream_message_id, reason = %reason, "dropping malformed stream payload");
                    malformed_ids.push(stream_message_id);
                }
                Err(e) => tracing::warn!(worker = %self.name, error = %e, "stream adapter error"),
            }
        }

        if !malformed_ids.is_empty() {
            if let Err(e) = self.stream.ack(&malformed_ids).await {
                tracing::warn!(worker = %self.name, error = %e, "failed to ack malformed payloads");
            }
        }

        if !records.is_empty() {
            if let Err(e) = self.buffer.add(records).await {
                tracing::error!(worker = %self.name, error = %e, "failed to add records to buffer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BufferConfig, StreamBackendType, StreamConfig};
    use crate::data::topics::StreamTopicService;
    use crate::data::types::{LogLevel, NormalizedLogRecord};
    use crate::domain::persistence::{PersistError, PersistHealth, PersistSink};
    use crate::domain::retry::{RetryError, RetryStats};

    struct RecordingPersist {
        saved: std::sync::Mutex<Vec<NormalizedLogRecord>>,
    }

    #[async_trait]
    impl PersistSink for RecordingPersist {
        async fn save(&self, records: Vec<NormalizedLogRecord>) -> Result<usize, PersistError> {
            let n = records.len();
            self.saved.lock().unwrap().extend(records);
            Ok(n)
        }
        async fn health_check(&self) -> PersistHealth {
            PersistHealth { healthy: true, ping_latency_ms: 0, error: None }
        }
    }

    struct OkRetry;
    #[async_trait]
    impl RetrySink for OkRetry {
        async fn queue_for_retry(
            &self,
            _records: Vec<NormalizedLogRecord>,
            _cause: String,
            _context: serde_json::Value,
        ) -> Result<(), RetryError> {
            Ok(())
        }
        async fn get_stats(&self) -> RetryStats {
            RetryStats { queue_length: 0 }
        }
        async fn shutdown(&self) {}
    }

    fn test_stream_config() -> StreamConfig {
        StreamConfig {
            backend: StreamBackendType::Memory,
            redis_url: None,
            stream_name: "log_records".to_string(),
            consumer_group: "log_ingest".to_string(),
            read_batch_size: 64,
            read_block_ms: 10,
            claim_min_idle_ms: 30_000,
        }
    }

    fn test_tuning() -> WorkerTuning {
        WorkerTuning {
            poll_interval_ms: 5,
            recovery_interval_ms: 5,
            read_batch_size: 64,
            read_block_ms: 10,
            claim_min_idle_ms: 30_000,
            retry_queue_limit: 10_000,
            backpressure_cooldown_ms: 5,
        }
    }

    fn sample_record() -> NormalizedLogRecord {
        NormalizedLogRecord {
            app_id: "svc-a".to_string(),
            level: LogLevel::Info,
            message: "hello".to_string(),
            source: "api".to_string(),
            environment: None,
            metadata: None,
            trace_id: None,
            user_id: None,
            stream_message_id: None,
        }
    }

    #[tokio::test]
    async fn consumer_worker_reads_and_persists_published_records() {
        let topics = Arc::new(StreamTopicService::new(&test_stream_config()).await.unwrap());
        topics.initialize().await.unwrap();
        let payload = serde_json::to_vec(&sample_record()).unwrap();
        topics.publish(&payload).await.unwrap();

        let stream = Arc::new(StreamQueueAdapter::new(topics));
        let persist = Arc::new(RecordingPersist { saved: std::sync::Mutex::new(Vec::new()) });
        let worker = Arc::new(Worker::new(
            "worker-test-0".to_string(),
            WorkerRole::Consumer,
            Arc::clone(&stream),
            persist.clone(),
            Arc::new(OkRetry),
            BufferConfig { max_batch_size: 10, max_wait_time_ms: 100 },
            test_tuning(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_health_tx, health_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Arc::clone(&worker).run(shutdown_rx, health_rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        let saved = persist.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].message, "hello");
    }

    #[tokio::test]
    async fn recovery_worker_reports_health_without_reading_new_entries() {
        let topics = Arc::new(StreamTopicService::new(&test_stream_config()).await.unwrap());
        let stream = Arc::new(StreamQueueAdapter::new(topics));
        let persist = Arc::new(RecordingPersist { saved: std::sync::Mutex::new(Vec::new()) });
        let worker = Arc::new(Worker::new(
            "worker-test-recovery".to_string(),
            WorkerRole::Recovery,
            Arc::clone(&stream),
            persist,
            Arc::new(OkRetry),
            BufferConfig::default(),
            test_tuning(),
        ));
        assert_eq!(worker.role, WorkerRole::Recovery);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (health_tx, health_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Arc::clone(&worker).run(shutdown_rx, health_rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        health_tx.send(reply_tx).await.unwrap();
        let health = tokio::time::timeout(Duration::from_secs(1), reply_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(health.role, WorkerRole::Recovery);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
