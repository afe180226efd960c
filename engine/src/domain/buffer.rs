//! Batch buffer (C4): accumulates normalized records, flushes on size or
//! time, hands failed batches to the retry strategy, and acks through a
//! small ack callback.
//!
//! Invariants preserved here: at most one flush in flight per instance;
//! ack is never issued before a successful persist or a successful DLQ
//! hand-off; `onFlushSuccess` still fires when `queueForRetry` succeeds,
//! since the DLQ is now the source of truth and the broker would
//! otherwise redeliver forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::core::config::BufferConfig;
use crate::core::constants::HEALTH_CACHE_TTL_MS;
use crate::data::types::NormalizedLogRecord;
use crate::domain::persistence::PersistSink;
use crate::domain::retry::RetrySink;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("buffer is shutting down, rejecting new records")]
    ShuttingDown,

    #[error("persist and dead-letter enqueue both failed: {0}")]
    PersistAndRetryFailed(String),
}

/// Implemented by the worker (C7): extracts `streamMessageId` from each
/// flushed record and acks it. Ack failures must be logged, not
/// propagated — records are already durable.
#[async_trait]
pub trait FlushAckSink: Send + Sync {
    async fn on_flush_success(&self, records: &[NormalizedLogRecord]);
}

#[derive(Debug, Default)]
struct Metrics {
    total_buffered: AtomicU64,
    total_inserted: AtomicU64,
    total_flushes: AtomicU64,
    total_errors: AtomicU64,
    last_flush_size: AtomicU64,
    last_flush_time_ms: AtomicU64,
}

/// Snapshot returned by `getHealth()`.
#[derive(Debug, Clone)]
pub struct BufferHealth {
    pub healthy: bool,
    pub buffer_usage_pct: f64,
    pub error_rate_pct: f64,
    pub is_flushing: bool,
    pub total_buffered: u64,
    pub total_inserted: u64,
    pub total_flushes: u64,
    pub total_errors: u64,
    pub last_flush_size: u64,
}

/// Result of `shutdown()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownSummary {
    pub flushed: u64,
    pub failed: u64,
}

pub struct BatchBuffer {
    config: BufferConfig,
    buffer: Mutex<Vec<NormalizedLogRecord>>,
    is_flushing: AtomicBool,
    is_shutting_down: AtomicBool,
    metrics: Metrics,
    health_cache: Mutex<Option<(Instant, BufferHealth)>>,
    persist: Arc<dyn PersistSink>,
    retry: Arc<dyn RetrySink>,
    ack: Arc<dyn FlushAckSink>,
}

impl BatchBuffer {
    pub fn new(
        config: BufferConfig,
        persist: Arc<dyn PersistSink>,
        retry: Arc<dyn RetrySink>,
        ack: Arc<dyn FlushAckSink>,
    ) -> Self {
        Self {
            config,
            buffer: Mutex::new(Vec::new()),
            is_flushing: AtomicBool::new(false),
            is_shutting_down: AtomicBool::new(false),
            metrics: Metrics::default(),
            health_cache: Mutex::new(None),
            persist,
            retry,
            ack,
        }
    }

    /// Append records; triggers a flush once the buffer reaches
    /// `maxBatchSize`. Rejects once shutdown has started.
    pub async fn add(&self, records: Vec<NormalizedLogRecord>) -> Result<(), BufferError> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            return Err(BufferError::ShuttingDown);
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            self.metrics
                .total_buffered
                .fetch_add(records.len() as u64, Ordering::Relaxed);
            buffer.extend(records);
            buffer.len() >= self.config.max_batch_size
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Exclusive flush: early-returns if a flush is already in flight or
    /// the buffer is empty.
    pub async fn flush(&self) -> Result<(), BufferError> {
        if self
            .is_flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let result = self.flush_inner().await;
        self.is_flushing.store(false, Ordering::SeqCst);
        result
    }

    async fn flush_inner(&self) -> Result<(), BufferError> {
        let to_flush = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };
        let batch_size = to_flush.len();

        match self.persist.save(to_flush.clone()).await {
            Ok(_) => {
                self.metrics
                    .total_inserted
                    .fetch_add(batch_size as u64, Ordering::Relaxed);
                self.metrics.total_flushes.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .last_flush_size
                    .store(batch_size as u64, Ordering::Relaxed);
                self.metrics
                    .last_flush_time_ms
                    .store(now_millis(), Ordering::Relaxed);
                self.ack.on_flush_success(&to_flush).await;
                Ok(())
            }
            Err(persist_err) => {
                self.metrics.total_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %persist_err, batch_size, "flush persist failed, routing to retry strategy");

                let context = serde_json::json!({ "batch_size": batch_size });
                match self
                    .retry
                    .queue_for_retry(to_flush.clone(), persist_err.to_string(), context)
                    .await
                {
                    Ok(()) => {
                        // DLQ is now the source of truth; ack so the broker
                        // doesn't redeliver and cause infinite reprocessing.
                        self.metrics.total_flushes.fetch_add(1, Ordering::Relaxed);
                        self.ack.on_flush_success(&to_flush).await;
                        Ok(())
                    }
                    Err(retry_err) => {
                        tracing::error!(
                            persist_error = %persist_err,
                            retry_error = %retry_err,
                            batch_size,
                            "persist and dead-letter enqueue both failed; not acking"
                        );
                        Err(BufferError::PersistAndRetryFailed(format!(
                            "persist: {persist_err}; retry: {retry_err}"
                        )))
                    }
                }
            }
        }
    }

    /// Spawn the self-rescheduling flush timer.
    pub fn start_timer(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        let interval_ms = self.config.max_wait_time_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if buffer.is_shutting_down.load(Ordering::SeqCst) {
                            break;
                        }
                        if let Err(e) = buffer.flush().await {
                            tracing::error!(error = %e, "timer-triggered flush failed");
                        }
                    }
                }
            }
        })
    }

    /// Stop accepting records, perform a final synchronous flush, then
    /// shut down the retry strategy.
    pub async fn shutdown(&self) -> ShutdownSummary {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        let flushed_before = self.metrics.total_flushes.load(Ordering::Relaxed);
        let result = self.flush().await;
        self.retry.shutdown().await;

        let flushed_after = self.metrics.total_flushes.load(Ordering::Relaxed);
        match result {
            Ok(()) => ShutdownSummary {
                flushed: flushed_after - flushed_before,
                failed: 0,
            },
            Err(_) => ShutdownSummary {
                flushed: flushed_after - flushed_before,
                failed: 1,
            },
        }
    }

    pub async fn get_health(&self) -> BufferHealth {
        let mut cache = self.health_cache.lock().await;
        if let Some((at, health)) = cache.as_ref() {
            if at.elapsed() < Duration::from_millis(HEALTH_CACHE_TTL_MS) {
                return health.clone();
            }
        }

        let buffer_len = self.buffer.lock().await.len();
        let total_flushes = self.metrics.total_flushes.load(Ordering::Relaxed);
        let total_errors = self.metrics.total_errors.load(Ordering::Relaxed);
        let error_rate_pct = if total_flushes + total_errors > 0 {
            (total_errors as f64 / (total_flushes + total_errors) as f64) * 100.0
        } else {
            0.0
        };

        let health = BufferHealth {
            healthy: !self.is_shutting_down.load(Ordering::SeqCst) && error_rate_pct < 100.0,
            buffer_usage_pct: (buffer_len as f64 / self.config.max_batch_size as f64) * 100.0,
            error_rate_pct,
            is_flushing: self.is_flushing.load(Ordering::SeqCst),
            total_buffered: self.metrics.total_buffered.load(Ordering::Relaxed),
            total_inserted: self.metrics.total_inserted.load(Ordering::Relaxed),
            total_flushes,
            total_errors,
            last_flush_size: self.metrics.last_flush_size.load(Ordering::Relaxed),
        };

        *cache = Some((Instant::now(), health.clone()));
        health
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::persistence::PersistError;
    use crate::domain::persistence::PersistHealth;
    use crate::domain::retry::{RetryError, RetryStats};
    use std::sync::Mutex as StdMutex;

    struct OkPersist;
    #[async_trait]
    impl PersistSink for OkPersist {
        async fn save(&self, records: Vec<NormalizedLogRecord>) -> Result<usize, PersistError> {
            Ok(records.len())
        }
        async fn health_check(&self) -> PersistHealth {
            PersistHealth { healthy: true, ping_latency_ms: 0, error: None }
        }
    }

    struct FailingPersist;
    #[async_trait]
    impl PersistSink for FailingPersist {
        async fn save(&self, _records: Vec<NormalizedLogRecord>) -> Result<usize, PersistError> {
            Err(PersistError::Store(crate::data::duckdb::DuckdbError::Timeout { timeout_secs: 1 }))
        }
        async fn health_check(&self) -> PersistHealth {
            PersistHealth { healthy: false, ping_latency_ms: 0, error: Some("down".into()) }
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
            RetryStats::default()
        }
        async fn shutdown(&self) {}
    }

    struct FailingRetry;
    #[async_trait]
    impl RetrySink for FailingRetry {
        async fn queue_for_retry(
            &self,
            _records: Vec<NormalizedLogRecord>,
            _cause: String,
            _context: serde_json::Value,
        ) -> Result<(), RetryError> {
            Err(RetryError::Serialization("dlq unavailable".into()))
        }
        async fn get_stats(&self) -> RetryStats {
            RetryStats::default()
        }
        async fn shutdown(&self) {}
    }

    struct RecordingAck {
        acked: StdMutex<Vec<usize>>,
    }
    impl RecordingAck {
        fn new() -> Self {
            Self { acked: StdMutex::new(Vec::new()) }
        }
    }
    #[async_trait]
    impl FlushAckSink for RecordingAck {
        async fn on_flush_success(&self, records: &[NormalizedLogRecord]) {
            self.acked.lock().unwrap().push(records.len());
        }
    }

    fn sample() -> NormalizedLogRecord {
        NormalizedLogRecord {
            app_id: "svc-a".to_string(),
            level: crate::data::types::LogLevel::Info,
            message: "hello".to_string(),
            source: "api".to_string(),
            environment: None,
            metadata: None,
            trace_id: None,
            user_id: None,
            stream_message_id: Some("1-0".to_string()),
        }
    }

    fn config() -> BufferConfig {
        BufferConfig { max_batch_size: 2, max_wait_time_ms: 1_000 }
    }

    #[tokio::test]
    async fn add_flushes_on_reaching_max_batch_size() {
        let ack = Arc::new(RecordingAck::new());
        let buffer = BatchBuffer::new(config(), Arc::new(OkPersist), Arc::new(OkRetry), ack.clone());
        buffer.add(vec![sample(), sample()]).await.unwrap();
        assert_eq!(ack.acked.lock().unwrap().as_slice(), &[2]);
        assert_eq!(buffer.get_health().await.total_inserted, 2);
    }

    #[tokio::test]
    async fn failed_persist_routes_to_retry_and_still_acks() {
        let ack = Arc::new(RecordingAck::new());
        let buffer = BatchBuffer::new(config(), Arc::new(FailingPersist), Arc::new(OkRetry), ack.clone());
        buffer.add(vec![sample(), sample()]).await.unwrap();
        assert_eq!(ack.acked.lock().unwrap().as_slice(), &[2]);
    }

    #[tokio::test]
    async fn persist_and_retry_both_failing_does_not_ack() {
        let ack = Arc::new(RecordingAck::new());
        let buffer =
            BatchBuffer::new(config(), Arc::new(FailingPersist), Arc::new(FailingRetry), ack.clone());
        let err = buffer.add(vec![sample(), sample()]).await.unwrap_err();
        assert!(matches!(err, BufferError::PersistAndRetryFailed(_)));
        assert!(ack.acked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_after_shutdown_is_rejected() {
        let ack = Arc::new(RecordingAck::new());
        let buffer = BatchBuffer::new(config(), Arc::new(OkPersist), Arc::new(OkRetry), ack);
        buffer.shutdown().await;
        let err = buffer.add(vec![sample()]).await.unwrap_err();
        assert!(matches!(err, BufferError::ShuttingDown));
    }

    #[tokio::test]
    async fn concurrent_flush_calls_only_run_one_at_a_time() {
        let ack = Arc::new(RecordingAck::new());
        let buffer = Arc::new(BatchBuffer::new(
            BufferConfig { max_batch_size: 1_000, max_wait_time_ms: 1_000 },
            Arc::new(OkPersist),
            Arc::new(OkRetry),
            ack.clone(),
        ));
        buffer.add(vec![sample()]).await.unwrap();

        let a = Arc::clone(&buffer);
        let b = Arc::clone(&buffer);
        let (r1, r2) = tokio::join!(a.flush(), b.flush());
        r1.unwrap();
        r2.unwrap();
        // Only one of the two concurrent flushes should have found records.
        assert_eq!(ack.acked.lock().unwrap().len(), 1);
    }
}
