//! Thread / worker-pool manager (C8): spawns, names, supervises, and
//! gracefully shuts down the fixed-size worker pool.
//!
//! Workers share one stream adapter, persistence adapter, and retry
//! strategy (each already wraps its own connection pool); the manager
//! only owns naming, role assignment, restart supervision, and the
//! shutdown broadcast, mirroring how [`crate::core::shutdown::ShutdownService`]
//! separates "signal a stop" from "the thing being stopped."

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::core::config::{BufferConfig, WorkerPoolConfig};
use crate::core::constants::{
    RESTART_BASE_DELAY_MS, RESTART_MAX_DELAY_MS, WORKER_HEALTH_TIMEOUT_MS,
    WORKER_READY_RESET_THRESHOLD_MS,
};
use crate::domain::persistence::PersistSink;
use crate::domain::retry::RetrySink;
use crate::domain::stream::StreamQueueAdapter;
use crate::domain::worker::{Worker, WorkerHealth, WorkerRole, WorkerTuning};

type HealthRequest = oneshot::Sender<WorkerHealth>;

struct SupervisedWorker {
    name: String,
    /// Swapped out by the supervisor on every restart, since each
    /// restarted worker instance owns a freshly-created receiver half.
    health_tx: Arc<Mutex<mpsc::Sender<HealthRequest>>>,
    supervisor: JoinHandle<()>,
}

/// Owns the fixed-size worker pool: spawns each worker under a restart
/// supervisor, aggregates health, and drives graceful shutdown.
pub struct WorkerPoolManager {
    workers: Vec<SupervisedWorker>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPoolManager {
    /// Spawn `workers.worker_count` workers. Index 0 is the dedicated
    /// recovery worker (auto-claims idle entries); the rest are consumers.
    pub fn start(
        pool_config: WorkerPoolConfig,
        buffer_config: BufferConfig,
        tuning: WorkerTuning,
        stream: Arc<StreamQueueAdapter>,
        persist: Arc<dyn PersistSink>,
        retry: Arc<dyn RetrySink>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::with_capacity(pool_config.worker_count.max(1));

        for index in 0..pool_config.worker_count.max(1) {
            let role = if index == 0 { WorkerRole::Recovery } else { WorkerRole::Consumer };
            let name = format!("worker-{}-{}", pool_config.instance_id, index);
            let (health_tx, health_rx) = mpsc::channel(1);
            let health_tx = Arc::new(Mutex::new(health_tx));

            let supervisor = tokio::spawn(Self::supervise(
                name.clone(),
                role,
                Arc::clone(&stream),
                Arc::clone(&persist),
                Arc::clone(&retry),
                buffer_config.clone(),
                tuning.clone(),
                shutdown_rx.clone(),
                Arc::clone(&health_tx),
                health_rx,
            ));

            workers.push(SupervisedWorker { name, health_tx, supervisor });
        }

        Self { workers, shutdown_tx }
    }

    /// Runs one worker to completion, restarting it with exponential
    /// backoff if it exits before shutdown is signaled. A fresh health
    /// channel is created per restart and published through `health_tx_slot`
    /// so `aggregate_health` always reaches the live instance.
    async fn supervise(
        name: String,
        role: WorkerRole,
        stream: Arc<StreamQueueAdapter>,
        persist: Arc<dyn PersistSink>,
        retry: Arc<dyn RetrySink>,
        buffer_config: BufferConfig,
        tuning: WorkerTuning,
        shutdown_rx: watch::Receiver<bool>,
        health_tx_slot: Arc<Mutex<mpsc::Sender<HealthRequest>>>,
        mut health_rx: mpsc::Receiver<HealthRequest>,
    ) {
        let mut restart_count: u32 = 0;

        loop {
            let worker = Arc::new(Worker::new(
                name.clone(),
                role,
                Arc::clone(&stream),
                Arc::clone(&persist),
                Arc::clone(&retry),
                buffer_config.clone(),
                tuning.clone(),
            ));

            let started_at = Instant::now();
            worker.run(shutdown_rx.clone(), health_rx).await;

            if *shutdown_rx.borrow() {
                return;
            }

            if started_at.elapsed() >= Duration::from_millis(WORKER_READY_RESET_THRESHOLD_MS) {
                restart_count = 0;
            }

            tracing::warn!(worker = %name, restart_count, "worker exited before shutdown, restarting");

            let delay_ms = (RESTART_BASE_DELAY_MS.saturating_mul(1u64 << restart_count.min(20)))
                .min(RESTART_MAX_DELAY_MS);
            tracing::debug!(worker = %name, delay_ms, "backing off before restart");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            restart_count += 1;

            let (next_tx, next_rx) = mpsc::channel(1);
            *health_tx_slot.lock().await = next_tx;
            health_rx = next_rx;
        }
    }

    /// Query every worker's health with a per-worker timeout, returning
    /// only the workers that answered in time.
    pub async fn aggregate_health(&self) -> Vec<WorkerHealth> {
        let mut out = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let (tx, rx) = oneshot::channel();
            let sent = worker.health_tx.lock().await.send(tx).await;
            if sent.is_err() {
                tracing::warn!(worker = %worker.name, "worker health channel unavailable");
                continue;
            }
            match tokio::time::timeout(Duration::from_millis(WORKER_HEALTH_TIMEOUT_MS), rx).await {
                Ok(Ok(health)) => out.push(health),
                _ => tracing::warn!(worker = %worker.name, "worker health query timed out"),
            }
        }
        out
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name.clone()).collect()
    }

    /// Signal shutdown to every worker and await their supervisors,
    /// force-aborting any that haven't stopped within the timeout.
    pub async fn shutdown(self, timeout_secs: u64) {
        let _ = self.shutdown_tx.send(true);

        let deadline = Duration::from_secs(timeout_secs);
        let handles: Vec<(String, JoinHandle<()>)> =
            self.workers.into_iter().map(|w| (w.name, w.supervisor)).collect();

        let (names, tasks): (Vec<String>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        match tokio::time::timeout(deadline, futures::future::join_all(tasks)).await {
            Ok(results) => {
                for (name, result) in names.into_iter().zip(results) {
                    if let Err(e) = result {
                        tracing::error!(worker = %name, error = %e, "worker supervisor panicked during shutdown");
                    }
                }
            }
            Err(_) => {
                tracing::warn!(timeout_secs, "worker pool shutdown timed out, supervisors left detached");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{StreamBackendType, StreamConfig};
    use crate::data::topics::StreamTopicService;
    use crate::domain::persistence::{PersistError, PersistHealth};
    use crate::domain::retry::{RetryError, RetryStats};
    use crate::data::types::NormalizedLogRecord;

    struct OkPersist;
    #[async_trait::async_trait]
    impl PersistSink for OkPersist {
        async fn save(&self, records: Vec<NormalizedLogRecord>) -> Result<usize, PersistError> {
            Ok(records.len())
        }
        async fn health_check(&self) -> PersistHealth {
            PersistHealth { healthy: true, ping_latency_ms: 0, error: None }
        }
    }

    struct OkRetry;
    #[async_trait::async_trait]
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
            poll_interval_ms: 10,
            recovery_interval_ms: 20,
            read_batch_size: 64,
            read_block_ms: 10,
            claim_min_idle_ms: 30_000,
            retry_queue_limit: 10_000,
            backpressure_cooldown_ms: 10,
        }
    }

    #[tokio::test]
    async fn pool_names_workers_and_assigns_recovery_role_to_index_zero() {
        let topics = Arc::new(StreamTopicService::new(&test_stream_config()).await.unwrap());
        let stream = Arc::new(StreamQueueAdapter::new(topics));
        let pool_config = WorkerPoolConfig {
            worker_count: 3,
            instance_id: "inst".to_string(),
            poll_interval_ms: 10,
            recovery_interval_ms: 20,
        };

        let manager = WorkerPoolManager::start(
            pool_config,
            BufferConfig::default(),
            test_tuning(),
            stream,
            Arc::new(OkPersist),
            Arc::new(OkRetry),
        );

        let names = manager.worker_names();
        assert_eq!(names, vec!["worker-inst-0", "worker-inst-1", "worker-inst-2"]);
        manager.shutdown(5).await;
    }

    #[tokio::test]
    async fn aggregate_health_reports_every_worker() {
        let topics = Arc::new(StreamTopicService::new(&test_stream_config()).await.unwrap());
        let stream = Arc::new(StreamQueueAdapter::new(topics));
        let pool_config = WorkerPoolConfig {
            worker_count: 2,
            instance_id: "inst2".to_string(),
            poll_interval_ms: 10,
            recovery_interval_ms: 20,
        };

        let manager = WorkerPoolManager::start(
            pool_config,
            BufferConfig::default(),
            test_tuning(),
            stream,
            Arc::new(OkPersist),
            Arc::new(OkRetry),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let health = manager.aggregate_health().await;
        assert_eq!(health.len(), 2);
        manager.shutdown(5).await;
    }

    #[tokio::test]
    async fn shutdown_returns_once_all_supervisors_stop() {
        let topics = Arc::new(StreamTopicService::new(&test_stream_config()).await.unwrap());
        let stream = Arc::new(StreamQueueAdapter::new(topics));
        let pool_config = WorkerPoolConfig {
            worker_count: 1,
            instance_id: "inst3".to_string(),
            poll_interval_ms: 10,
            recovery_interval_ms: 20,
        };

        let manager = WorkerPoolManager::start(
            pool_config,
            BufferConfig::default(),
            test_tuning(),
            stream,
            Arc::new(OkPersist),
            Arc::new(OkRetry),
        );

        tokio::time::timeout(Duration::from_secs(5), manager.shutdown(5))
            .await
            .expect("shutdown should complete well within its own timeout");
    }

    /// Scenario 3 from the testable-properties section: a consumer that
    /// reads a message but crashes before acking it must not lose that
    /// message. The recovery worker (index 0) auto-claims it once its idle
    /// time exceeds `claim_min_idle_ms` and persists it.
    #[tokio::test]
    async fn recovery_worker_claims_and_persists_message_left_pending_by_a_crashed_consumer() {
        let topics = Arc::new(StreamTopicService::new(&test_stream_config()).await.unwrap());
        topics.initialize().await.unwrap();

        let crashed = NormalizedLogRecord {
            app_id: "svc-crash".to_string(),
            level: crate::data::types::LogLevel::Error,
            message: "left behind".to_string(),
            source: "api".to_string(),
            environment: None,
            metadata: None,
            trace_id: None,
            user_id: None,
            stream_message_id: None,
        };
        let payload = serde_json::to_vec(&crashed).unwrap();
        topics.publish(&payload).await.unwrap();

        // Simulate a consumer that read the message and then crashed
        // before the buffer's ack callback ever ran: deliver it into that
        // consumer's pending-entry list without acking.
        topics.read("worker-crashtest-1", 10, 50).await.unwrap();
        assert_eq!(topics.pending_info().await.unwrap().count, 1);

        let stream = Arc::new(StreamQueueAdapter::new(Arc::clone(&topics)));
        let persist = Arc::new(RecordingPersist { saved: std::sync::Mutex::new(Vec::new()) });
        let pool_config = WorkerPoolConfig {
            worker_count: 1,
            instance_id: "crashtest".to_string(),
            poll_interval_ms: 10,
            recovery_interval_ms: 10,
        };
        let tuning = WorkerTuning {
            poll_interval_ms: 10,
            recovery_interval_ms: 10,
            read_batch_size: 64,
            read_block_ms: 10,
            claim_min_idle_ms: 0,
            retry_queue_limit: 10_000,
            backpressure_cooldown_ms: 10,
        };

        let manager = WorkerPoolManager::start(
            pool_config,
            BufferConfig { max_batch_size: 10, max_wait_time_ms: 100 },
            tuning,
            stream,
            persist.clone(),
            Arc::new(OkRetry),
        );

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !persist.saved.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("recovery worker should have claimed and persisted the orphaned message");

        let saved = persist.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].message, "left behind");
        drop(saved);

        manager.shutdown(5).await;
        assert_eq!(topics.pending_info().await.unwrap().count, 0);
    }

    struct RecordingPersist {
        saved: std::sync::Mutex<Vec<NormalizedLogRecord>>,
    }
    #[async_trait::async_trait]
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
}
