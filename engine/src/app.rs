//! Engine application wiring: assembles the storage, persistence,
//! stream, retry, worker pool, coalescer, and idempotency layers into a
//! single running process and drives the ingress server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use crate::api::ApiServer;
use crate::core::cli::Cli;
use crate::core::config::EngineConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG, ENV_LOG_MODE, ENV_LOG_PRETTY};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::cache::CacheService;
use crate::data::duckdb::DuckdbService;
use crate::data::topics::StreamTopicService;
use crate::domain::{
    CoalesceProcessor, Coalescer, IdempotencyStore, PersistenceAdapter, RetryStrategy,
    StreamQueueAdapter, ValidationStrategy, WorkerPoolManager, WorkerTuning,
};

/// Batches single-record ingress requests into one validate-then-publish
/// call, via the request coalescer (C9).
pub struct IngressProcessor {
    pub validation: Arc<ValidationStrategy>,
    pub stream: Arc<StreamQueueAdapter>,
}

#[async_trait::async_trait]
impl CoalesceProcessor<crate::data::types::RawLogRecord, Result<(), String>> for IngressProcessor {
    async fn process(
        &self,
        batch: Vec<crate::data::types::RawLogRecord>,
    ) -> Result<Vec<Result<(), String>>, String> {
        let outcome = self.validation.validate_batch(batch).await;
        let mut results = vec![Ok(()); outcome.valid.len() + outcome.errors.len()];
        for err in &outcome.errors {
            results[err.index] = Err(err.error.clone());
        }

        let mut valid_iter = outcome.valid.into_iter();
        for slot in results.iter_mut() {
            if slot.is_ok() {
                let record = valid_iter.next().expect("valid count matches Ok slots");
                if let Err(e) = self.stream.publish(&record).await {
                    *slot = Err(e.to_string());
                }
            }
        }
        Ok(results)
    }
}

/// Owns every long-lived collaborator and the graceful-shutdown sequence.
pub struct EngineApp {
    pub config: EngineConfig,
    pub storage: AppStorage,
    pub shutdown: ShutdownService,
    pub database: Arc<DuckdbService>,
    pub stream: Arc<StreamQueueAdapter>,
    pub idempotency: Arc<IdempotencyStore>,
    pub coalescer: Arc<Coalescer<crate::data::types::RawLogRecord, Result<(), String>>>,
    pub workers: Option<WorkerPoolManager>,
    pub validation: Arc<ValidationStrategy>,
}

impl EngineApp {
    /// Parse CLI/env, build every collaborator, and return a fully wired app.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        init_logging();

        tracing::debug!("strataline starting");

        let cli = Cli::parse();
        let config = EngineConfig::load(&cli);
        let app = Self::init(config).await?;
        app.start().await
    }

    async fn init(config: EngineConfig) -> Result<Self> {
        let storage = AppStorage::init(&config).await?;

        let database = Arc::new(
            DuckdbService::init(&storage)
                .await
                .context("failed to initialize DuckDB service")?,
        );

        let topics = StreamTopicService::new(&config.stream)
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize stream topic service: {e}"))?;
        topics.initialize().await.context("failed to ensure consumer group")?;
        let stream = Arc::new(StreamQueueAdapter::new(Arc::new(topics)));

        let retry = Arc::new(
            RetryStrategy::new(&config.stream)
                .await
                .map_err(|e| anyhow::anyhow!("failed to initialize retry strategy: {e}"))?,
        );

        let persist = Arc::new(PersistenceAdapter::new(Arc::clone(&database)));

        let idempotency_cache = CacheService::new(&config.idempotency.cache_config())
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize idempotency cache: {e}"))?;
        let idempotency = Arc::new(IdempotencyStore::new(
            idempotency_cache,
            config.idempotency.enforce,
            config.idempotency.lock_ttl_secs,
            config.idempotency.response_ttl_secs,
        ));

        let validation = Arc::new(ValidationStrategy::default());

        let workers = WorkerPoolManager::start(
            config.workers.clone(),
            config.buffer.clone(),
            WorkerTuning {
                poll_interval_ms: config.workers.poll_interval_ms,
                recovery_interval_ms: config.workers.recovery_interval_ms,
                read_batch_size: config.stream.read_batch_size,
                read_block_ms: config.stream.read_block_ms,
                claim_min_idle_ms: config.stream.claim_min_idle_ms,
                retry_queue_limit: config.retry.retry_queue_limit,
                backpressure_cooldown_ms: config.retry.backpressure_cooldown_ms,
            },
            Arc::clone(&stream),
            persist,
            retry,
        );

        let coalescer = Coalescer::new(
            config.coalescer.clone(),
            Arc::new(IngressProcessor {
                validation: Arc::clone(&validation),
                stream: Arc::clone(&stream),
            }),
        );

        let shutdown = ShutdownService::new(Arc::clone(&database));

        Ok(Self {
            config,
            storage,
            shutdown,
            database,
            stream,
            idempotency,
            coalescer,
            workers: Some(workers),
            validation,
        })
    }

    async fn start(mut self) -> Result<()> {
        self.shutdown.install_signal_handlers();
        self.shutdown
            .register(self.database.start_checkpoint_task(self.shutdown.subscribe()))
            .await;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            data_dir = %self.storage.subdir(crate::core::storage::DataSubdir::Duckdb).display(),
            "strataline ready"
        );

        let workers = self.workers.take().expect("workers started exactly once");
        let server = ApiServer::new(
            Arc::clone(&self.stream),
            Arc::clone(&self.database),
            Arc::clone(&self.idempotency),
            Arc::clone(&self.coalescer),
            Arc::clone(&self.validation),
            self.shutdown.clone(),
        );
        server.start(&self.config.host, self.config.port).await?;

        self.coalescer.shutdown(self.config.coalescer.shutdown_timeout_ms).await;
        workers.shutdown(crate::core::constants::WORKER_SHUTDOWN_TIMEOUT_SECS).await;
        self.shutdown.shutdown().await;

        Ok(())
    }
}

/// Configure the global tracing subscriber from `LOG_LEVEL`/`RUST_LOG`,
/// `LOG_MODE` (structured/silent/disabled/compact) and `LOG_PRETTY`.
fn init_logging() {
    let mode = std::env::var(ENV_LOG_MODE).unwrap_or_default();
    if mode.eq_ignore_ascii_case("disabled") || mode.eq_ignore_ascii_case("silent") {
        return;
    }

    let default_filter = format!("info,{APP_NAME_LOWER}=info");
    let filter = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or(default_filter);

    let pretty = std::env::var(ENV_LOG_PRETTY)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(filter);

    if mode.eq_ignore_ascii_case("structured") {
        subscriber.json().init();
    } else if pretty {
        subscriber.pretty().init();
    } else {
        subscriber.with_ansi(true).compact().init();
    }
}
