//! Engine configuration: CLI flags layered over environment variables over
//! defaults, validated once at startup and handed down by reference.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::cli::Cli;
use super::constants::*;

/// Stream queue backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for StreamBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Idempotency / rate-limit key-value cache backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Redis => write!(f, "redis"),
        }
    }
}

/// Batch buffer (C4) configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub max_batch_size: usize,
    pub max_wait_time_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_wait_time_ms: DEFAULT_MAX_WAIT_TIME_MS,
        }
    }
}

impl BufferConfig {
    /// Clamp configured values into their documented bounds.
    pub fn clamped(mut self) -> Self {
        self.max_batch_size = self
            .max_batch_size
            .clamp(MIN_MAX_BATCH_SIZE, MAX_MAX_BATCH_SIZE);
        self.max_wait_time_ms = self
            .max_wait_time_ms
            .clamp(MIN_MAX_WAIT_TIME_MS, MAX_MAX_WAIT_TIME_MS);
        self
    }
}

/// Retry / dead-letter strategy (C5) configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub retry_queue_limit: usize,
    pub backpressure_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_queue_limit: DEFAULT_RETRY_QUEUE_LIMIT,
            backpressure_cooldown_ms: DEFAULT_BACKPRESSURE_COOLDOWN_MS,
        }
    }
}

/// Stream queue adapter (C3) configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub backend: StreamBackendType,
    pub redis_url: Option<String>,
    pub stream_name: String,
    pub consumer_group: String,
    pub read_batch_size: usize,
    pub read_block_ms: u64,
    pub claim_min_idle_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backend: StreamBackendType::default(),
            redis_url: None,
            stream_name: "log_records".to_string(),
            consumer_group: "log_ingest".to_string(),
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            read_block_ms: DEFAULT_READ_BLOCK_MS,
            claim_min_idle_ms: DEFAULT_CLAIM_MIN_IDLE_MS,
        }
    }
}

/// Worker pool / thread manager (C7/C8) configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub instance_id: String,
    pub poll_interval_ms: u64,
    pub recovery_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            instance_id: hostname_fallback(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            recovery_interval_ms: DEFAULT_RECOVERY_INTERVAL_MS,
        }
    }
}

fn hostname_fallback() -> String {
    std::env::var(ENV_WORKER_INSTANCE_ID).unwrap_or_else(|_| {
        std::process::Command::new("hostname")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown-host".to_string())
    })
}

/// Request coalescer (C9) configuration.
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    pub enabled: bool,
    pub max_batch_size: usize,
    pub max_wait_time_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: DEFAULT_COALESCE_MAX_BATCH_SIZE,
            max_wait_time_ms: DEFAULT_COALESCE_MAX_WAIT_TIME_MS,
            shutdown_timeout_ms: DEFAULT_COALESCE_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

/// Idempotency store contract (C10) configuration.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub enforce: bool,
    pub cache_backend: CacheBackendType,
    pub cache_redis_url: Option<String>,
    pub lock_ttl_secs: u64,
    pub response_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enforce: false,
            cache_backend: CacheBackendType::default(),
            cache_redis_url: None,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            response_ttl_secs: DEFAULT_RESPONSE_TTL_SECS,
        }
    }
}

impl IdempotencyConfig {
    /// Project this into the generic key-value cache configuration used to
    /// build the idempotency store's `CacheService`.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            backend: self.cache_backend,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            eviction_policy: EvictionPolicy::TinyLfu,
            redis_url: self.cache_redis_url.clone(),
        }
    }
}

/// Eviction policy hint for the in-memory cache backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    #[default]
    TinyLfu,
    Lru,
}

/// Key-value cache configuration, shared by the idempotency store (C10).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub eviction_policy: EvictionPolicy,
    pub redis_url: Option<String>,
}

/// Top-level, validated engine configuration tree.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<std::path::PathBuf>,
    pub buffer: BufferConfig,
    pub retry: RetryConfig,
    pub stream: StreamConfig,
    pub workers: WorkerPoolConfig,
    pub coalescer: CoalescerConfig,
    pub idempotency: IdempotencyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
            data_dir: None,
            buffer: BufferConfig::default(),
            retry: RetryConfig::default(),
            stream: StreamConfig::default(),
            workers: WorkerPoolConfig::default(),
            coalescer: CoalescerConfig::default(),
            idempotency: IdempotencyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Layer CLI flags over environment variables over defaults, then
    /// clamp/validate once.
    pub fn load(cli: &Cli) -> Self {
        let mut cfg = Self::default();

        if let Some(host) = &cli.host {
            cfg.host = host.clone();
        }
        if let Some(port) = cli.port {
            cfg.port = port;
        }
        if let Some(dir) = &cli.data_dir {
            cfg.data_dir = Some(dir.clone());
        }
        if let Some(workers) = cli.worker_count {
            cfg.workers.worker_count = workers.max(1);
        }
        if let Some(backend) = cli.stream_backend {
            cfg.stream.backend = backend;
        }
        if let Some(url) = &cli.stream_redis_url {
            cfg.stream.redis_url = Some(url.clone());
        }
        if let Some(name) = &cli.stream_name {
            cfg.stream.stream_name = name.clone();
        }
        if let Some(group) = &cli.consumer_group {
            cfg.stream.consumer_group = group.clone();
        }
        if let Some(backend) = cli.cache_backend {
            cfg.idempotency.cache_backend = backend;
        }
        if let Some(url) = &cli.cache_redis_url {
            cfg.idempotency.cache_redis_url = Some(url.clone());
        }
        if cli.enforce_idempotency {
            cfg.idempotency.enforce = true;
        } else if std::env::var(ENV_ENFORCE_IDEMPOTENCY)
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE"))
            .unwrap_or(false)
        {
            cfg.idempotency.enforce = true;
        }

        cfg.buffer = cfg.buffer.clamped();
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_config_clamps_out_of_range_values() {
        let cfg = BufferConfig {
            max_batch_size: 0,
            max_wait_time_ms: 1,
        }
        .clamped();
        assert_eq!(cfg.max_batch_size, MIN_MAX_BATCH_SIZE);
        assert_eq!(cfg.max_wait_time_ms, MIN_MAX_WAIT_TIME_MS);

        let cfg = BufferConfig {
            max_batch_size: 10_000_000,
            max_wait_time_ms: 100_000,
        }
        .clamped();
        assert_eq!(cfg.max_batch_size, MAX_MAX_BATCH_SIZE);
        assert_eq!(cfg.max_wait_time_ms, MAX_MAX_WAIT_TIME_MS);
    }

    #[test]
    fn default_config_has_sane_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.buffer.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert!(!cfg.idempotency.enforce);
        assert_eq!(cfg.workers.worker_count, 3);
    }
}
