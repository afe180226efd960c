//! Process-wide naming and tuning constants.

pub const APP_NAME: &str = "Strataline";
pub const APP_NAME_LOWER: &str = "strataline";

// ── Environment variables ──────────────────────────────────────────────

pub const ENV_HOST: &str = "STRATALINE_HOST";
pub const ENV_PORT: &str = "STRATALINE_PORT";
pub const ENV_LOG: &str = "STRATALINE_LOG";
pub const ENV_LOG_MODE: &str = "LOG_MODE";
pub const ENV_LOG_PRETTY: &str = "LOG_PRETTY";
pub const ENV_DATA_DIR: &str = "STRATALINE_DATA_DIR";

/// Stability key for consumer names; falls back to the host name when unset.
pub const ENV_WORKER_INSTANCE_ID: &str = "WORKER_INSTANCE_ID";
pub const ENV_ENFORCE_IDEMPOTENCY: &str = "ENFORCE_IDEMPOTENCY";

pub const ENV_STREAM_BACKEND: &str = "STRATALINE_STREAM_BACKEND";
pub const ENV_STREAM_REDIS_URL: &str = "STRATALINE_STREAM_REDIS_URL";
pub const ENV_CACHE_BACKEND: &str = "STRATALINE_CACHE_BACKEND";
pub const ENV_CACHE_REDIS_URL: &str = "STRATALINE_CACHE_REDIS_URL";

pub const ENV_WORKER_COUNT: &str = "STRATALINE_WORKER_COUNT";
pub const ENV_STREAM_NAME: &str = "STRATALINE_STREAM_NAME";
pub const ENV_CONSUMER_GROUP: &str = "STRATALINE_CONSUMER_GROUP";

// ── DuckDB tuning ───────────────────────────────────────────────────────

pub const DUCKDB_DB_FILENAME: &str = "strataline.duckdb";
pub const DUCKDB_CHECKPOINT_INTERVAL_SECS: u64 = 300;
pub const DUCKDB_QUERY_TIMEOUT_SECS: u64 = 30;

// ── Buffer (C4) defaults ────────────────────────────────────────────────

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100_000;
pub const MIN_MAX_BATCH_SIZE: usize = 1;
pub const MAX_MAX_BATCH_SIZE: usize = 1_000_000;

pub const DEFAULT_MAX_WAIT_TIME_MS: u64 = 1_000;
pub const MIN_MAX_WAIT_TIME_MS: u64 = 100;
pub const MAX_MAX_WAIT_TIME_MS: u64 = 30_000;

pub const HEALTH_CACHE_TTL_MS: u64 = 5_000;

// ── Retry / DLQ (C5) defaults ────────────────────────────────────────────

pub const DEFAULT_RETRY_QUEUE_LIMIT: usize = 10_000;
pub const DEFAULT_BACKPRESSURE_COOLDOWN_MS: u64 = 5_000;

// ── Worker / manager (C7/C8) defaults ────────────────────────────────────

pub const DEFAULT_READ_BATCH_SIZE: usize = 256;
pub const DEFAULT_READ_BLOCK_MS: u64 = 200;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_RECOVERY_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CLAIM_MIN_IDLE_MS: u64 = 30_000;
pub const BROKER_READ_ERROR_BACKOFF_MS: u64 = 1_000;

pub const RESTART_BASE_DELAY_MS: u64 = 1_000;
pub const RESTART_MAX_DELAY_MS: u64 = 30_000;
pub const WORKER_HEALTH_TIMEOUT_MS: u64 = 5_000;
pub const WORKER_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// How long a worker must stay running past its ready transition before a
/// subsequent crash is treated as a fresh failure rather than part of the
/// same crash loop, i.e. before its restart count resets to the base delay.
pub const WORKER_READY_RESET_THRESHOLD_MS: u64 = 60_000;

// ── Coalescer (C9) defaults ──────────────────────────────────────────────

pub const DEFAULT_COALESCE_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_COALESCE_MAX_WAIT_TIME_MS: u64 = 10;
pub const DEFAULT_COALESCE_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

// ── Idempotency (C10) defaults ───────────────────────────────────────────

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 128;
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;
pub const DEFAULT_RESPONSE_TTL_SECS: u64 = 86_400;

/// `Retry-After` hint returned with 503s when the stream queue is backed up.
pub const BACKPRESSURE_RETRY_AFTER_SECS: u64 = 5;

/// Body size cap for `POST /v1/logs`.
pub const INGEST_BODY_LIMIT: usize = 8 * 1024 * 1024;

// ── Value object (C1) bounds ──────────────────────────────────────────────

pub const APP_ID_MAX_LEN: usize = 64;
pub const MESSAGE_MAX_LEN: usize = 4_096;
pub const SOURCE_MAX_LEN: usize = 32;
pub const ENVIRONMENT_MAX_LEN: usize = 32;
pub const METADATA_MAX_SERIALIZED_BYTES: usize = 16_384;
pub const NORMALIZE_YIELD_BATCH_SIZE: usize = 10_000;
pub const NORMALIZE_YIELD_THRESHOLD: usize = 100_000;

// ── Validation strategy (C2) defaults ─────────────────────────────────────

pub const DEFAULT_SMALL_BATCH_THRESHOLD: usize = 50;
pub const DEFAULT_MEDIUM_BATCH_THRESHOLD: usize = 500;
pub const DEFAULT_MAX_VALIDATION_WORKERS: usize = 8;

// ── Idempotency / cache store tuning ──────────────────────────────────────

pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;
