use std::path::PathBuf;

use clap::Parser;

use super::config::{CacheBackendType, StreamBackendType};
use super::constants::{
    ENV_CACHE_BACKEND, ENV_CACHE_REDIS_URL, ENV_CONSUMER_GROUP, ENV_DATA_DIR,
    ENV_ENFORCE_IDEMPOTENCY, ENV_HOST, ENV_PORT, ENV_STREAM_BACKEND, ENV_STREAM_NAME,
    ENV_STREAM_REDIS_URL, ENV_WORKER_COUNT,
};

#[derive(Parser, Debug)]
#[command(name = "strataline")]
#[command(version, about = "Crash-proof stream-to-columnar log ingestion engine", long_about = None)]
pub struct Cli {
    /// Ingress server bind address
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// Ingress server port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// Directory for the DuckDB database file
    #[arg(long, env = ENV_DATA_DIR)]
    pub data_dir: Option<PathBuf>,

    /// Number of worker tasks to spawn (one is reserved for pending-entry recovery)
    #[arg(long, env = ENV_WORKER_COUNT)]
    pub worker_count: Option<usize>,

    /// Stream queue backend
    #[arg(long, env = ENV_STREAM_BACKEND, value_parser = parse_stream_backend)]
    pub stream_backend: Option<StreamBackendType>,

    /// Redis connection URL, required when stream_backend=redis
    #[arg(long, env = ENV_STREAM_REDIS_URL)]
    pub stream_redis_url: Option<String>,

    /// Stream name records are published to and read from
    #[arg(long, env = ENV_STREAM_NAME)]
    pub stream_name: Option<String>,

    /// Consumer group name shared by all workers
    #[arg(long, env = ENV_CONSUMER_GROUP)]
    pub consumer_group: Option<String>,

    /// Idempotency key-value store backend
    #[arg(long, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend)]
    pub cache_backend: Option<CacheBackendType>,

    /// Redis connection URL for the idempotency store, required when cache_backend=redis
    #[arg(long, env = ENV_CACHE_REDIS_URL)]
    pub cache_redis_url: Option<String>,

    /// Reject ingress requests missing an Idempotency-Key header
    #[arg(long, env = ENV_ENFORCE_IDEMPOTENCY)]
    pub enforce_idempotency: bool,
}

fn parse_stream_backend(s: &str) -> Result<StreamBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StreamBackendType::Memory),
        "redis" => Ok(StreamBackendType::Redis),
        other => Err(format!("unknown stream backend: {other}")),
    }
}

fn parse_cache_backend(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        other => Err(format!("unknown cache backend: {other}")),
    }
}
