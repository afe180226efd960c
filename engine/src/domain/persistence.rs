//! Persistence adapter (C6): bulk insert into the columnar store.
//!
//! `save` never retries internally — failures are routed to the retry
//! strategy by the buffer that owns this adapter (§4.6).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

use crate::data::duckdb::{DuckdbError, DuckdbService, log_records_repository};
use crate::data::types::NormalizedLogRecord;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("persistence store error: {0}")]
    Store(#[from] DuckdbError),
}

/// Combined ping + schema-probe result for the health endpoint.
#[derive(Debug, Clone)]
pub struct PersistHealth {
    pub healthy: bool,
    pub ping_latency_ms: u64,
    pub error: Option<String>,
}

/// Narrow interface the batch buffer (C4) depends on, so tests can swap in
/// a failing double without a real columnar store.
#[async_trait]
pub trait PersistSink: Send + Sync {
    async fn save(&self, records: Vec<NormalizedLogRecord>) -> Result<usize, PersistError>;
    async fn health_check(&self) -> PersistHealth;
}

/// DuckDB-backed implementation of [`PersistSink`].
pub struct PersistenceAdapter {
    db: Arc<DuckdbService>,
}

impl PersistenceAdapter {
    pub fn new(db: Arc<DuckdbService>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PersistSink for PersistenceAdapter {
    async fn save(&self, records: Vec<NormalizedLogRecord>) -> Result<usize, PersistError> {
        Ok(log_records_repository::save(&self.db, records).await?)
    }

    async fn health_check(&self) -> PersistHealth {
        let start = Instant::now();
        match self.db.health_check().await {
            Ok(()) => PersistHealth {
                healthy: true,
                ping_latency_ms: start.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => PersistHealth {
                healthy: false,
                ping_latency_ms: start.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::AppStorage;
    use crate::data::types::LogLevel;
    use tempfile::TempDir;

    async fn test_adapter() -> (TempDir, PersistenceAdapter) {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(temp_dir.path().join("duckdb"))
            .await
            .unwrap();
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        let db = Arc::new(DuckdbService::init(&storage).await.unwrap());
        (temp_dir, PersistenceAdapter::new(db))
    }

    fn sample() -> NormalizedLogRecord {
        NormalizedLogRecord {
            app_id: "svc-a".to_string(),
            level: LogLevel::Info,
            message: "hello".to_string(),
            source: "api".to_string(),
            environment: None,
            metadata: None,
            trace_id: None,
            user_id: None,
            stream_message_id: Some("1-0".to_string()),
        }
    }

    #[tokio::test]
    async fn save_persists_and_health_check_reports_healthy() {
        let (_dir, adapter) = test_adapter().await;
        let inserted = adapter.save(vec![sample()]).await.unwrap();
        assert_eq!(inserted, 1);
        let health = adapter.health_check().await;
        assert!(health.healthy);
        assert!(health.error.is_none());
    }
}
