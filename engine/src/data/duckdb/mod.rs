//! DuckDB columnar persistence service (C6).
//!
//! Provides centralized database management: connection lifecycle, schema
//! migrations, and the bulk-insert repository used by the batch buffer.

pub mod error;
mod migrations;
pub mod repositories;
pub mod schema;
pub mod sql_types;

pub use error::DuckdbError;
pub use repositories::log_records as log_records_repository;

use std::sync::Arc;
use std::time::Duration;

use duckdb::Connection;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{
    DUCKDB_CHECKPOINT_INTERVAL_SECS, DUCKDB_DB_FILENAME, DUCKDB_QUERY_TIMEOUT_SECS,
};
use crate::core::storage::{AppStorage, DataSubdir};

/// DuckDB columnar store service.
///
/// Handles database initialization and background tasks.
/// Uses a single shared connection protected by a mutex.
pub struct DuckdbService {
    conn: Mutex<Option<Connection>>,
}

impl Drop for DuckdbService {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("DuckDB connection close failed during drop: {}", e);
            }
        }
    }
}

impl DuckdbService {
    /// Initialize the columnar service with a single connection.
    pub async fn init(storage: &AppStorage) -> Result<Self, DuckdbError> {
        let db_path = storage.subdir(DataSubdir::Duckdb).join(DUCKDB_DB_FILENAME);

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "SET autoinstall_known_extensions = false;
                 SET autoload_known_extensions = false;
                 SET force_compression = 'auto';
                 PRAGMA enable_checkpoint_on_shutdown;
                 LOAD json;",
            )?;
            Ok::<_, duckdb::Error>(conn)
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))??;

        migrations::run_migrations(&conn)?;

        tracing::debug!("DuckdbService initialized");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Get exclusive access to the connection.
    ///
    /// # Panics
    /// Panics if the connection has been closed via `close()`.
    pub fn conn(&self) -> parking_lot::MappedMutexGuard<'_, Connection> {
        MutexGuard::map(self.conn.lock(), |opt| {
            opt.as_mut()
                .expect("DuckDB connection already closed - do not call conn() after close()")
        })
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run a blocking DuckDB query with timeout.
    pub async fn run_query<T, F>(f: F) -> Result<T, DuckdbError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let timeout = Duration::from_secs(DUCKDB_QUERY_TIMEOUT_SECS);
        tokio::time::timeout(timeout, tokio::task::spawn_blocking(f))
            .await
            .map_err(|_| {
                tracing::warn!("DuckDB query timed out after {}s", DUCKDB_QUERY_TIMEOUT_SECS);
                DuckdbError::Timeout {
                    timeout_secs: DUCKDB_QUERY_TIMEOUT_SECS,
                }
            })?
            .map_err(|e| {
                tracing::error!(error = %e, "DuckDB query task failed");
                DuckdbError::Io(std::io::Error::other(format!("query execution failed: {}", e)))
            })
    }

    /// Combined ping + trivial schema probe used by the health endpoint (C6 `healthCheck`).
    pub async fn health_check(self: &Arc<Self>) -> Result<(), DuckdbError> {
        let db = Arc::clone(self);
        Self::run_query(move || {
            let conn = db.conn();
            conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;
            Ok::<_, duckdb::Error>(())
        })
        .await?
        .map_err(DuckdbError::from)
    }

    /// Run a checkpoint to flush the WAL into the main database file.
    pub async fn checkpoint(self: &Arc<Self>) -> Result<(), DuckdbError> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let conn_guard = db.conn.lock();
            if let Some(ref conn) = *conn_guard {
                conn.execute("CHECKPOINT", [])?;
                tracing::debug!("DuckDB checkpoint completed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))?
    }

    /// Close the DuckDB connection gracefully with explicit error handling.
    pub async fn close(self: Arc<Self>) -> Result<(), DuckdbError> {
        tokio::task::spawn_blocking(move || {
            let mut conn_guard = self.conn.lock();
            if let Some(conn) = conn_guard.take() {
                if let Err(e) = conn.execute("CHECKPOINT", []) {
                    tracing::warn!("CHECKPOINT failed during close: {}", e);
                }
                conn.close().map_err(|(_, e)| DuckdbError::Database(e))?;
                tracing::debug!("DuckDB connection closed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DuckdbError::Io(std::io::Error::other(e)))?
    }

    pub fn start_checkpoint_task(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let db = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(DUCKDB_CHECKPOINT_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("DuckDB checkpoint task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = db.checkpoint().await {
                            tracing::warn!("DuckDB checkpoint failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

/// Execute a function within a transaction, automatically rolling back on error.
pub(crate) fn in_transaction<F, T>(conn: &Connection, f: F) -> Result<T, DuckdbError>
where
    F: FnOnce(&Connection) -> Result<T, DuckdbError>,
{
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(val) => {
            conn.execute_batch("COMMIT")?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("ROLLBACK failed after transaction error: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_storage() -> (TempDir, AppStorage) {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let duckdb_dir = temp_dir.path().join("duckdb");
        tokio::fs::create_dir_all(&duckdb_dir).await.expect("failed to create duckdb dir");
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn service_init() {
        let (_temp_dir, storage) = create_test_storage().await;
        let result = DuckdbService::init(&storage).await;
        assert!(result.is_ok(), "DuckdbService should initialize successfully");
    }

    #[tokio::test]
    async fn service_conn() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = DuckdbService::init(&storage).await.expect("init should succeed");
        let conn = service.conn();
        drop(conn);
    }

    #[tokio::test]
    async fn service_checkpoint() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(DuckdbService::init(&storage).await.expect("init should succeed"));
        assert!(service.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn service_health_check() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(DuckdbService::init(&storage).await.expect("init should succeed"));
        assert!(service.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn schema_applied() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = DuckdbService::init(&storage).await.expect("init should succeed");
        let conn = service.conn();
        let version: i32 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| row.get(0))
            .expect("should read schema version");
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn service_close() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(DuckdbService::init(&storage).await.expect("init should succeed"));
        assert!(service.is_open());
        assert!(service.close().await.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_after_close_is_noop() {
        let (_temp_dir, storage) = create_test_storage().await;
        let service = Arc::new(DuckdbService::init(&storage).await.expect("init should succeed"));
        let service_for_checkpoint = Arc::clone(&service);
        service.close().await.expect("close should succeed");
        assert!(service_for_checkpoint.checkpoint().await.is_ok());
    }
}
