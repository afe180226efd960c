//! Bulk-insert persistence adapter (C6) for normalized log records.
//!
//! Uses the Appender API for the columnar store's native bulk-insert
//! path: the whole batch lands in one client/server round trip per flush.

use std::sync::Arc;

use duckdb::params;
use uuid::Uuid;

use crate::data::duckdb::sql_types::SqlTimestamp;
use crate::data::duckdb::{DuckdbError, DuckdbService};
use crate::data::types::NormalizedLogRecord;

/// Bulk insert a flushed batch. `id` and `timestamp` are server-assigned
/// here since the value object doesn't carry them; mapping of the rest
/// follows §6's column list.
pub async fn save(
    db: &Arc<DuckdbService>,
    records: Vec<NormalizedLogRecord>,
) -> Result<usize, DuckdbError> {
    if records.is_empty() {
        return Ok(0);
    }

    let db = Arc::clone(db);
    DuckdbService::run_query(move || {
        let conn = db.conn();
        let mut appender = conn.appender("log_records")?;
        let count = records.len();

        for record in &records {
            let id = Uuid::new_v4().to_string();
            let timestamp = SqlTimestamp(chrono::Utc::now());
            let metadata = record.metadata.as_ref().map(|m| m.serialized().to_string());
            let ingested_at = SqlTimestamp(chrono::Utc::now());

            appender.append_row(params![
                id,
                timestamp,
                record.app_id,
                record.level.to_string(),
                record.message,
                record.source,
                record.environment,
                metadata,
                record.trace_id,
                record.user_id,
                ingested_at,
            ])?;
        }

        appender.flush()?;
        Ok::<_, duckdb::Error>(count)
    })
    .await?
    .map_err(DuckdbError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::AppStorage;
    use crate::data::types::{LogLevel, NormalizedMetadata};
    use tempfile::TempDir;

    async fn test_service() -> (TempDir, Arc<DuckdbService>) {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let duckdb_dir = temp_dir.path().join("duckdb");
        tokio::fs::create_dir_all(&duckdb_dir)
            .await
            .expect("failed to create duckdb dir");
        let storage = AppStorage::init_for_test(temp_dir.path().to_path_buf());
        let service = Arc::new(
            DuckdbService::init(&storage)
                .await
                .expect("init should succeed"),
        );
        (temp_dir, service)
    }

    fn sample_record() -> NormalizedLogRecord {
        NormalizedLogRecord {
            app_id: "app-1".to_string(),
            level: LogLevel::Info,
            message: "hello world".to_string(),
            source: "api".to_string(),
            environment: Some("production".to_string()),
            metadata: Some(NormalizedMetadata::new(serde_json::json!({"k": "v"})).unwrap()),
            trace_id: Some("trace-1".to_string()),
            user_id: None,
            stream_message_id: Some("1-0".to_string()),
        }
    }

    #[tokio::test]
    async fn save_empty_batch_is_noop() {
        let (_dir, service) = test_service().await;
        let inserted = save(&service, vec![]).await.unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn save_inserts_rows_with_mapped_columns() {
        let (_dir, service) = test_service().await;
        let inserted = save(&service, vec![sample_record(), sample_record()])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let conn = service.conn();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM log_records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let (app_id, level, message): (String, String, String) = conn
            .query_row(
                "SELECT app_id, level, message FROM log_records LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(app_id, "app-1");
        assert_eq!(level, "INFO");
        assert_eq!(message, "hello world");
    }
}
