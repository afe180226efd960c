//! DuckDB schema definitions
//!
//! Append-only storage with no PRIMARY KEY constraints. Rows are batch-inserted
//! via the Appender API once per flushed batch; duplicates from at-least-once
//! redelivery are expected and left for downstream consumers to dedup on `id`.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- Infrastructure: Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description VARCHAR
);

-- ═══════════════════════════════════════════════════════════════════════════════
-- log_records: main table for ingested, normalized log records.
-- No PRIMARY KEY for append-only ingestion under at-least-once delivery.
-- ═══════════════════════════════════════════════════════════════════════════════
CREATE TABLE IF NOT EXISTS log_records (
    id              VARCHAR NOT NULL,   -- server-assigned if absent on ingest
    timestamp       TIMESTAMP NOT NULL, -- server-assigned if absent on ingest
    app_id          VARCHAR NOT NULL,
    level           VARCHAR NOT NULL,   -- trace/debug/info/warn/error/fatal
    message         VARCHAR NOT NULL,
    source          VARCHAR,
    environment     VARCHAR,
    metadata        JSON,               -- serialized user-defined key-value pairs
    trace_id        VARCHAR,
    user_id         VARCHAR,
    ingested_at     TIMESTAMP NOT NULL DEFAULT (now())
);

CREATE INDEX IF NOT EXISTS idx_log_records_app_ts ON log_records(app_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_log_records_trace ON log_records(trace_id);
CREATE INDEX IF NOT EXISTS idx_log_records_id ON log_records(id);
"#;
