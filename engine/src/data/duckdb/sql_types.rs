//! `ToSql` wrappers for DuckDB Appender column types that don't have a
//! direct stdlib/chrono binding in the `duckdb` crate.

use chrono::{DateTime, Utc};
use duckdb::ToSql;
use duckdb::types::{ToSqlOutput, Value};

/// Wrapper for `DateTime<Utc>` to implement `ToSql` for a DuckDB TIMESTAMP
/// column via the Appender API.
pub struct SqlTimestamp(pub DateTime<Utc>);

impl ToSql for SqlTimestamp {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let ts = self.0.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        Ok(ToSqlOutput::Owned(Value::Text(ts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_microsecond_precision() {
        let dt = DateTime::parse_from_rfc3339("2026-01-01T00:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let ToSqlOutput::Owned(Value::Text(formatted)) = SqlTimestamp(dt).to_sql().unwrap() else {
            panic!("expected owned text value");
        };
        assert_eq!(formatted, "2026-01-01 00:00:00.123456");
    }
}
