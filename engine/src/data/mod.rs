//! Data storage layer.
//!
//! - `duckdb` - columnar persistence adapter (C6)
//! - `cache` - key-value store backing the idempotency store (C10)
//! - `topics` - stream queue adapter backend (C3)
//! - `types` - shared log record data model (§3)

pub mod cache;
pub mod duckdb;
pub mod topics;
pub mod types;

pub use duckdb::DuckdbService;
