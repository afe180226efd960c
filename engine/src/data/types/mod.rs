//! Shared log-record data model (§3): the raw submission shape, the
//! normalized value object, and the validation error shape returned to
//! ingress callers.

mod enums;
mod normalized;

pub use enums::LogLevel;
pub use normalized::{NormalizedLogRecord, NormalizedMetadata, RawLogRecord, ValidationError};
