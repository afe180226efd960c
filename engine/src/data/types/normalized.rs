//! Log record value objects (C1): raw input, normalized output, and the
//! per-record validation error shape returned to ingress callers.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::constants::METADATA_MAX_SERIALIZED_BYTES;

use super::enums::LogLevel;

/// A submitted record before normalization. Fields are left as loosely
/// typed JSON values so the normalizer can report a precise reason for
/// each invariant violation instead of failing at the deserialization
/// boundary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLogRecord {
    #[serde(default)]
    pub app_id: Option<Value>,
    #[serde(default)]
    pub level: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub environment: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub trace_id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<Value>,
}

/// Metadata with its serialized form cached at construction time, since
/// the persistence adapter needs the pre-serialized string and the
/// validator needs its byte length.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedMetadata {
    value: Value,
    serialized: String,
}

impl NormalizedMetadata {
    /// Build from a JSON object value, rejecting non-object shapes and
    /// oversized serialized forms.
    pub fn new(value: Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err("metadata must be a JSON object".to_string());
        }
        let serialized =
            serde_json::to_string(&value).map_err(|e| format!("metadata not serializable: {e}"))?;
        if serialized.len() > METADATA_MAX_SERIALIZED_BYTES {
            return Err(format!(
                "metadata serialized size {} exceeds limit of {} bytes",
                serialized.len(),
                METADATA_MAX_SERIALIZED_BYTES
            ));
        }
        Ok(Self { value, serialized })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The cached serialized form, ready for a pre-serialized column
    /// write.
    pub fn serialized(&self) -> &str {
        &self.serialized
    }
}

impl<'de> Deserialize<'de> for NormalizedMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        NormalizedMetadata::new(value).map_err(de::Error::custom)
    }
}

/// A log record after normalization: immutable, fully typed, and ready
/// for buffering. Constructed only via the normalizer, which enforces
/// every invariant in §3 of the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedLogRecord {
    pub app_id: String,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub environment: Option<String>,
    pub metadata: Option<NormalizedMetadata>,
    pub trace_id: Option<String>,
    pub user_id: Option<String>,
    /// Present once the record has been read back off the stream;
    /// consumed by the buffer's ack callback.
    pub stream_message_id: Option<String>,
}

/// A single record's validation failure, surfaced in ingress 400
/// responses as `{index, error}`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub index: usize,
    pub error: String,
}
