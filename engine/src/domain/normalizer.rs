//! Value-object constructors and batch normalizer (C1).
//!
//! Converts loosely-typed [`RawLogRecord`]s into immutable
//! [`NormalizedLogRecord`]s, or a [`ValidationError`] naming the first
//! failing field.

use std::str::FromStr;

use serde_json::Value;

use crate::core::constants::{
    APP_ID_MAX_LEN, ENVIRONMENT_MAX_LEN, MESSAGE_MAX_LEN, NORMALIZE_YIELD_BATCH_SIZE,
    NORMALIZE_YIELD_THRESHOLD, SOURCE_MAX_LEN,
};
use crate::data::types::{LogLevel, NormalizedLogRecord, NormalizedMetadata, RawLogRecord, ValidationError};

/// Whether an optional trace id is validated against a UUID shape.
///
/// Preserves an open question from the source system: trace ids are
/// treated as opaque strings by default, but a caller may opt into
/// stricter validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceIdPolicy {
    #[default]
    Lenient,
    Strict,
}

static TRACE_ID_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    )
    .expect("trace id regex is valid")
});

fn required_string(value: &Option<Value>, field: &str) -> Result<String, String> {
    match value {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(format!("{field} must be a string")),
        None => Err(format!("{field} is required")),
    }
}

fn optional_string(value: &Option<Value>, field: &str) -> Result<Option<String>, String> {
    match value {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(format!("{field} must be a string")),
    }
}

fn validate_bounded(field: &str, s: &str, max_len: usize) -> Result<(), String> {
    let len = s.chars().count();
    if len == 0 {
        return Err(format!("{field} must not be empty"));
    }
    if len > max_len {
        return Err(format!("{field} exceeds maximum length of {max_len} characters"));
    }
    Ok(())
}

fn validate_trace_id(trace_id: &Option<String>, policy: TraceIdPolicy) -> Result<(), String> {
    if policy != TraceIdPolicy::Strict {
        return Ok(());
    }
    match trace_id {
        Some(id) if !TRACE_ID_RE.is_match(id) => {
            Err("trace_id does not match the expected UUID shape".to_string())
        }
        _ => Ok(()),
    }
}

/// Normalize a single raw record, stopping at the first invariant
/// violation and reporting it with the §6 wire shape.
pub fn normalize_one(
    raw: &RawLogRecord,
    index: usize,
    trace_id_policy: TraceIdPolicy,
) -> Result<NormalizedLogRecord, ValidationError> {
    normalize_one_inner(raw, trace_id_policy).map_err(|error| ValidationError { index, error })
}

fn normalize_one_inner(
    raw: &RawLogRecord,
    trace_id_policy: TraceIdPolicy,
) -> Result<NormalizedLogRecord, String> {
    let app_id = required_string(&raw.app_id, "app_id")?;
    validate_bounded("app_id", &app_id, APP_ID_MAX_LEN)?;

    let level_raw = required_string(&raw.level, "level")?;
    let level = LogLevel::from_str(&level_raw)?;

    let message = required_string(&raw.message, "message")?;
    validate_bounded("message", &message, MESSAGE_MAX_LEN)?;

    let source = required_string(&raw.source, "source")?;
    validate_bounded("source", &source, SOURCE_MAX_LEN)?;

    let environment = optional_string(&raw.environment, "environment")?;
    if let Some(env) = &environment {
        validate_bounded("environment", env, ENVIRONMENT_MAX_LEN)?;
    }

    let metadata = match &raw.metadata {
        Some(Value::Null) | None => None,
        Some(value) => Some(NormalizedMetadata::new(value.clone())?),
    };

    let trace_id = optional_string(&raw.trace_id, "trace_id")?;
    validate_trace_id(&trace_id, trace_id_policy)?;

    let user_id = optional_string(&raw.user_id, "user_id")?;

    Ok(NormalizedLogRecord {
        app_id,
        level,
        message,
        source,
        environment,
        metadata,
        trace_id,
        user_id,
        stream_message_id: None,
    })
}

/// Normalize a batch of raw records, returning valid records and
/// per-record errors separately. Cooperatively yields every
/// [`NORMALIZE_YIELD_BATCH_SIZE`] records once the batch exceeds
/// [`NORMALIZE_YIELD_THRESHOLD`], so a huge single submission doesn't
/// monopolize the async scheduler.
pub async fn normalize_batch(
    raws: Vec<RawLogRecord>,
    trace_id_policy: TraceIdPolicy,
) -> (Vec<NormalizedLogRecord>, Vec<ValidationError>) {
    let should_yield = raws.len() > NORMALIZE_YIELD_THRESHOLD;
    let mut valid = Vec::with_capacity(raws.len());
    let mut errors = Vec::new();

    for (index, raw) in raws.iter().enumerate() {
        match normalize_one(raw, index, trace_id_policy) {
            Ok(record) => valid.push(record),
            Err(err) => errors.push(err),
        }

        if should_yield && (index + 1) % NORMALIZE_YIELD_BATCH_SIZE == 0 {
            tokio::task::yield_now().await;
        }
    }

    (valid, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(app_id: &str, level: &str, message: &str, source: &str) -> RawLogRecord {
        RawLogRecord {
            app_id: Some(json!(app_id)),
            level: Some(json!(level)),
            message: Some(json!(message)),
            source: Some(json!(source)),
            ..Default::default()
        }
    }

    #[test]
    fn normalizes_case_insensitive_level() {
        let record = normalize_one(&raw("svc-a", "info", "hello", "api"), 0, TraceIdPolicy::Lenient)
            .unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.app_id, "svc-a");
        assert!(record.stream_message_id.is_none());
    }

    #[test]
    fn rejects_empty_app_id() {
        let err = normalize_one(&raw("", "info", "hello", "api"), 2, TraceIdPolicy::Lenient)
            .unwrap_err();
        assert_eq!(err.index, 2);
        assert!(err.error.contains("app_id"));
    }

    #[test]
    fn rejects_unknown_level() {
        let err = normalize_one(&raw("svc-a", "INVALID", "hello", "api"), 3, TraceIdPolicy::Lenient)
            .unwrap_err();
        assert_eq!(err.index, 3);
        assert!(err.error.contains("log level"));
    }

    #[test]
    fn lenient_policy_accepts_opaque_trace_id() {
        let mut r = raw("svc-a", "info", "hello", "api");
        r.trace_id = Some(json!("not-a-uuid"));
        assert!(normalize_one(&r, 0, TraceIdPolicy::Lenient).is_ok());
    }

    #[test]
    fn strict_policy_rejects_non_uuid_trace_id() {
        let mut r = raw("svc-a", "info", "hello", "api");
        r.trace_id = Some(json!("not-a-uuid"));
        let err = normalize_one(&r, 0, TraceIdPolicy::Strict).unwrap_err();
        assert!(err.error.contains("UUID"));
    }

    #[tokio::test]
    async fn batch_normalization_splits_valid_and_errors() {
        let raws = vec![
            raw("svc-a", "info", "hello", "api"),
            raw("", "info", "hello", "api"),
            raw("svc-b", "INVALID", "hello", "api"),
            raw("svc-c", "warn", "hello", "api"),
        ];
        let (valid, errors) = normalize_batch(raws, TraceIdPolicy::Lenient).await;
        assert_eq!(valid.len(), 2);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].index, 1);
        assert_eq!(errors[1].index, 2);
    }
}
