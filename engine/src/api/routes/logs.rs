//! `POST /v1/logs`: validates and publishes a single record or a batch.
//!
//! Single records flow through the request coalescer (C9), merging
//! concurrent callers into one validate-then-publish round trip. A body
//! that is already an array is treated as one explicit batch and validated
//! directly, bypassing the coalescer.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::api::server::IngestState;
use crate::core::constants::BACKPRESSURE_RETRY_AFTER_SECS;
use crate::data::types::RawLogRecord;

#[derive(Deserialize)]
#[serde(untagged)]
enum IngestBody {
    Many(Vec<RawLogRecord>),
    One(RawLogRecord),
}

#[derive(Serialize)]
struct ErrorEntry {
    index: usize,
    error: String,
}

#[derive(Serialize)]
struct Stats {
    accepted: usize,
    rejected: usize,
    throughput: f64,
    #[serde(rename = "validationStrategy")]
    validation_strategy: &'static str,
}

#[derive(Serialize)]
struct SuccessBody {
    success: bool,
    message: String,
    stats: Stats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorEntry>,
}

#[derive(Serialize)]
struct FailureBody {
    success: bool,
    errors: Vec<ErrorEntry>,
}

pub async fn ingest(State(state): State<IngestState>, Json(body): Json<IngestBody>) -> Response {
    match body {
        IngestBody::One(record) => ingest_one(state, record).await,
        IngestBody::Many(records) => ingest_many(state, records).await,
    }
}

async fn ingest_one(state: IngestState, record: RawLogRecord) -> Response {
    match state.coalescer.add(record).await {
        Ok(Ok(())) => success(1, Vec::new(), 0.0, "coalesced"),
        Ok(Err(error)) => failure(vec![ErrorEntry { index: 0, error }]),
        Err(e) => backpressure(e.to_string()),
    }
}

async fn ingest_many(state: IngestState, records: Vec<RawLogRecord>) -> Response {
    let submitted = records.len();
    let outcome = state.validation.validate_batch(records).await;

    for record in &outcome.valid {
        if let Err(e) = state.stream.publish(record).await {
            tracing::warn!(error = %e, "failed to publish batch to stream");
            return backpressure(e.to_string());
        }
    }

    let accepted = outcome.valid.len();
    let errors: Vec<ErrorEntry> = outcome
        .errors
        .into_iter()
        .map(|e| ErrorEntry { index: e.index, error: e.error })
        .collect();

    if accepted == 0 && submitted > 0 {
        return failure(errors);
    }

    success(accepted, errors, outcome.throughput, outcome.strategy_tag)
}

fn success(accepted: usize, errors: Vec<ErrorEntry>, throughput: f64, strategy: &'static str) -> Response {
    let rejected = errors.len();
    (
        StatusCode::ACCEPTED,
        Json(SuccessBody {
            success: true,
            message: format!("accepted {accepted} of {} records", accepted + rejected),
            stats: Stats {
                accepted,
                rejected,
                throughput,
                validation_strategy: strategy,
            },
            errors,
        }),
    )
        .into_response()
}

fn failure(errors: Vec<ErrorEntry>) -> Response {
    (StatusCode::BAD_REQUEST, Json(FailureBody { success: false, errors })).into_response()
}

fn backpressure(error: String) -> Response {
    tracing::warn!(error = %error, "ingress publish failed, signaling backpressure");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(
            HeaderName::from_static("retry-after"),
            BACKPRESSURE_RETRY_AFTER_SECS.to_string(),
        )],
        Json(FailureBody {
            success: false,
            errors: vec![ErrorEntry { index: 0, error }],
        }),
    )
        .into_response()
}

