//! Idempotency-Key pre-handler hook (C10): consults the idempotency store
//! before the route runs and records the response after it completes.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::core::constants::IDEMPOTENCY_KEY_HEADER;
use crate::domain::{CachedResponse, IdempotencyDecision, IdempotencyStore};

pub async fn idempotency_middleware(
    State(store): State<Arc<IdempotencyStore>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match store.evaluate(key).await {
        IdempotencyDecision::Proceed => next.run(request).await,
        IdempotencyDecision::ProceedAndRecord { key: cache_key } => {
            record_response(&store, cache_key, next.run(request).await).await
        }
        IdempotencyDecision::Replay(cached) => replay(cached),
        IdempotencyDecision::Conflict { retry_after_secs } => (
            StatusCode::CONFLICT,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(json!({ "retryAfter": retry_after_secs })),
        )
            .into_response(),
        IdempotencyDecision::Rejected { reason } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "errors": [{ "index": 0, "error": reason }] })),
        )
            .into_response(),
    }
}

/// Buffers the handler's response body so it can both be cached and sent
/// to the caller, and only records it when the handler actually succeeded.
async fn record_response(store: &IdempotencyStore, cache_key: String, response: Response) -> Response {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "failed to buffer response body for idempotency recording");
            return Response::from_parts(parts, Body::empty());
        }
    };

    if status.is_success() {
        let payload = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        let cached = CachedResponse {
            status_code: status.as_u16(),
            payload,
            content_type,
        };
        if let Err(e) = store.complete(&cache_key, cached).await {
            tracing::warn!(error = %e, "failed to record idempotent response");
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn replay(cached: CachedResponse) -> Response {
    let status = StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::OK);
    (status, Json(cached.payload)).into_response()
}
