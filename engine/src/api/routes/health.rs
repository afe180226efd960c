//! Health check endpoint: pings the columnar store, stream backend, and
//! idempotency cache.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::api::server::IngestState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    pub stream: bool,
    pub cache: bool,
}

/// `GET /health`. Returns 200 when every collaborator's probe succeeds,
/// 503 otherwise.
pub async fn health(State(state): State<IngestState>) -> impl IntoResponse {
    let database = state.database.health_check().await.is_ok();
    let stream = state.stream.health_check().await.is_ok();
    let cache = state.idempotency.cache_health_check().await.is_ok();

    let status = if database && stream && cache {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if status == StatusCode::OK { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database,
            stream,
            cache,
        }),
    )
}
