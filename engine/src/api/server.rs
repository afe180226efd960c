//! Ingress HTTP server: binds `POST /v1/logs` and `GET /health` behind the
//! idempotency middleware, backed by the request coalescer.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use super::middleware::idempotency_middleware;
use super::routes::{health, logs};
use crate::core::constants::INGEST_BODY_LIMIT;
use crate::core::shutdown::ShutdownService;
use crate::data::duckdb::DuckdbService;
use crate::data::types::RawLogRecord;
use crate::domain::{Coalescer, IdempotencyStore, StreamQueueAdapter, ValidationStrategy};

/// Shared, cheaply-cloneable handle to every collaborator the ingress
/// routes need.
#[derive(Clone)]
pub struct IngestState {
    pub stream: Arc<StreamQueueAdapter>,
    pub database: Arc<DuckdbService>,
    pub idempotency: Arc<IdempotencyStore>,
    pub coalescer: Arc<Coalescer<RawLogRecord, Result<(), String>>>,
    pub validation: Arc<ValidationStrategy>,
}

pub struct ApiServer {
    state: IngestState,
    shutdown: ShutdownService,
}

impl ApiServer {
    pub fn new(
        stream: Arc<StreamQueueAdapter>,
        database: Arc<DuckdbService>,
        idempotency: Arc<IdempotencyStore>,
        coalescer: Arc<Coalescer<RawLogRecord, Result<(), String>>>,
        validation: Arc<ValidationStrategy>,
        shutdown: ShutdownService,
    ) -> Self {
        Self {
            state: IngestState {
                stream,
                database,
                idempotency,
                coalescer,
                validation,
            },
            shutdown,
        }
    }

    pub async fn start(self, host: &str, port: u16) -> Result<()> {
        let addr = SocketAddr::new(host.parse()?, port);

        let ingest_routes = Router::new()
            .route("/v1/logs", post(logs::ingest))
            .layer(axum::middleware::from_fn_with_state(
                self.state.idempotency.clone(),
                idempotency_middleware,
            ))
            .layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT));

        let router = Router::new()
            .route("/health", get(health::health))
            .merge(ingest_routes)
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .with_state(self.state);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(self.shutdown.wait())
            .await?;

        Ok(())
    }
}
