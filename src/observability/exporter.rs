//! Pull-based metrics endpoint.
//!
//! Runs on its own listener, separate from the protocol channel:
//! - `GET /metrics`: Prometheus text format, pool gauges refreshed per scrape
//! - `GET /health`: pool snapshot as JSON, 503 once the pool is closed

use crate::db::SqlitePool;
use crate::error::{DbError, DbResult};
use crate::observability::Metrics;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

struct ExporterState {
    metrics: Arc<Metrics>,
    pool: SqlitePool,
}

/// HTTP server for the metrics and health endpoints.
pub struct MetricsExporter {
    state: Arc<ExporterState>,
    bind_addr: String,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<Metrics>, pool: SqlitePool, bind_addr: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ExporterState { metrics, pool }),
            bind_addr: bind_addr.into(),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(Arc::clone(&self.state))
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> DbResult<TcpListener> {
        TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind metrics endpoint to {}: {}", self.bind_addr, e),
                "Check that the metrics port is available or pass --metrics-port",
            )
        })
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> DbResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Metrics endpoint listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                error!(error = %e, "Metrics server error");
                DbError::internal(format!("Metrics server error: {}", e))
            })
    }
}

async fn metrics_handler(State(state): State<Arc<ExporterState>>) -> Result<Response<Body>, StatusCode> {
    state.metrics.record_pool_stats(&state.pool.stats());
    let body = state
        .metrics
        .render()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(body))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn health_handler(State(state): State<Arc<ExporterState>>) -> impl IntoResponse {
    let stats = state.pool.stats();
    let (status, label) = if state.pool.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "closed")
    } else {
        (StatusCode::OK, "ok")
    };
    (status, axum::Json(json!({ "status": label, "pool": stats })))
}
