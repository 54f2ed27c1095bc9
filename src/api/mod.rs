//! HTTP surface of the adapter
//!
//! - `POST /write` (and `/api/v1/write`): Prometheus remote write
//! - `POST /read` (and `/api/v1/read`): Prometheus remote read
//! - `GET {telemetry path}`: Prometheus scrape of the adapter's own metrics
//! - `GET /health`, `GET /ready`

mod read;
mod telemetry;
mod write;

pub use read::handle_remote_read;
pub use write::handle_remote_write;

use crate::reader::ReadService;
use crate::writer::WriteDispatcher;
use crate::Error;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use prometheus::Registry;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, warn};

const PROMETHEUS_TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Path of the scrape endpoint
    pub telemetry_path: String,
    /// Maximum request body size
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            telemetry_path: "/metrics".to_string(),
            max_body_bytes: 32 * 1024 * 1024, // 32MB
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: WriteDispatcher,
    pub reader: Arc<ReadService>,
    /// Registry rendered by the scrape endpoint
    pub registry: Registry,
}

/// Error returned by handlers: caller errors are 400, everything else 500.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, "Rejected request");
        }
        (status, self.0.to_string()).into_response()
    }
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState, config: &ApiConfig) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))

        // Remote storage
        .route("/write", post(handle_remote_write))
        .route("/read", post(handle_remote_read))
        .route("/api/v1/write", post(handle_remote_write))
        .route("/api/v1/read", post(handle_remote_read))

        // Own metrics
        .route(&config.telemetry_path, get(metrics_handler))

        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn ready_check(State(state): State<ApiState>) -> Response {
    if state.dispatcher.is_accepting() {
        "READY".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING DOWN").into_response()
    }
}

async fn metrics_handler(State(state): State<ApiState>) -> Result<Response, ApiError> {
    let text = crate::telemetry::render_registry(&state.registry)?;
    Ok(([(CONTENT_TYPE, PROMETHEUS_TEXT_FORMAT)], text).into_response())
}
