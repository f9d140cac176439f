//! Health, Snapshot and Metrics Endpoint
//!
//! HTTP surface for monitoring and for the UI process consuming the feed.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (push channel live)
//! - `GET /snapshot` - Prices, profiles and connection status
//! - `GET /profile/{symbol}` - Cached profile, starting a fetch on a miss
//! - `POST /restart` - Manual restart of the push channel and poller
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{MarketFeed, Resolution};
use crate::domain::streaming::ConnectionStatus;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Push channel status.
    pub connection: ConnectionStatus,
    /// Degraded or terminal notice, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    /// Symbols tracked.
    pub symbols: usize,
    /// Symbols with a known price.
    pub priced_symbols: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Push channel live.
    Healthy,
    /// Push channel down but prices are still available.
    Degraded,
    /// No push channel and no prices.
    Unhealthy,
}

/// Body returned by `POST /restart`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartResponse {
    /// Poller run started by the restart.
    pub run_id: u64,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: Arc<MarketFeed>,
}

impl HealthServerState {
    /// Create new server state.
    #[must_use]
    pub fn new(version: impl Into<String>, feed: Arc<MarketFeed>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            feed,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Health and snapshot HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the application router.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/profile/{symbol}", get(profile_handler))
        .route("/restart", post(restart_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.status().status == ConnectionStatus::Live {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn snapshot_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    Json(state.feed.snapshot())
}

async fn profile_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(symbol): Path<String>,
) -> Response {
    match state.feed.resolve_profile(&symbol) {
        Some(Resolution::Ready(view)) => (StatusCode::OK, Json(view)).into_response(),
        Some(Resolution::Pending) => StatusCode::ACCEPTED.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn restart_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.feed.manual_restart() {
        Ok(run_id) => (StatusCode::ACCEPTED, Json(RestartResponse { run_id })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Manual restart failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let report = state.feed.status();
    let symbols = state.feed.universe().len();
    let priced_symbols = state.feed.prices().priced_count();

    HealthResponse {
        status: determine_health_status(report.status, priced_symbols),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection: report.status,
        notice: report.notice,
        symbols,
        priced_symbols,
    }
}

const fn determine_health_status(connection: ConnectionStatus, priced_symbols: usize) -> HealthStatus {
    match connection {
        ConnectionStatus::Live => HealthStatus::Healthy,
        _ if priced_symbols > 0 => HealthStatus::Degraded,
        ConnectionStatus::Connecting => HealthStatus::Degraded,
        ConnectionStatus::Error | ConnectionStatus::HardStopped => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
