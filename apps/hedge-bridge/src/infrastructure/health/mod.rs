//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, bridge status reporting, and Prometheus
//! metrics. Read by container orchestrators and the UI shell; never mutates
//! core state.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON bridge status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (bridge serving)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::queue::TradeQueue;
use crate::application::status::BridgeStatus;
use crate::infrastructure::fanout::SharedFanoutHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Bridge version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Counterparty connection flags.
    pub connections: ConnectionsStatus,
    /// Queue and position counters.
    pub bridge: BridgeCounters,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both counterparties are connected.
    Healthy,
    /// The bridge serves but a counterparty is missing.
    Degraded,
    /// The gRPC server is not serving.
    Unhealthy,
}

/// Counterparty connection flags.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionsStatus {
    /// Whether the gRPC server is serving.
    pub bridge_active: bool,
    /// Whether the platform addon has shown recent life.
    pub addon_connected: bool,
    /// Whether the executor has an active stream.
    pub hedgebot_active: bool,
    /// Connected executor-facing streams.
    pub downstream_streams: usize,
    /// Connected platform-facing streams.
    pub upstream_streams: usize,
}

/// Queue and position counters.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeCounters {
    /// Outbound trade queue depth.
    pub queue_size: usize,
    /// Net platform position.
    pub net_position: i64,
    /// Open hedge count expressed as a lot size.
    pub hedge_size: f64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status: Arc<BridgeStatus>,
    queue: Arc<TradeQueue>,
    fanout: SharedFanoutHub,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        status: Arc<BridgeStatus>,
        queue: Arc<TradeQueue>,
        fanout: SharedFanoutHub,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            queue,
            fanout,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
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
    if state.status.is_bridge_active() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let bridge_active = state.status.is_bridge_active();
    let addon_connected = state.status.is_addon_connected();
    let hedgebot_active = state.status.is_hedgebot_active();

    let status = if !bridge_active {
        HealthStatus::Unhealthy
    } else if addon_connected && hedgebot_active {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connections: ConnectionsStatus {
            bridge_active,
            addon_connected,
            hedgebot_active,
            downstream_streams: state.fanout.downstream_count(),
            upstream_streams: state.fanout.upstream_count(),
        },
        bridge: BridgeCounters {
            queue_size: state.queue.len(),
            net_position: state.status.net_position(),
            hedge_size: state.status.hedge_size(),
        },
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
