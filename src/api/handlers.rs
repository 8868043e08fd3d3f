//! HTTP API handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::info;

use crate::network::{ConnectionState, EndpointManager, EndpointSnapshot};
use crate::orchestrator::{Orchestrator, StatusSnapshot};

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loop control and counters.
    pub orchestrator: Arc<Orchestrator>,
    /// Endpoint pool, for connection state and health.
    pub manager: Arc<EndpointManager>,
    /// Prometheus render handle, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        manager: Arc<EndpointManager>,
        prometheus: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            orchestrator,
            manager,
            prometheus,
        }
    }

    /// Loop running and an endpoint connected.
    pub fn is_ready(&self) -> bool {
        self.orchestrator.status().running && self.manager.state() == ConnectionState::Connected
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Whether the loop is running.
    pub running: bool,
    /// Endpoint connection state.
    pub connection: ConnectionState,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Loop status and counters.
    #[serde(flatten)]
    pub status: StatusSnapshot,
    /// Endpoint connection state.
    pub connection: ConnectionState,
    /// Active endpoint id.
    pub active_endpoint: Option<String>,
    /// Health of every configured endpoint.
    pub endpoints: Vec<EndpointSnapshot>,
}

/// Control response.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    /// Whether the call changed anything.
    pub changed: bool,
    /// Whether the loop is running after the call.
    pub running: bool,
    /// Terminal reason, if the run cannot be restarted.
    pub terminal: Option<String>,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.is_ready(),
        running: state.orchestrator.status().running,
        connection: state.manager.state(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns loop status, counters and endpoint health.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        status: state.orchestrator.status(),
        connection: state.manager.state(),
        active_endpoint: state.manager.active_endpoint(),
        endpoints: state.manager.endpoint_snapshots(),
    })
}

/// Start the loop. Idempotent.
pub async fn control_start(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.orchestrator.start().await;
    info!(changed, "Start requested over HTTP");
    let status = state.orchestrator.status();
    Json(ControlResponse {
        changed,
        running: status.running,
        terminal: status.terminal,
    })
}

/// Stop the loop. Idempotent.
///
/// Returns 202 immediately; the loop finishes any in-flight settlement in the
/// background.
pub async fn control_stop(State(state): State<AppState>) -> impl IntoResponse {
    let was_running = state.orchestrator.status().running;
    info!(was_running, "Stop requested over HTTP");

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.stop().await;
    });

    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            changed: was_running,
            running: false,
            terminal: state.orchestrator.status().terminal,
        }),
    )
}

/// Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
