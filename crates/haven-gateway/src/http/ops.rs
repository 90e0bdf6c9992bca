use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use haven_monitor::HealthStatus;

use crate::app::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET /health — aggregated collaborator probes. Degraded still serves 200;
/// unhealthy answers 503 so load balancers rotate the node out.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let report = state.health.check_all().await;
    let status_code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    let body = json!({
        "status": report.status,
        "version": VERSION,
        "components": report.components,
        "checked_at": report.checked_at,
        "ws_clients": state.ws_clients.len(),
        "live_sessions": state.sessions.live_actor_count(),
    });
    (status_code, Json(body)).into_response()
}

/// GET /metrics — text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
        .into_response()
}

/// GET /alerts — active plus recently-resolved alerts.
pub async fn alerts(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "active": state.alerts.active_alerts(),
        "recent": state.alerts.recent_resolved(),
    }))
    .into_response()
}
