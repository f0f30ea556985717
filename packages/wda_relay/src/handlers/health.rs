use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::hub::HubState;
use crate::metrics;

/// Health check endpoint - returns relay and hub status
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics.snapshot();

    match state.hub.status().await {
        Ok(hub) => {
            let status = if hub.state == HubState::Disconnected {
                "degraded"
            } else {
                "healthy"
            };
            Json(metrics::HealthStatus {
                status: status.to_string(),
                hub,
                sessions: snapshot.sessions.active,
                uptime_secs: snapshot.uptime_secs,
            })
            .into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
