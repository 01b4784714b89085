//! Liveness and readiness probe handlers.

use axum::extract::State;
use axum::http::StatusCode;

use super::AppState;
use crate::network::HealthState;

/// Liveness probe: 200 `ok` when every opened dependency passes its health
/// check, otherwise 500 with the reason.
///
/// Dependencies the runtime never opened are not checked.
pub async fn liveness_handler(State(state): State<AppState>) -> (StatusCode, String) {
    match state.resources.check_alive().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(reason) => {
            tracing::warn!(%reason, "liveness check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Healthcheck failed because of {reason}"),
            )
        }
    }
}

/// Readiness probe: 200 only while the runtime is `Ready`, 503 during
/// startup and shutdown.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let health = state.shutdown.health_state();
    if health == HealthState::Ready {
        (StatusCode::OK, health.as_str())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, health.as_str())
    }
}
