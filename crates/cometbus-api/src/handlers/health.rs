//! Health endpoint.

use axum::{extract::State, response::IntoResponse, Json};

use crate::AppState;

/// Liveness plus a snapshot of the log and registry.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "server_epoch": coordinator.epoch().to_string(),
        "fingerprint": coordinator.fingerprint().as_str(),
        "cursor": coordinator.log().cursor(),
        "capacity": coordinator.log().capacity(),
        "sessions": coordinator.session_count().await,
    }))
}
