//! Deployment compatibility probe.

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::debug;

use cometbus_core::Error;

use crate::{ApiError, AppState};

/// `GET`/`HEAD /variant/:fingerprint`: 200 if this deployment serves the
/// fingerprint, 404 otherwise.
pub async fn probe_fingerprint(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.coordinator.fingerprint().matches(&fingerprint) {
        return Ok(StatusCode::OK);
    }
    debug!(fingerprint = %fingerprint, "Probe for a fingerprint this deployment does not serve");
    Err(Error::DeploymentMismatch(fingerprint).into())
}
