//! Session and subscription handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use cometbus_core::{SessionGrant, SubscriptionChange, TypeId};

use crate::{ApiError, AppState, SessionHeader};

/// Start a new session.
///
/// # Returns
/// - 201 Created with `{"session_id": "<epoch>.<source>"}`
/// - 409 Conflict if the request already carries a live session
pub async fn create_session(
    State(state): State<AppState>,
    current: SessionHeader,
) -> Result<(StatusCode, Json<SessionGrant>), ApiError> {
    let session_id = state.coordinator.open_session(current.session()).await?;
    info!(session_id = %session_id, "New session issued");
    Ok((StatusCode::CREATED, Json(SessionGrant { session_id })))
}

/// End the caller's session.
///
/// # Returns
/// - 204 No Content
/// - 401 Unauthorized if there is no live session to end
pub async fn delete_session(
    State(state): State<AppState>,
    current: SessionHeader,
) -> Result<StatusCode, ApiError> {
    state.coordinator.close_session(current.session()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add a type to the caller's allow-list.
pub async fn add_subscription(
    State(state): State<AppState>,
    current: SessionHeader,
    Path(type_id): Path<String>,
) -> Result<Json<SubscriptionChange>, ApiError> {
    let type_id = TypeId::new(type_id)?;
    let changed = state
        .coordinator
        .subscribe(current.session(), type_id)
        .await?;
    Ok(Json(SubscriptionChange { changed }))
}

/// Remove a type from the caller's allow-list.
pub async fn remove_subscription(
    State(state): State<AppState>,
    current: SessionHeader,
    Path(type_id): Path<String>,
) -> Result<Json<SubscriptionChange>, ApiError> {
    let type_id = TypeId::new(type_id)?;
    let changed = state
        .coordinator
        .unsubscribe(current.session(), &type_id)
        .await?;
    Ok(Json(SubscriptionChange { changed }))
}
