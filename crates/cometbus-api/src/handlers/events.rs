//! Long-poll and publish handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};

use cometbus_core::{EventBatch, PublishReceipt, PublishRequest};

use crate::{ApiError, AppState, SessionHeader};

/// Block until events are available for the caller's session.
///
/// # Returns
/// - 200 OK with `{"events": [...], "cursor": n}`, possibly empty after the max wait
/// - 401 Unauthorized for an unknown, expired or invalidated session
/// - 410 Gone if the session fell further behind than the log retains
/// - 408 Request Timeout if the poll outlived the request budget
pub async fn poll_events(
    State(state): State<AppState>,
    current: SessionHeader,
) -> Result<Json<EventBatch>, ApiError> {
    let batch = state.coordinator.poll(current.session()).await?;
    Ok(Json(batch))
}

/// Publish an event to every session.
///
/// # Returns
/// - 202 Accepted with `{"sequence": n}`
/// - 400 Bad Request for a malformed body or type id
pub async fn publish_event(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublishReceipt>), ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let sequence = state.coordinator.publish(request.type_id, request.payload);
    Ok((StatusCode::ACCEPTED, Json(PublishReceipt { sequence })))
}
