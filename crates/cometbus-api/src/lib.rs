//! # cometbus-api
//!
//! HTTP surface of the cometbus long-poll event bus.
//!
//! Every route resolves the caller's session from the
//! [`SOURCE_HEADER`](cometbus_core::defaults::SOURCE_HEADER) request header and
//! hands the request to the shared [`LongPollCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, put},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use cometbus_core::{defaults, LongPollCoordinator};

pub mod error;
pub mod extract;
pub mod handlers;

pub use error::ApiError;
pub use extract::SessionHeader;

/// Lower-case form of the session header, for CORS configuration.
pub const SOURCE_HEADER_NAME: HeaderName = HeaderName::from_static("x-remote-event-source");

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<LongPollCoordinator>,
}

impl AppState {
    pub fn new(coordinator: LongPollCoordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
        }
    }
}

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// CORS
// =============================================================================

/// Parse the CORS origin whitelist.
///
/// # Environment Variable
/// `ALLOWED_ORIGINS` - Comma-separated list of allowed origins
/// (default: `http://localhost:3000`)
pub fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
    parse_origin_list(&origins_str)
}

fn parse_origin_list(origins_str: &str) -> Vec<HeaderValue> {
    let origins: Vec<HeaderValue> = origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    if origins.is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }
    origins
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the application router with its middleware stack.
pub fn router(state: AppState) -> Router {
    use handlers::{events, health, probe, sessions};

    let probe_path = format!("/{}/:fingerprint", defaults::FINGERPRINT_PATH);

    Router::new()
        .route("/health", get(health::health_check))
        .route(&probe_path, get(probe::probe_fingerprint))
        .route(
            "/api/v1/sessions",
            axum::routing::post(sessions::create_session).delete(sessions::delete_session),
        )
        .route(
            "/api/v1/subscriptions/:type_id",
            put(sessions::add_subscription).delete(sessions::remove_subscription),
        )
        .route(
            "/api/v1/events",
            get(events::poll_events).post(events::publish_event),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parse_allowed_origins()))
                .allow_methods([
                    Method::GET,
                    Method::HEAD,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, SOURCE_HEADER_NAME])
                .max_age(Duration::from_secs(defaults::CORS_MAX_AGE_SECS)),
        )
        .layer(RequestBodyLimitLayer::new(defaults::MAX_BODY_SIZE_BYTES))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
