//! Session header extraction.

use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use cometbus_core::{defaults::SOURCE_HEADER, RemoteSessionId};

/// The caller's session id, if the request carries a well-formed one.
///
/// A missing or malformed header yields `None`; the coordinator then answers
/// with the appropriate session error.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionHeader(pub Option<RemoteSessionId>);

impl SessionHeader {
    pub fn session(&self) -> Option<&RemoteSessionId> {
        self.0.as_ref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionHeader
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(SOURCE_HEADER) else {
            return Ok(Self(None));
        };
        let parsed = raw
            .to_str()
            .ok()
            .and_then(|value| value.parse::<RemoteSessionId>().ok());
        if parsed.is_none() {
            debug!(header = SOURCE_HEADER, "Ignoring malformed session header");
        }
        Ok(Self(parsed))
    }
}
