//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use cometbus_core::{Error, FailureKind};

/// Error returned by every handler.
///
/// The body always carries the classified failure kind so clients never
/// have to interpret status codes on their own.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(err) => match err {
                Error::InvalidSession | Error::NoActiveSession => StatusCode::UNAUTHORIZED,
                Error::Overflow { .. } => StatusCode::GONE,
                Error::ConnectionTimeout => StatusCode::REQUEST_TIMEOUT,
                Error::SessionActive => StatusCode::CONFLICT,
                Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                Error::DeploymentMismatch(_) => StatusCode::NOT_FOUND,
                Error::Transient(_)
                | Error::Config(_)
                | Error::Serialization(_)
                | Error::Request(_)
                | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                Error::Remote { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::Core(err) => err.kind(),
            ApiError::BadRequest(_) => FailureKind::Transient,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match self {
            ApiError::Core(err) => err.to_string(),
            ApiError::BadRequest(msg) => msg,
        };
        if status.is_server_error() {
            error!(error = %message, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::InvalidSession, StatusCode::UNAUTHORIZED),
            (Error::NoActiveSession, StatusCode::UNAUTHORIZED),
            (
                Error::Overflow {
                    cursor: 9,
                    last_sequence: 0,
                    capacity: 4,
                },
                StatusCode::GONE,
            ),
            (Error::ConnectionTimeout, StatusCode::REQUEST_TIMEOUT),
            (Error::SessionActive, StatusCode::CONFLICT),
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_overflow_is_reported_as_overflow_kind() {
        let err = ApiError::from(Error::Overflow {
            cursor: 9,
            last_sequence: 0,
            capacity: 4,
        });
        assert_eq!(err.kind(), FailureKind::Overflow);
    }
}
