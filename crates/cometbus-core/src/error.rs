//! Error types for cometbus.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using cometbus's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cometbus operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Session absent, expired, explicitly invalidated, or from another server epoch.
    #[error("Invalid session")]
    InvalidSession,

    /// Reader fell further behind than the log retains.
    #[error("Buffer overflow: cursor {cursor}, last sequence {last_sequence}, capacity {capacity}")]
    Overflow {
        cursor: i64,
        last_sequence: i64,
        capacity: usize,
    },

    /// No response within the transport's budget.
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// The compatibility probe reported a different deployment.
    #[error("Deployment mismatch: fingerprint {0} is not served")]
    DeploymentMismatch(String),

    /// Anything else that is worth retrying.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Failure already classified by the server.
    #[error("Remote failure ({kind}): {message}")]
    Remote { kind: FailureKind, message: String },

    /// A session is already active for the caller.
    #[error("A session is already active")]
    SessionActive,

    /// The caller holds no session.
    #[error("No active session")]
    NoActiveSession,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Classified failure understood by the client protocol.
///
/// Every [`Error`] maps into exactly one kind; recovery decisions are made
/// on the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidSession,
    Overflow,
    ConnectionTimeout,
    DeploymentMismatch,
    Transient,
}

impl FailureKind {
    /// Whether the current session identity can be kept after this failure.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            FailureKind::Overflow | FailureKind::ConnectionTimeout | FailureKind::Transient
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidSession => "invalid_session",
            FailureKind::Overflow => "overflow",
            FailureKind::ConnectionTimeout => "connection_timeout",
            FailureKind::DeploymentMismatch => "deployment_mismatch",
            FailureKind::Transient => "transient",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error into the client-facing taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::InvalidSession | Error::NoActiveSession => FailureKind::InvalidSession,
            Error::Overflow { .. } => FailureKind::Overflow,
            Error::ConnectionTimeout => FailureKind::ConnectionTimeout,
            Error::DeploymentMismatch(_) => FailureKind::DeploymentMismatch,
            Error::Remote { kind, .. } => *kind,
            Error::Transient(_)
            | Error::SessionActive
            | Error::InvalidInput(_)
            | Error::Config(_)
            | Error::Serialization(_)
            | Error::Request(_)
            | Error::Internal(_) => FailureKind::Transient,
        }
    }
}
