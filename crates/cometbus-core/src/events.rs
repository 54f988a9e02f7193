//! Event types carried by the broadcast log.
//!
//! Producers hand a [`TypeId`] and a JSON payload to the log; the log wraps
//! them in an [`EventEnvelope`] stamped with the sequence it assigned. The
//! envelope is immutable once published and shared between every reader
//! that drains it.
//!
//! ## Wire Format
//!
//! ```text
//! {"sequence":42,"event_id":"019508a0-...","type_id":"chat.message","occurred_at":"...","payload":{...}}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::RemoteSessionId;

/// Maximum length of a type identifier.
const MAX_TYPE_ID_LEN: usize = 256;

/// Stable identifier of an event's kind, used for subscription filtering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeId(String);

impl TypeId {
    /// Build a type identifier, rejecting empty or oversized names.
    ///
    /// `.` and `..` are also rejected: they cannot travel as a URL path
    /// segment.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("type id must not be empty".into()));
        }
        if id == "." || id == ".." {
            return Err(Error::InvalidInput(format!("type id {:?} is reserved", id)));
        }
        if id.len() > MAX_TYPE_ID_LEN {
            return Err(Error::InvalidInput(format!(
                "type id exceeds {} bytes",
                MAX_TYPE_ID_LEN
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TypeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TypeId> for String {
    fn from(id: TypeId) -> Self {
        id.0
    }
}

impl std::str::FromStr for TypeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A published event as stored in the log and delivered to sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position in the log, assigned exactly once at publish time.
    pub sequence: i64,
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Kind of event, matched against session subscriptions.
    pub type_id: TypeId,
    /// When the event was published (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Domain-specific event data.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Stamp a payload with the sequence the log assigned to it.
    pub fn new(sequence: i64, type_id: TypeId, payload: serde_json::Value) -> Self {
        Self {
            sequence,
            event_id: Uuid::now_v7(),
            type_id,
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// Body of a publish request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub type_id: TypeId,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Result of a publish request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub sequence: i64,
}

/// Body of a new-session response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub session_id: RemoteSessionId,
}

/// Body of a subscribe/unsubscribe response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChange {
    /// Whether the allow-list was modified.
    pub changed: bool,
}

/// Body of a poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// Events eligible for the session, in increasing sequence order.
    pub events: Vec<EventEnvelope>,
    /// The session's log position after this poll.
    pub cursor: i64,
}
