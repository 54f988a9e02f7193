//! Session identities and per-session state.
//!
//! A client is known by a [`RemoteSessionId`]: the [`ServerEpoch`] of the
//! process that issued it plus an opaque [`SourceId`]. The epoch lets a
//! client notice it is talking to a restarted server; the source id keys the
//! server-side [`Session`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast_log::EMPTY_CURSOR;
use crate::error::{Error, Result};
use crate::events::TypeId;

/// Opaque per-client identity, assigned once at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Allocate a fresh, never reused identity (UUIDv7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one server process, chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerEpoch(u32);

impl ServerEpoch {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ServerEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for ServerEpoch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        u32::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("malformed server epoch: {}", s)))
    }
}

/// Composite session id carried on every request after `newSession`.
///
/// Rendered as `"<epoch-hex>.<source-uuid>"`, both in headers and in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteSessionId {
    pub server_epoch: ServerEpoch,
    pub source_id: SourceId,
}

impl RemoteSessionId {
    pub fn new(server_epoch: ServerEpoch, source_id: SourceId) -> Self {
        Self {
            server_epoch,
            source_id,
        }
    }
}

impl fmt::Display for RemoteSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.server_epoch, self.source_id)
    }
}

impl FromStr for RemoteSessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (epoch, source) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| Error::InvalidInput(format!("malformed session id: {}", s)))?;
        let source = Uuid::parse_str(source)
            .map_err(|_| Error::InvalidInput(format!("malformed source id: {}", source)))?;
        Ok(Self {
            server_epoch: epoch.parse()?,
            source_id: SourceId(source),
        })
    }
}

impl TryFrom<String> for RemoteSessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RemoteSessionId> for String {
    fn from(id: RemoteSessionId) -> Self {
        id.to_string()
    }
}

/// Server-side state bound to one client.
#[derive(Debug, Clone)]
pub struct Session {
    source_id: SourceId,
    last_sequence: i64,
    subscriptions: HashSet<TypeId>,
    invalidated: bool,
}

impl Session {
    /// Create a session that will see events after `start_cursor`.
    pub fn new(source_id: SourceId, start_cursor: i64) -> Self {
        Self {
            source_id,
            last_sequence: start_cursor.max(EMPTY_CURSOR),
            subscriptions: HashSet::new(),
            invalidated: false,
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Last log position consumed by this session.
    pub fn last_sequence(&self) -> i64 {
        self.last_sequence
    }

    pub fn update_sequence(&mut self, sequence: i64) {
        self.last_sequence = sequence;
    }

    /// Returns `true` if the type was not subscribed before.
    pub fn subscribe(&mut self, type_id: TypeId) -> bool {
        self.subscriptions.insert(type_id)
    }

    /// Returns `true` if the type was subscribed before.
    pub fn unsubscribe(&mut self, type_id: &TypeId) -> bool {
        self.subscriptions.remove(type_id)
    }

    /// Subscriptions are an allow-list: unsubscribed types are not delivered.
    pub fn is_subscribed(&self, type_id: &TypeId) -> bool {
        self.subscriptions.contains(type_id)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &TypeId> {
        self.subscriptions.iter()
    }

    /// Mark the session dead. Returns `false` if it already was.
    pub fn invalidate(&mut self) -> bool {
        !std::mem::replace(&mut self.invalidated, true)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}
