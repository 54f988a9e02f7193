//! # cometbus-core
//!
//! Server-side building blocks of the cometbus long-poll event bus: the
//! bounded broadcast log, the session registry, and the coordinator that
//! turns a poll request into a log read plus session bookkeeping.
//!
//! The HTTP surface (`cometbus-api`) and the client (`cometbus-client`) both
//! depend on the types defined here.

pub mod broadcast_log;
pub mod config;
pub mod coordinator;
pub mod defaults;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod logging;
pub mod registry;
pub mod session;

// Re-export commonly used types at crate root
pub use broadcast_log::{BroadcastLog, Drain, EMPTY_CURSOR};
pub use config::ServerConfig;
pub use coordinator::LongPollCoordinator;
pub use error::{Error, FailureKind, Result};
pub use events::{
    EventBatch, EventEnvelope, PublishReceipt, PublishRequest, SessionGrant, SubscriptionChange,
    TypeId,
};
pub use fingerprint::DeploymentFingerprint;
pub use registry::{SessionEntry, SessionEvent, SessionRegistry, SweeperHandle};
pub use session::{RemoteSessionId, ServerEpoch, Session, SourceId};
