//! Centralized default constants for cometbus.
//!
//! **This module is the single source of truth** for shared default values.
//! The server, the HTTP surface and the client all reference these constants
//! instead of defining their own magic numbers.

// =============================================================================
// BROADCAST LOG
// =============================================================================

/// Number of events retained by the broadcast log.
pub const BUFFER_CAPACITY: usize = 1024;

/// Coalescing window for a poll that finds events, in milliseconds.
///
/// A burst of near-simultaneous publishes is returned as one batch.
pub const MIN_WAIT_MS: u64 = 1_000;

/// Upper bound on how long an idle poll is held open, in milliseconds.
pub const MAX_WAIT_MS: u64 = 10_000;

// =============================================================================
// SESSIONS
// =============================================================================

/// Sliding idle TTL for a session, in seconds.
pub const SESSION_TTL_SECS: u64 = 30;

/// Interval between passive expiry sweeps, in seconds.
pub const SWEEP_INTERVAL_SECS: u64 = 5;

/// Capacity of the session lifecycle event channel.
pub const SESSION_EVENT_CAPACITY: usize = 256;

/// Request header carrying the active [`RemoteSessionId`](crate::RemoteSessionId).
pub const SOURCE_HEADER: &str = "X-Remote-Event-Source";

// =============================================================================
// TRANSPORT
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Request timeout budget in milliseconds.
///
/// Must exceed [`MAX_WAIT_MS`] or polls get aborted mid-wait.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Path prefix under which the deployment fingerprint is published.
pub const FINGERPRINT_PATH: &str = "variant";

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

/// Maximum publish request body size in bytes (1 MB).
pub const MAX_BODY_SIZE_BYTES: usize = 1024 * 1024;

// =============================================================================
// CLIENT
// =============================================================================

/// Fixed delay before every resume or new-session retry, in milliseconds.
pub const RETRY_DELAY_MS: u64 = 3_000;

/// Default server base URL for clients.
pub const SERVER_URL: &str = "http://127.0.0.1:3000";

/// Capacity of the client session-change notification channel.
pub const SESSION_CHANGE_CAPACITY: usize = 32;
