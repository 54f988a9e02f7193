//! Structured logging schema and field name constants for cometbus.
//!
//! The server, the HTTP surface and the client log with these field names so
//! a single query can follow one session across all of them.
//!
//! `tracing` macros take field names as identifiers, so call sites spell the
//! names out literally (`source_id = %id`). These constants are the naming
//! reference those call sites follow.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown, session created/expired) |
//! | DEBUG | Poll outcomes, state transitions, config choices |
//! | TRACE | Per-event data (publishes, individual deliveries) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Opaque per-client source identity.
pub const SOURCE_ID: &str = "source_id";

/// Epoch of the server process that issued a session.
pub const SERVER_EPOCH: &str = "server_epoch";

/// Event type identifier.
pub const TYPE_ID: &str = "type_id";

// ─── Log position fields ───────────────────────────────────────────────────

/// Sequence assigned to a single event.
pub const SEQUENCE: &str = "sequence";

/// Head of the log, or a session's position after a poll.
pub const CURSOR: &str = "cursor";

/// Last sequence a session consumed.
pub const LAST_SEQUENCE: &str = "last_sequence";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of events delivered in one poll.
pub const EVENT_COUNT: &str = "event_count";

/// Number of live sessions.
pub const SESSION_COUNT: &str = "session_count";

// ─── Client fields ─────────────────────────────────────────────────────────

/// Client connection state name.
pub const STATE: &str = "state";

/// Classified failure kind.
pub const FAILURE_KIND: &str = "failure_kind";

/// Delay before the next scheduled attempt, in milliseconds.
pub const DELAY_MS: &str = "delay_ms";
