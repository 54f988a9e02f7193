//! HTTP handlers for cometbus-api.

pub mod events;
pub mod health;
pub mod probe;
pub mod sessions;
