//! # cometbus-client
//!
//! Client side of the cometbus long-poll event bus.
//!
//! - [`service`]: the remote operations, with an HTTP implementation
//! - [`bus`]: session identity, handler dispatch and subscription bookkeeping
//! - [`controller`]: keeps the bus connected across timeouts, overflows,
//!   expired sessions and redeployments

pub mod bus;
pub mod config;
pub mod controller;
pub mod service;

pub use bus::{Handler, HandlerId, RemoteEventBus};
pub use config::ClientConfig;
pub use controller::{
    Command, ConnectionState, ControllerHandle, Next, Outcome, ResilienceController,
    SessionChange, SessionStateMachine, Step,
};
pub use service::{EventService, HttpEventService};
