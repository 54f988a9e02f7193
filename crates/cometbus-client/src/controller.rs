//! Session resilience controller.
//!
//! Keeps a [`RemoteEventBus`] connected for as long as the controller runs.
//! The decision logic lives in [`SessionStateMachine`], a pure transition
//! function over classified [`Outcome`]s; the driver spawned by
//! [`ResilienceController::spawn`] executes the commands it returns on a
//! single task, so there is never more than one timer or one call pending.
//!
//! ```text
//! Disconnected        session opened   -> InSession           (connected, new)
//! Disconnected        open failed      -> AwaitingResume
//! InSession           invalid session  -> AwaitingNewSession  (disconnected)
//! InSession           other failure    -> AwaitingResume      (disconnected)
//! AwaitingResume      probe ok         -> InSession           (connected, resumed)
//! AwaitingResume      probe not found  -> AwaitingNewSession
//! AwaitingResume      probe error      -> AwaitingResume
//! AwaitingNewSession  timer            -> open session again
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use cometbus_core::{defaults::SESSION_CHANGE_CAPACITY, Error, FailureKind, Result};

use crate::bus::RemoteEventBus;
use crate::config::ClientConfig;

/// Connectivity state of one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    InSession,
    AwaitingResume,
    AwaitingNewSession,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::InSession => "in_session",
            ConnectionState::AwaitingResume => "awaiting_resume",
            ConnectionState::AwaitingNewSession => "awaiting_new_session",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification that the logical "in session" state flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChange {
    pub in_session: bool,
    /// `true` when a new identity was issued, `false` on resume or disconnect.
    pub is_new: bool,
    /// Why the session was lost. Set only on disconnect.
    pub cause: Option<FailureKind>,
}

impl SessionChange {
    pub const CONNECTED_NEW: Self = Self {
        in_session: true,
        is_new: true,
        cause: None,
    };
    pub const RESUMED: Self = Self {
        in_session: true,
        is_new: false,
        cause: None,
    };

    pub const fn disconnected(cause: FailureKind) -> Self {
        Self {
            in_session: false,
            is_new: false,
            cause: Some(cause),
        }
    }
}

/// Work the driver performs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    OpenSession,
    Poll,
    Probe,
}

/// When to perform the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Now(Command),
    After(Duration, Command),
}

impl Next {
    pub fn command(self) -> Command {
        match self {
            Next::Now(command) | Next::After(_, command) => command,
        }
    }
}

/// Classified result of the last command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    SessionOpened,
    SessionFailed(FailureKind),
    Polled,
    PollFailed(FailureKind),
    /// The probe found this deployment; `has_session` tells whether an
    /// identity is held that can be resumed.
    ProbeOk { has_session: bool },
    ProbeFailed(FailureKind),
}

/// One transition: where we are now, what to tell listeners, what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: ConnectionState,
    pub notify: Option<SessionChange>,
    pub next: Next,
}

/// Pure four-state transition function.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: ConnectionState,
    retry_delay: Duration,
}

impl SessionStateMachine {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// First step from `Disconnected`: open a session immediately.
    pub fn start(&mut self) -> Step {
        self.state = ConnectionState::Disconnected;
        Step {
            state: self.state,
            notify: None,
            next: Next::Now(Command::OpenSession),
        }
    }

    pub fn handle(&mut self, outcome: Outcome) -> Step {
        use ConnectionState::*;

        let retry = |command| Next::After(self.retry_delay, command);
        let (state, notify, next) = match outcome {
            Outcome::SessionOpened => (
                InSession,
                Some(SessionChange::CONNECTED_NEW),
                Next::Now(Command::Poll),
            ),
            Outcome::SessionFailed(_) => (AwaitingResume, None, retry(Command::Probe)),
            Outcome::Polled => (InSession, None, Next::Now(Command::Poll)),
            Outcome::PollFailed(kind) if kind.is_resumable() => (
                AwaitingResume,
                Some(SessionChange::disconnected(kind)),
                retry(Command::Probe),
            ),
            Outcome::PollFailed(kind) => (
                AwaitingNewSession,
                Some(SessionChange::disconnected(kind)),
                retry(Command::OpenSession),
            ),
            Outcome::ProbeOk { has_session: true } => (
                InSession,
                Some(SessionChange::RESUMED),
                Next::Now(Command::Poll),
            ),
            Outcome::ProbeOk { has_session: false } => {
                (AwaitingNewSession, None, Next::Now(Command::OpenSession))
            }
            Outcome::ProbeFailed(FailureKind::DeploymentMismatch) => {
                (AwaitingNewSession, None, retry(Command::OpenSession))
            }
            Outcome::ProbeFailed(_) => (AwaitingResume, None, retry(Command::Probe)),
        };

        self.state = state;
        Step {
            state,
            notify,
            next,
        }
    }
}

/// Handle for observing and stopping a running controller.
pub struct ControllerHandle {
    shutdown_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<ConnectionState>,
    change_tx: broadcast::Sender<SessionChange>,
}

impl ControllerHandle {
    /// Stop the controller. An outstanding call is abandoned.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send controller shutdown signal".into()))
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to session-change notifications.
    pub fn session_changes(&self) -> broadcast::Receiver<SessionChange> {
        self.change_tx.subscribe()
    }
}

/// Drives a [`SessionStateMachine`] against a [`RemoteEventBus`].
pub struct ResilienceController {
    bus: Arc<RemoteEventBus>,
    machine: SessionStateMachine,
    state_tx: watch::Sender<ConnectionState>,
    change_tx: broadcast::Sender<SessionChange>,
}

impl ResilienceController {
    /// Start the controller on its own task.
    pub fn spawn(bus: Arc<RemoteEventBus>, config: &ClientConfig) -> ControllerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (change_tx, _) = broadcast::channel(SESSION_CHANGE_CAPACITY);

        let controller = Self {
            bus,
            machine: SessionStateMachine::new(config.retry_delay),
            state_tx,
            change_tx: change_tx.clone(),
        };
        tokio::spawn(async move {
            controller.run(&mut shutdown_rx).await;
        });

        ControllerHandle {
            shutdown_tx,
            state_rx,
            change_tx,
        }
    }

    async fn run(mut self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!("Resilience controller started");
        let mut step = self.machine.start();

        loop {
            self.apply(&step);

            let command = match step.next {
                Next::Now(command) => command,
                Next::After(delay, command) => {
                    debug!(delay_ms = delay.as_millis() as u64, ?command, "Retry scheduled");
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = sleep(delay) => command,
                    }
                }
            };

            let outcome = tokio::select! {
                _ = shutdown_rx.recv() => break,
                outcome = self.execute(command) => outcome,
            };
            step = self.machine.handle(outcome);
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("Resilience controller stopped");
    }

    fn apply(&self, step: &Step) {
        let previous = self.state_tx.send_replace(step.state);
        if previous != step.state {
            info!(state = %step.state, previous = %previous, "Connection state changed");
        }
        if step.state == ConnectionState::AwaitingNewSession {
            self.bus.drop_session();
        }
        if let Some(change) = step.notify {
            // Err only means nobody is listening.
            let _ = self.change_tx.send(change);
        }
    }

    async fn execute(&self, command: Command) -> Outcome {
        match command {
            Command::OpenSession => match self.bus.new_session().await {
                Ok(_) => Outcome::SessionOpened,
                Err(e) => {
                    warn!(error = %e, failure_kind = %e.kind(), "New session failed");
                    Outcome::SessionFailed(e.kind())
                }
            },
            Command::Poll => match self.bus.poll_once().await {
                Ok(_) => Outcome::Polled,
                Err(e) => {
                    warn!(error = %e, failure_kind = %e.kind(), "Poll failed");
                    Outcome::PollFailed(e.kind())
                }
            },
            Command::Probe => match self.bus.probe().await {
                Ok(()) => Outcome::ProbeOk {
                    has_session: self.bus.resume_session().is_ok(),
                },
                Err(e) => {
                    debug!(error = %e, failure_kind = %e.kind(), "Probe failed");
                    Outcome::ProbeFailed(e.kind())
                }
            },
        }
    }
}
