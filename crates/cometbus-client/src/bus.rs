//! Client-side remote event bus.
//!
//! [`RemoteEventBus`] holds the active session identity and a table of local
//! handlers keyed by [`TypeId`]. Remote subscriptions follow the handler
//! table: the first handler for a type subscribes, and removing the last one
//! unsubscribes when auto-unsubscribe is on.
//!
//! The bus never schedules anything on its own; the
//! [`ResilienceController`](crate::controller::ResilienceController) decides
//! when to poll, probe or start a new session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use cometbus_core::{
    DeploymentFingerprint, Error, EventEnvelope, RemoteSessionId, Result, TypeId,
};

use crate::service::EventService;

/// Callback invoked for every delivered event of a subscribed type.
pub type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Identifies one registered handler, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct BusState {
    session: Option<RemoteSessionId>,
    /// Bumped whenever the identity is replaced or dropped, so a poll that
    /// started under an older identity can be recognised on return.
    generation: u64,
    polling: bool,
    handlers: HashMap<TypeId, Vec<(HandlerId, Handler)>>,
    auto_unsubscribe: bool,
}

/// Remote event bus bound to one [`EventService`].
pub struct RemoteEventBus {
    service: Arc<dyn EventService>,
    fingerprint: DeploymentFingerprint,
    state: Mutex<BusState>,
    next_handler: AtomicU64,
}

impl RemoteEventBus {
    pub fn new(service: Arc<dyn EventService>, fingerprint: DeploymentFingerprint) -> Self {
        Self {
            service,
            fingerprint,
            state: Mutex::new(BusState {
                auto_unsubscribe: true,
                ..BusState::default()
            }),
            next_handler: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &Arc<dyn EventService> {
        &self.service
    }

    /// The identity currently held, if any.
    pub fn session(&self) -> Option<RemoteSessionId> {
        self.lock().session
    }

    /// Whether polls are currently allowed.
    pub fn is_polling(&self) -> bool {
        let state = self.lock();
        state.polling && state.session.is_some()
    }

    pub fn set_auto_unsubscribe(&self, enabled: bool) {
        self.lock().auto_unsubscribe = enabled;
    }

    pub fn auto_unsubscribe(&self) -> bool {
        self.lock().auto_unsubscribe
    }

    /// Start a new remote session and subscribe every handled type.
    ///
    /// Fails with [`Error::SessionActive`] while a session is held. The
    /// identity is only usable for polling once every subscription is in
    /// place; if one fails the identity is abandoned and the error returned.
    pub async fn new_session(&self) -> Result<RemoteSessionId> {
        if self.lock().session.is_some() {
            return Err(Error::SessionActive);
        }

        let session = self.service.new_session(None).await?;
        let (types, generation) = {
            let mut state = self.lock();
            if state.session.is_some() {
                return Err(Error::SessionActive);
            }
            state.session = Some(session);
            state.generation += 1;
            state.polling = false;
            let types: Vec<TypeId> = state.handlers.keys().cloned().collect();
            (types, state.generation)
        };

        for type_id in &types {
            if let Err(err) = self.service.add_subscription(&session, type_id).await {
                warn!(
                    session_id = %session,
                    type_id = %type_id,
                    error = %err,
                    "Subscription failed, abandoning session"
                );
                self.abandon(session, generation).await;
                return Err(err);
            }
        }

        {
            let mut state = self.lock();
            if state.generation == generation {
                state.polling = true;
            }
        }
        info!(session_id = %session, subscriptions = types.len(), "Remote session started");
        Ok(session)
    }

    /// End the held session.
    ///
    /// Polling stops before the remote call is made. Fails with
    /// [`Error::NoActiveSession`] if no session is held.
    pub async fn invalidate_session(&self) -> Result<()> {
        let session = self.take_session().ok_or(Error::NoActiveSession)?;
        self.service.invalidate_session(&session).await?;
        info!(session_id = %session, "Remote session invalidated");
        Ok(())
    }

    /// Forget the held identity without telling the server.
    pub fn drop_session(&self) -> Option<RemoteSessionId> {
        let dropped = self.take_session();
        if let Some(session) = &dropped {
            debug!(session_id = %session, "Dropped session identity");
        }
        dropped
    }

    /// Allow polling again with the held identity.
    pub fn resume_session(&self) -> Result<RemoteSessionId> {
        let mut state = self.lock();
        let session = state.session.ok_or(Error::NoActiveSession)?;
        state.polling = true;
        Ok(session)
    }

    /// Register `handler` for `type_id`, subscribing remotely if it is the
    /// first handler for that type.
    ///
    /// If the remote subscribe fails the handler is not kept.
    pub async fn add_handler<F>(&self, type_id: TypeId, handler: F) -> Result<HandlerId>
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        let subscribe_as = {
            let mut state = self.lock();
            let handlers = state.handlers.entry(type_id.clone()).or_default();
            handlers.push((id, Arc::new(handler)));
            let first = handlers.len() == 1;
            if first {
                state.session
            } else {
                None
            }
        };

        if let Some(session) = subscribe_as {
            if let Err(err) = self.service.add_subscription(&session, &type_id).await {
                detach_handler(&mut self.lock(), &type_id, id);
                return Err(err);
            }
            debug!(type_id = %type_id, "Subscribed");
        }
        Ok(id)
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub async fn remove_handler(&self, type_id: &TypeId, id: HandlerId) -> Result<bool> {
        let (removed, unsubscribe_as) = {
            let mut state = self.lock();
            let (removed, now_empty) = detach_handler(&mut state, type_id, id);
            let unsubscribe = removed && now_empty && state.auto_unsubscribe;
            (removed, if unsubscribe { state.session } else { None })
        };

        if let Some(session) = unsubscribe_as {
            self.service.remove_subscription(&session, type_id).await?;
            debug!(type_id = %type_id, "Unsubscribed");
        }
        Ok(removed)
    }

    /// Number of handlers registered for `type_id`.
    pub fn handler_count(&self, type_id: &TypeId) -> usize {
        self.lock().handlers.get(type_id).map_or(0, Vec::len)
    }

    /// Issue one poll and dispatch what it returns.
    ///
    /// Returns the number of events dispatched. A response that arrives after
    /// the identity changed is discarded and counts as zero.
    pub async fn poll_once(&self) -> Result<usize> {
        let (session, generation) = {
            let state = self.lock();
            match state.session {
                Some(session) if state.polling => (session, state.generation),
                _ => return Err(Error::NoActiveSession),
            }
        };

        let result = self.service.get_available_events(&session).await;

        let handlers: Vec<(EventEnvelope, Vec<Handler>)> = {
            let state = self.lock();
            if state.generation != generation || state.session != Some(session) {
                debug!(session_id = %session, "Discarding poll result for a stale identity");
                return Ok(0);
            }
            let batch = result?;
            batch
                .events
                .into_iter()
                .map(|event| {
                    let handlers = state
                        .handlers
                        .get(&event.type_id)
                        .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                        .unwrap_or_default();
                    (event, handlers)
                })
                .collect()
        };

        let delivered = handlers.len();
        for (event, handlers) in handlers {
            if handlers.is_empty() {
                warn!(type_id = %event.type_id, sequence = event.sequence, "No handler for event");
            }
            for handler in handlers {
                handler(&event);
            }
        }
        Ok(delivered)
    }

    /// Check that the server still serves this client's fingerprint.
    pub async fn probe(&self) -> Result<()> {
        self.service.probe(&self.fingerprint).await
    }

    pub async fn publish(&self, type_id: &TypeId, payload: serde_json::Value) -> Result<i64> {
        self.service.publish(type_id, payload).await
    }

    /// Forget `session` if it is still the one started under `generation`,
    /// and end it on the server.
    async fn abandon(&self, session: RemoteSessionId, generation: u64) {
        let held = {
            let mut state = self.lock();
            if state.generation == generation && state.session == Some(session) {
                state.session = None;
                state.polling = false;
                state.generation += 1;
                true
            } else {
                false
            }
        };
        if held {
            if let Err(e) = self.service.invalidate_session(&session).await {
                debug!(session_id = %session, error = %e, "Could not end abandoned session");
            }
        }
    }

    fn take_session(&self) -> Option<RemoteSessionId> {
        let mut state = self.lock();
        state.polling = false;
        let taken = state.session.take();
        if taken.is_some() {
            state.generation += 1;
        }
        taken
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove handler `id` from `type_id`'s list. Returns whether it was there
/// and whether the type now has no handlers.
fn detach_handler(state: &mut BusState, type_id: &TypeId, id: HandlerId) -> (bool, bool) {
    let Some(handlers) = state.handlers.get_mut(type_id) else {
        return (false, true);
    };
    let before = handlers.len();
    handlers.retain(|(handler_id, _)| *handler_id != id);
    let removed = handlers.len() < before;
    let now_empty = handlers.is_empty();
    if now_empty {
        state.handlers.remove(type_id);
    }
    (removed, now_empty)
}
