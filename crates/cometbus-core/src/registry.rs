//! Session registry with sliding idle expiry.
//!
//! Sessions are keyed by [`SourceId`]. Every successful lookup refreshes the
//! session's idle clock; sessions idle for longer than the TTL are removed
//! either when they are next looked up or by the background sweeper, and
//! listeners are told which of the two ways a session ended.
//!
//! Per-session state sits behind its own lock, so polls and subscription
//! changes for different sessions never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::defaults::SESSION_EVENT_CAPACITY;
use crate::error::{Error, Result};
use crate::events::TypeId;
use crate::session::{Session, SourceId};

/// Lifecycle notification emitted by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "source_id", rename_all = "snake_case")]
pub enum SessionEvent {
    Created(SourceId),
    Invalidated(SourceId),
    Expired(SourceId),
}

impl SessionEvent {
    pub fn source_id(&self) -> SourceId {
        match self {
            SessionEvent::Created(id) | SessionEvent::Invalidated(id) | SessionEvent::Expired(id) => {
                *id
            }
        }
    }
}

/// One registered session plus its access bookkeeping.
#[derive(Debug)]
pub struct SessionEntry {
    state: Mutex<Session>,
    last_access: Mutex<Instant>,
    poll_lock: tokio::sync::Mutex<()>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            state: Mutex::new(session),
            last_access: Mutex::new(Instant::now()),
            poll_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run `f` with exclusive access to the session state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Serialize polls for this session. Held for the whole long-poll.
    pub async fn lock_poll(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.poll_lock.lock().await
    }

    /// Whether a poll currently holds this session.
    pub fn is_polling(&self) -> bool {
        self.poll_lock.try_lock().is_err()
    }

    /// Reset the idle clock.
    pub fn touch(&self) {
        *self.access() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.access())
    }

    fn access(&self) -> MutexGuard<'_, Instant> {
        self.last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle for stopping a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send sweeper shutdown signal".into()))
    }
}

/// Concurrent map of live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SourceId, Arc<SessionEntry>>>,
    ttl: Duration,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            event_tx,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a listener for lifecycle events.
    ///
    /// Dropping the receiver unregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Create a session positioned at `start_cursor` and return its identity.
    pub async fn create(&self, start_cursor: i64) -> SourceId {
        let source_id = SourceId::generate();
        let entry = Arc::new(SessionEntry::new(Session::new(source_id, start_cursor)));
        self.sessions.write().await.insert(source_id, entry);

        info!(source_id = %source_id, last_sequence = start_cursor, "Session created");
        self.emit(SessionEvent::Created(source_id));
        source_id
    }

    /// Resolve a live session and refresh its idle clock.
    pub async fn lookup(&self, source_id: &SourceId) -> Result<Arc<SessionEntry>> {
        {
            let sessions = self.sessions.read().await;
            let entry = sessions.get(source_id).ok_or(Error::InvalidSession)?;
            if entry.idle_for(Instant::now()) < self.ttl {
                entry.touch();
                return Ok(Arc::clone(entry));
            }
        }

        self.expire(source_id).await;
        Err(Error::InvalidSession)
    }

    /// Explicitly end a session. Returns `false` if it was not live.
    pub async fn invalidate(&self, source_id: &SourceId) -> bool {
        let Some(entry) = self.sessions.write().await.remove(source_id) else {
            return false;
        };
        if !entry.with_state(Session::invalidate) {
            return false;
        }

        info!(source_id = %source_id, "Session invalidated");
        self.emit(SessionEvent::Invalidated(*source_id));
        true
    }

    /// Add `type_id` to the session's allow-list.
    pub async fn subscribe_type(&self, source_id: &SourceId, type_id: TypeId) -> Result<bool> {
        let entry = self.lookup(source_id).await?;
        let added = entry.with_state(|session| session.subscribe(type_id.clone()));
        debug!(source_id = %source_id, type_id = %type_id, added, "Subscription added");
        Ok(added)
    }

    /// Remove `type_id` from the session's allow-list.
    pub async fn unsubscribe_type(&self, source_id: &SourceId, type_id: &TypeId) -> Result<bool> {
        let entry = self.lookup(source_id).await?;
        let removed = entry.with_state(|session| session.unsubscribe(type_id));
        debug!(source_id = %source_id, type_id = %type_id, removed, "Subscription removed");
        Ok(removed)
    }

    /// Remove every session idle for longer than the TTL.
    ///
    /// Sessions with a poll in flight are skipped. Returns the number expired.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SourceId> = {
            let mut sessions = self.sessions.write().await;
            let stale: Vec<SourceId> = sessions
                .iter()
                .filter(|(_, entry)| !entry.is_polling() && entry.idle_for(now) >= self.ttl)
                .map(|(id, _)| *id)
                .collect();
            stale
                .into_iter()
                .filter(|id| {
                    sessions
                        .remove(id)
                        .is_some_and(|entry| entry.with_state(Session::invalidate))
                })
                .collect()
        };

        for source_id in &expired {
            info!(source_id = %source_id, "Session expired");
            self.emit(SessionEvent::Expired(*source_id));
        }
        if !expired.is_empty() {
            debug!(event_count = expired.len(), "Swept expired sessions");
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until shut down.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Session sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(interval) => {
                        registry.sweep_expired().await;
                    }
                }
            }
            info!("Session sweeper stopped");
        });

        SweeperHandle { shutdown_tx }
    }

    /// Access-triggered expiry of one session.
    async fn expire(&self, source_id: &SourceId) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(source_id) {
                // Another lookup may have refreshed it since we checked.
                Some(entry) if entry.idle_for(Instant::now()) >= self.ttl => {
                    sessions.remove(source_id)
                }
                _ => None,
            }
        };

        if let Some(entry) = removed {
            if entry.with_state(Session::invalidate) {
                info!(source_id = %source_id, "Session expired");
                self.emit(SessionEvent::Expired(*source_id));
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Err only means nobody is listening.
        let _ = self.event_tx.send(event);
    }
}
