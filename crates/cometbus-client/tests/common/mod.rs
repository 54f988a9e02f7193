//! Scripted in-memory [`EventService`] for bus and controller tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use cometbus_client::EventService;
use cometbus_core::{
    DeploymentFingerprint, Error, EventBatch, EventEnvelope, RemoteSessionId, Result, ServerEpoch,
    SourceId, TypeId,
};

/// Replies are consumed in order; an exhausted poll script blocks forever,
/// an exhausted session or probe script succeeds. Subscribes succeed unless
/// failures were scripted with [`ScriptedService::fail_subscriptions`].
#[derive(Default)]
pub struct ScriptedService {
    sessions: Mutex<VecDeque<Result<RemoteSessionId>>>,
    polls: Mutex<VecDeque<Result<EventBatch>>>,
    probes: Mutex<VecDeque<Result<()>>>,
    gate: Option<Arc<Notify>>,
    subscription_failures: AtomicUsize,
    pub subscribed: Mutex<Vec<(RemoteSessionId, TypeId)>>,
    pub unsubscribed: Mutex<Vec<(RemoteSessionId, TypeId)>>,
    pub invalidated: Mutex<Vec<RemoteSessionId>>,
    pub session_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(self, reply: Result<RemoteSessionId>) -> Self {
        self.sessions.lock().unwrap().push_back(reply);
        self
    }

    pub fn poll(self, reply: Result<EventBatch>) -> Self {
        self.polls.lock().unwrap().push_back(reply);
        self
    }

    pub fn probe(self, reply: Result<()>) -> Self {
        self.probes.lock().unwrap().push_back(reply);
        self
    }

    /// Fail the next `n` subscribe calls with a transient error.
    pub fn fail_subscriptions(self, n: usize) -> Self {
        self.subscription_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Hold every poll until the returned gate is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn sessions_opened(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn polls_made(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn probes_made(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventService for ScriptedService {
    async fn new_session(&self, _current: Option<&RemoteSessionId>) -> Result<RemoteSessionId> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.sessions.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Ok(session_id()))
    }

    async fn invalidate_session(&self, session: &RemoteSessionId) -> Result<()> {
        self.invalidated.lock().unwrap().push(*session);
        Ok(())
    }

    async fn add_subscription(&self, session: &RemoteSessionId, type_id: &TypeId) -> Result<bool> {
        let failing = self
            .subscription_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Transient("subscribe refused".into()));
        }
        self.subscribed
            .lock()
            .unwrap()
            .push((*session, type_id.clone()));
        Ok(true)
    }

    async fn remove_subscription(
        &self,
        session: &RemoteSessionId,
        type_id: &TypeId,
    ) -> Result<bool> {
        self.unsubscribed
            .lock()
            .unwrap()
            .push((*session, type_id.clone()));
        Ok(true)
    }

    async fn get_available_events(&self, _session: &RemoteSessionId) -> Result<EventBatch> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let reply = self.polls.lock().unwrap().pop_front();
        match reply {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }

    async fn publish(&self, _type_id: &TypeId, _payload: serde_json::Value) -> Result<i64> {
        Ok(0)
    }

    async fn probe(&self, fingerprint: &DeploymentFingerprint) -> Result<()> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.probes.lock().unwrap().pop_front();
        match reply {
            Some(Err(Error::DeploymentMismatch(_))) => {
                Err(Error::DeploymentMismatch(fingerprint.to_string()))
            }
            Some(reply) => reply,
            None => Ok(()),
        }
    }
}

pub fn session_id() -> RemoteSessionId {
    RemoteSessionId::new(ServerEpoch::from_raw(1), SourceId::generate())
}

pub fn type_id(s: &str) -> TypeId {
    TypeId::new(s).unwrap()
}

pub fn batch(type_ids: &[(&str, i64)]) -> EventBatch {
    let events: Vec<EventEnvelope> = type_ids
        .iter()
        .map(|(t, seq)| EventEnvelope::new(*seq, type_id(t), serde_json::json!({ "seq": seq })))
        .collect();
    let cursor = events.last().map_or(-1, |e| e.sequence);
    EventBatch { events, cursor }
}
