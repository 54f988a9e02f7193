//! Long-poll coordination.
//!
//! [`LongPollCoordinator`] is the single entry point the transport calls. It
//! owns the broadcast log and the session registry, resolves the caller's
//! [`RemoteSessionId`], and turns every failure into one of the classified
//! errors the client protocol understands (see [`Error::kind`]).

use std::sync::Arc;

use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::broadcast_log::BroadcastLog;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBatch, TypeId};
use crate::fingerprint::DeploymentFingerprint;
use crate::registry::{SessionEntry, SessionRegistry};
use crate::session::{RemoteSessionId, ServerEpoch, SourceId};

/// Server-side request handler shared by every connection.
pub struct LongPollCoordinator {
    log: Arc<BroadcastLog>,
    registry: Arc<SessionRegistry>,
    epoch: ServerEpoch,
    config: ServerConfig,
}

impl LongPollCoordinator {
    /// Build a coordinator with a fresh log, registry and server epoch.
    ///
    /// The config is used as given; callers run [`ServerConfig::validate`]
    /// at startup.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_epoch(config, ServerEpoch::random())
    }

    pub fn with_epoch(config: ServerConfig, epoch: ServerEpoch) -> Result<Self> {
        let log = Arc::new(BroadcastLog::new(config.buffer_capacity)?);
        let registry = Arc::new(SessionRegistry::new(config.session_ttl));
        info!(
            server_epoch = %epoch,
            capacity = config.buffer_capacity,
            min_wait_ms = config.min_wait.as_millis() as u64,
            max_wait_ms = config.max_wait.as_millis() as u64,
            "Long-poll coordinator ready"
        );
        Ok(Self {
            log,
            registry,
            epoch,
            config,
        })
    }

    pub fn epoch(&self) -> ServerEpoch {
        self.epoch
    }

    pub fn log(&self) -> &Arc<BroadcastLog> {
        &self.log
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &DeploymentFingerprint {
        &self.config.fingerprint
    }

    /// Start a session positioned at the current log cursor.
    ///
    /// Fails with [`Error::SessionActive`] if the caller already presents a
    /// live session of this server.
    pub async fn open_session(&self, current: Option<&RemoteSessionId>) -> Result<RemoteSessionId> {
        if let Some(current) = current {
            if current.server_epoch == self.epoch
                && self.registry.lookup(&current.source_id).await.is_ok()
            {
                return Err(Error::SessionActive);
            }
        }

        let source_id = self.registry.create(self.log.cursor()).await;
        Ok(RemoteSessionId::new(self.epoch, source_id))
    }

    /// End the caller's session.
    pub async fn close_session(&self, current: Option<&RemoteSessionId>) -> Result<()> {
        let source_id = self.resolve(current.ok_or(Error::NoActiveSession)?)?;
        if self.registry.invalidate(&source_id).await {
            Ok(())
        } else {
            Err(Error::InvalidSession)
        }
    }

    /// Add `type_id` to the caller's allow-list. Returns whether it changed.
    pub async fn subscribe(&self, current: Option<&RemoteSessionId>, type_id: TypeId) -> Result<bool> {
        let source_id = self.resolve_optional(current)?;
        self.registry.subscribe_type(&source_id, type_id).await
    }

    /// Remove `type_id` from the caller's allow-list. Returns whether it changed.
    pub async fn unsubscribe(
        &self,
        current: Option<&RemoteSessionId>,
        type_id: &TypeId,
    ) -> Result<bool> {
        let source_id = self.resolve_optional(current)?;
        self.registry.unsubscribe_type(&source_id, type_id).await
    }

    /// Append an event to the log. Needs no session.
    pub fn publish(&self, type_id: TypeId, payload: serde_json::Value) -> i64 {
        let sequence = self.log.publish(type_id, payload);
        debug!(sequence, "Event published");
        sequence
    }

    /// Answer one `getAvailableEvents` request.
    ///
    /// Blocks for up to the configured max wait. Events outside the
    /// session's subscriptions are consumed (the cursor moves past them) but
    /// not returned.
    pub async fn poll(&self, current: Option<&RemoteSessionId>) -> Result<EventBatch> {
        let source_id = self.resolve_optional(current)?;
        let entry = self.registry.lookup(&source_id).await?;
        let _polling = entry.lock_poll().await;
        let started = Instant::now();

        let last_sequence = entry.with_state(|session| session.last_sequence());
        if let Err(err) = self.log.ensure_retained(last_sequence) {
            return Err(self.resync(&source_id, &entry, err));
        }

        let waited = time::timeout(
            self.config.request_timeout,
            self.log
                .wait_and_drain(last_sequence + 1, self.config.min_wait, self.config.max_wait),
        )
        .await;
        let drain = match waited {
            Ok(Ok(drain)) => drain,
            Ok(Err(err)) => return Err(self.resync(&source_id, &entry, err)),
            Err(_) => {
                warn!(source_id = %source_id, last_sequence, "Poll exceeded request timeout");
                return Err(Error::ConnectionTimeout);
            }
        };

        let events = entry.with_state(|session| {
            if session.is_invalidated() {
                return Err(Error::InvalidSession);
            }
            session.update_sequence(drain.cursor);
            Ok(drain
                .events
                .iter()
                .filter(|event| session.is_subscribed(&event.type_id))
                .map(|event| event.as_ref().clone())
                .collect::<Vec<_>>())
        })?;
        entry.touch();

        debug!(
            source_id = %source_id,
            last_sequence,
            cursor = drain.cursor,
            consumed = drain.events.len(),
            event_count = events.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Poll completed"
        );
        Ok(EventBatch {
            events,
            cursor: drain.cursor,
        })
    }

    /// Live session count, for health reporting.
    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    /// Move an overflowed session to the head so a resume can continue.
    fn resync(&self, source_id: &SourceId, entry: &SessionEntry, err: Error) -> Error {
        if let Error::Overflow { last_sequence, .. } = &err {
            let cursor = self.log.cursor();
            entry.with_state(|session| session.update_sequence(cursor));
            warn!(
                source_id = %source_id,
                last_sequence = *last_sequence,
                cursor,
                "Session overflowed, resynchronised to head"
            );
        }
        err
    }

    fn resolve_optional(&self, current: Option<&RemoteSessionId>) -> Result<SourceId> {
        self.resolve(current.ok_or(Error::InvalidSession)?)
    }

    fn resolve(&self, current: &RemoteSessionId) -> Result<SourceId> {
        if current.server_epoch != self.epoch {
            debug!(server_epoch = %current.server_epoch, "Session from another server epoch");
            return Err(Error::InvalidSession);
        }
        Ok(current.source_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broadcast_log::EMPTY_CURSOR;

    fn tid(s: &str) -> TypeId {
        TypeId::new(s).unwrap()
    }

    fn coordinator(capacity: usize) -> LongPollCoordinator {
        let config = ServerConfig::default().with_buffer_capacity(capacity);
        LongPollCoordinator::with_epoch(config, ServerEpoch::from_raw(1)).unwrap()
    }

    fn publish(coordinator: &LongPollCoordinator, type_id: &str, n: usize) {
        for i in 0..n {
            coordinator.publish(tid(type_id), serde_json::json!({ "i": i }));
        }
    }

    fn sequences(batch: &EventBatch) -> Vec<i64> {
        batch.events.iter().map(|e| e.sequence).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_receives_all_events_in_order() {
        let c = coordinator(4);
        let id = c.open_session(None).await.unwrap();
        c.subscribe(Some(&id), tid("t")).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..6 {
            c.publish(tid("t"), serde_json::Value::Null);
            let batch = c.poll(Some(&id)).await.unwrap();
            received.extend(sequences(&batch));
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_session_overflows_without_waiting() {
        let c = coordinator(4);
        publish(&c, "t", 1);
        let id = c.open_session(None).await.unwrap();
        publish(&c, "t", 5);
        assert_eq!(c.log().cursor(), 5);

        let started = Instant::now();
        let result = c.poll(Some(&id)).await;
        assert!(matches!(
            result,
            Err(Error::Overflow {
                cursor: 5,
                last_sequence: 0,
                capacity: 4
            })
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_identity_resumes_after_overflow() {
        let c = coordinator(4);
        publish(&c, "t", 1);
        let id = c.open_session(None).await.unwrap();
        c.subscribe(Some(&id), tid("t")).await.unwrap();
        publish(&c, "t", 5);
        assert!(c.poll(Some(&id)).await.is_err());

        c.publish(tid("t"), serde_json::Value::Null);
        let batch = c.poll(Some(&id)).await.unwrap();
        assert_eq!(sequences(&batch), vec![6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poll_returns_empty_after_max_wait() {
        let c = coordinator(4);
        let id = c.open_session(None).await.unwrap();

        let started = Instant::now();
        let batch = c.poll(Some(&id)).await.unwrap();
        assert!(batch.events.is_empty());
        assert_eq!(batch.cursor, EMPTY_CURSOR);
        assert_eq!(started.elapsed(), c.config().max_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_sees_no_backlog() {
        let c = coordinator(8);
        publish(&c, "t", 3);
        let id = c.open_session(None).await.unwrap();
        c.subscribe(Some(&id), tid("t")).await.unwrap();
        c.publish(tid("t"), serde_json::Value::Null);

        let batch = c.poll(Some(&id)).await.unwrap();
        assert_eq!(sequences(&batch), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_events_advance_cursor() {
        let c = coordinator(8);
        let id = c.open_session(None).await.unwrap();
        c.subscribe(Some(&id), tid("wanted")).await.unwrap();
        c.publish(tid("other"), serde_json::Value::Null);
        c.publish(tid("wanted"), serde_json::Value::Null);
        c.publish(tid("other"), serde_json::Value::Null);

        let batch = c.poll(Some(&id)).await.unwrap();
        assert_eq!(sequences(&batch), vec![1]);
        assert_eq!(batch.cursor, 2);

        c.publish(tid("wanted"), serde_json::Value::Null);
        let batch = c.poll(Some(&id)).await.unwrap();
        assert_eq!(sequences(&batch), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribed_types_are_not_delivered() {
        let c = coordinator(8);
        let id = c.open_session(None).await.unwrap();
        c.publish(tid("t"), serde_json::Value::Null);

        let batch = c.poll(Some(&id)).await.unwrap();
        assert!(batch.events.is_empty());
        assert_eq!(batch.cursor, 0);
    }

    #[tokio::test]
    async fn test_open_session_rejects_live_session() {
        let c = coordinator(4);
        let id = c.open_session(None).await.unwrap();
        assert!(matches!(
            c.open_session(Some(&id)).await,
            Err(Error::SessionActive)
        ));

        c.close_session(Some(&id)).await.unwrap();
        let fresh = c.open_session(Some(&id)).await.unwrap();
        assert_ne!(fresh, id);
    }

    #[tokio::test]
    async fn test_invalidated_identity_is_invalid_session() {
        let c = coordinator(4);
        let id = c.open_session(None).await.unwrap();
        c.close_session(Some(&id)).await.unwrap();

        assert!(matches!(c.poll(Some(&id)).await, Err(Error::InvalidSession)));
        assert!(matches!(
            c.subscribe(Some(&id), tid("t")).await,
            Err(Error::InvalidSession)
        ));
        assert!(matches!(
            c.close_session(Some(&id)).await,
            Err(Error::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_missing_identity() {
        let c = coordinator(4);
        assert!(matches!(c.poll(None).await, Err(Error::InvalidSession)));
        assert!(matches!(c.close_session(None).await, Err(Error::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_other_epoch_is_invalid_session() {
        let c = coordinator(4);
        let id = c.open_session(None).await.unwrap();
        let foreign = RemoteSessionId::new(ServerEpoch::from_raw(2), id.source_id);
        assert!(matches!(c.poll(Some(&foreign)).await, Err(Error::InvalidSession)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_past_request_timeout_is_connection_timeout() {
        let config = ServerConfig::default()
            .with_buffer_capacity(4)
            .with_request_timeout(Duration::from_secs(2));
        let c = LongPollCoordinator::with_epoch(config, ServerEpoch::from_raw(1)).unwrap();
        let id = c.open_session(None).await.unwrap();

        assert!(matches!(c.poll(Some(&id)).await, Err(Error::ConnectionTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_invalidated_mid_poll() {
        let c = Arc::new(coordinator(4));
        let id = c.open_session(None).await.unwrap();

        let poller = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.poll(Some(&id)).await })
        };
        time::sleep(Duration::from_secs(2)).await;
        c.close_session(Some(&id)).await.unwrap();

        let result = poller.await.unwrap();
        assert!(matches!(result, Err(Error::InvalidSession)));
    }
}
