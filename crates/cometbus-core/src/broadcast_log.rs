//! Bounded single-writer, many-reader broadcast log.
//!
//! Events live in a fixed ring indexed by `sequence mod capacity`. Readers do
//! not register with the log: each one carries its own cursor and asks for
//! everything after it. A reader that lags more than `capacity` events behind
//! the head has lost events for good and gets [`Error::Overflow`].
//!
//! Wakeups go through a `tokio::sync::watch` channel holding the head
//! sequence, so a publish wakes every parked reader at once.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::events::{EventEnvelope, TypeId};

/// Cursor value of a log that has never published anything.
pub const EMPTY_CURSOR: i64 = -1;

/// Events handed to a reader together with the log position it reached.
#[derive(Debug, Clone)]
pub struct Drain {
    /// Contiguous events, in increasing sequence order.
    pub events: Vec<Arc<EventEnvelope>>,
    /// Sequence of the last event consumed (or the starting point minus one
    /// when nothing was consumed).
    pub cursor: i64,
}

struct Ring {
    slots: Vec<Option<Arc<EventEnvelope>>>,
    cursor: i64,
}

/// Fixed-capacity broadcast log.
pub struct BroadcastLog {
    capacity: usize,
    ring: RwLock<Ring>,
    head: watch::Sender<i64>,
}

impl BroadcastLog {
    /// Create an empty log retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("log capacity must be non-zero".into()));
        }
        let (head, _) = watch::channel(EMPTY_CURSOR);
        Ok(Self {
            capacity,
            ring: RwLock::new(Ring {
                slots: vec![None; capacity],
                cursor: EMPTY_CURSOR,
            }),
            head,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest published sequence, or [`EMPTY_CURSOR`].
    pub fn cursor(&self) -> i64 {
        *self.head.borrow()
    }

    /// Append an event and wake every waiting reader.
    ///
    /// Concurrent publishers are serialized on the ring's write lock.
    pub fn publish(&self, type_id: TypeId, payload: serde_json::Value) -> i64 {
        let mut ring = self.write_ring();
        let sequence = ring.cursor + 1;
        let slot = self.slot(sequence);
        ring.slots[slot] = Some(Arc::new(EventEnvelope::new(sequence, type_id, payload)));
        ring.cursor = sequence;
        // Advance the head while the slot is still locked so no reader can
        // observe the new cursor before the event is in place.
        self.head.send_replace(sequence);
        drop(ring);

        trace!(sequence, "Published event");
        sequence
    }

    /// Fail with [`Error::Overflow`] if events after `last_sequence` have
    /// already been evicted.
    pub fn ensure_retained(&self, last_sequence: i64) -> Result<()> {
        self.check_window(last_sequence, self.cursor())
    }

    /// Everything from `from` up to the head, without waiting.
    pub fn drain(&self, from: i64) -> Result<Drain> {
        let ring = self.read_ring();
        let last_sequence = from - 1;
        self.check_window(last_sequence, ring.cursor)?;

        let start = from.max(0);
        let mut events = Vec::with_capacity((ring.cursor - start + 1).max(0) as usize);
        for sequence in start..=ring.cursor {
            match &ring.slots[self.slot(sequence)] {
                Some(event) if event.sequence == sequence => events.push(Arc::clone(event)),
                _ => {
                    return Err(Error::Internal(format!(
                        "slot for sequence {} does not hold it",
                        sequence
                    )))
                }
            }
        }

        Ok(Drain {
            cursor: last_sequence.max(EMPTY_CURSOR) + events.len() as i64,
            events,
        })
    }

    /// Block until events at or after `from` can be returned.
    ///
    /// If something arrives within `min_wait` the call holds until the
    /// coalescing window closes and returns the whole burst. Otherwise it
    /// keeps waiting until `max_wait` (measured from the call) for at least
    /// one event and returns whatever is there, possibly nothing.
    pub async fn wait_and_drain(
        &self,
        from: i64,
        min_wait: Duration,
        max_wait: Duration,
    ) -> Result<Drain> {
        let started = Instant::now();
        self.ensure_retained(from - 1)?;

        let mut head = self.head.subscribe();
        let min_deadline = started + min_wait;
        let max_deadline = started + max_wait.max(min_wait);

        let arrived = time::timeout_at(min_deadline, reached(&mut head, from))
            .await
            .unwrap_or(false);
        if arrived {
            time::sleep_until(min_deadline).await;
        } else {
            let _ = time::timeout_at(max_deadline, reached(&mut head, from)).await;
        }

        let drain = self.drain(from)?;
        debug!(
            from,
            event_count = drain.events.len(),
            cursor = drain.cursor,
            duration_ms = started.elapsed().as_millis() as u64,
            "Drained log"
        );
        Ok(drain)
    }

    fn check_window(&self, last_sequence: i64, cursor: i64) -> Result<()> {
        if cursor - last_sequence > self.capacity as i64 {
            return Err(Error::Overflow {
                cursor,
                last_sequence,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn slot(&self, sequence: i64) -> usize {
        sequence.rem_euclid(self.capacity as i64) as usize
    }

    fn read_ring(&self) -> RwLockReadGuard<'_, Ring> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_ring(&self) -> RwLockWriteGuard<'_, Ring> {
        self.ring.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn reached(head: &mut watch::Receiver<i64>, target: i64) -> bool {
    head.wait_for(|cursor| *cursor >= target).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_id() -> TypeId {
        TypeId::new("test.event").unwrap()
    }

    fn publish_n(log: &BroadcastLog, n: i64) {
        for i in 0..n {
            log.publish(type_id(), serde_json::json!({ "i": i }));
        }
    }

    fn sequences(drain: &Drain) -> Vec<i64> {
        drain.events.iter().map(|e| e.sequence).collect()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(BroadcastLog::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_log_cursor() {
        let log = BroadcastLog::new(4).unwrap();
        assert_eq!(log.cursor(), EMPTY_CURSOR);
        let drain = log.drain(0).unwrap();
        assert!(drain.events.is_empty());
        assert_eq!(drain.cursor, EMPTY_CURSOR);
    }

    #[test]
    fn test_publish_assigns_consecutive_sequences() {
        let log = BroadcastLog::new(4).unwrap();
        assert_eq!(log.publish(type_id(), serde_json::Value::Null), 0);
        assert_eq!(log.publish(type_id(), serde_json::Value::Null), 1);
        assert_eq!(log.publish(type_id(), serde_json::Value::Null), 2);
        assert_eq!(log.cursor(), 2);
    }

    #[test]
    fn test_drain_returns_range_in_order() {
        let log = BroadcastLog::new(8).unwrap();
        publish_n(&log, 5);

        let drain = log.drain(2).unwrap();
        assert_eq!(sequences(&drain), vec![2, 3, 4]);
        assert_eq!(drain.cursor, 4);
        assert_eq!(drain.events[0].payload["i"], 2);
    }

    #[test]
    fn test_drain_past_head_is_empty() {
        let log = BroadcastLog::new(8).unwrap();
        publish_n(&log, 3);

        let drain = log.drain(3).unwrap();
        assert!(drain.events.is_empty());
        assert_eq!(drain.cursor, 2);
    }

    #[test]
    fn test_interleaved_drains_receive_every_event_once() {
        // Capacity 4, events 0..=5 published in two bursts.
        let log = BroadcastLog::new(4).unwrap();
        let mut last = EMPTY_CURSOR;
        let mut seen = Vec::new();

        publish_n(&log, 4);
        let drain = log.drain(last + 1).unwrap();
        seen.extend(sequences(&drain));
        last = drain.cursor;

        publish_n(&log, 2);
        let drain = log.drain(last + 1).unwrap();
        seen.extend(sequences(&drain));

        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_overflow_when_reader_lags_beyond_capacity() {
        let log = BroadcastLog::new(4).unwrap();
        publish_n(&log, 6);

        // last_sequence 0, cursor 5: 5 - 0 > 4
        let err = log.drain(1).unwrap_err();
        assert!(matches!(
            err,
            Error::Overflow {
                cursor: 5,
                last_sequence: 0,
                capacity: 4
            }
        ));

        // last_sequence 1 is exactly at the window edge.
        let drain = log.drain(2).unwrap();
        assert_eq!(sequences(&drain), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_ensure_retained() {
        let log = BroadcastLog::new(4).unwrap();
        publish_n(&log, 6);
        assert!(log.ensure_retained(1).is_ok());
        assert!(log.ensure_retained(0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_drain_empty_after_max_wait() {
        let log = BroadcastLog::new(4).unwrap();
        let started = Instant::now();

        let drain = log
            .wait_and_drain(0, Duration::from_millis(1000), Duration::from_millis(10_000))
            .await
            .unwrap();

        assert!(drain.events.is_empty());
        assert_eq!(drain.cursor, EMPTY_CURSOR);
        assert_eq!(started.elapsed(), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_drain_coalesces_burst() {
        let log = Arc::new(BroadcastLog::new(16).unwrap());
        let publisher = Arc::clone(&log);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            publisher.publish(type_id(), serde_json::Value::Null);
            time::sleep(Duration::from_millis(300)).await;
            publisher.publish(type_id(), serde_json::Value::Null);
        });

        let started = Instant::now();
        let drain = log
            .wait_and_drain(0, Duration::from_millis(1000), Duration::from_millis(10_000))
            .await
            .unwrap();

        assert_eq!(sequences(&drain), vec![0, 1]);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_drain_returns_on_first_event_after_min_window() {
        let log = Arc::new(BroadcastLog::new(16).unwrap());
        let publisher = Arc::clone(&log);
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(4000)).await;
            publisher.publish(type_id(), serde_json::Value::Null);
        });

        let started = Instant::now();
        let drain = log
            .wait_and_drain(0, Duration::from_millis(1000), Duration::from_millis(10_000))
            .await
            .unwrap();

        assert_eq!(sequences(&drain), vec![0]);
        assert_eq!(started.elapsed(), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_drain_already_available() {
        let log = BroadcastLog::new(16).unwrap();
        publish_n(&log, 3);

        let started = Instant::now();
        let drain = log
            .wait_and_drain(1, Duration::from_millis(500), Duration::from_millis(10_000))
            .await
            .unwrap();

        assert_eq!(sequences(&drain), vec![1, 2]);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_drain_overflow_fails_before_waiting() {
        let log = BroadcastLog::new(4).unwrap();
        publish_n(&log, 6);

        let started = Instant::now();
        let result = log
            .wait_and_drain(1, Duration::from_millis(1000), Duration::from_millis(10_000))
            .await;

        assert!(matches!(result, Err(Error::Overflow { .. })));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_wakes_all_waiting_readers() {
        let log = Arc::new(BroadcastLog::new(16).unwrap());
        let mut readers = Vec::new();
        for _ in 0..3 {
            let reader = Arc::clone(&log);
            readers.push(tokio::spawn(async move {
                reader
                    .wait_and_drain(0, Duration::from_millis(10), Duration::from_millis(10_000))
                    .await
            }));
        }

        time::sleep(Duration::from_millis(2000)).await;
        log.publish(type_id(), serde_json::Value::Null);

        for reader in readers {
            let drain = reader.await.unwrap().unwrap();
            assert_eq!(sequences(&drain), vec![0]);
        }
    }
}
