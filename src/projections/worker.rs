//! The worker: drives one subscriber through poll → filter → process →
//! checkpoint, under an advisory lock.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::error;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::events::Event;
use crate::projections::{
    CheckpointStore, CollectionProcessingStore, Poller, ProjectionStatus, Subscriber,
};
use crate::store::Store;

const DEFAULT_BATCH_SIZE: i64 = 100;
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Deterministic 64-bit advisory-lock key for a subscriber name.
pub(crate) fn lock_key(name: &str) -> i64 {
    xxh3_64(name.as_bytes()) as i64
}

/// Drives a single subscriber. Workers hold no shared in-process state;
/// all cross-process coordination goes through the database.
///
/// While the advisory lock is held the worker pins one pool connection:
/// session-scoped locks belong to the connection, so returning it to the
/// pool before unlocking would hand the lock to an unrelated caller.
pub struct Worker {
    store: Store,
    subscriber: Arc<dyn Subscriber>,
    checkpoint: CheckpointStore,
    poller: Poller,
    max_retries: u32,
    consecutive_failures: u32,
    lock_conn: Option<PoolConnection<Postgres>>,
}

impl Worker {
    /// Creates a worker with the default batch size (100) and retry limit
    /// (5).
    pub fn new(store: &Store, subscriber: Arc<dyn Subscriber>) -> Self {
        Self {
            checkpoint: CheckpointStore::new(store),
            poller: Poller::new(store, DEFAULT_BATCH_SIZE),
            store: store.clone(),
            subscriber,
            max_retries: DEFAULT_MAX_RETRIES,
            consecutive_failures: 0,
            lock_conn: None,
        }
    }

    pub fn subscriber_name(&self) -> &str {
        self.subscriber.name()
    }

    /// Sets the maximum number of events fetched per poll.
    pub fn set_batch_size(&mut self, batch_size: i64) {
        self.poller = Poller::new(&self.store, batch_size);
    }

    /// Sets how many consecutive failures move the subscriber to
    /// `dead_letter`.
    pub fn set_max_retries(&mut self, max_retries: u32) {
        self.max_retries = max_retries;
    }

    /// Blocks until an event-append notification arrives.
    pub async fn wait_for_notification(&self) -> Result<()> {
        self.poller.wait_for_notification().await
    }

    /// Polls for events past the checkpoint and processes them through the
    /// subscriber. Returns the number of events polled (before filtering)
    /// so callers can keep draining until the log is exhausted.
    ///
    /// A suspended subscriber (`dead_letter` or `stopped`) does nothing.
    /// A batch whose events all fall outside the subscriber's event types
    /// still advances the checkpoint, otherwise a subscriber interested in
    /// rare types would re-scan the log forever.
    pub async fn process_batch(&mut self) -> Result<usize> {
        let name = self.subscriber.name().to_owned();

        let (position, status) = self.checkpoint.load(&name).await?;
        if status.is_suspended() {
            return Ok(0);
        }

        let events = self.poller.poll(position).await?;
        let Some(last) = events.last() else {
            return Ok(0);
        };
        let last_position = last.global_position;

        let filtered = self.filter_events(&events);
        if filtered.is_empty() {
            self.checkpoint.save(&name, last_position).await?;
            return Ok(events.len());
        }

        let processing = CollectionProcessingStore::new(&self.store, &name);
        if let Err(error) = self.subscriber.process(&filtered, &processing).await {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.max_retries {
                if let Err(status_error) = self
                    .checkpoint
                    .set_status(&name, ProjectionStatus::DeadLetter)
                    .await
                {
                    error!(worker = %name, error = %status_error, "failed to dead-letter");
                }
            }
            return Err(error);
        }

        self.consecutive_failures = 0;
        self.checkpoint.save(&name, last_position).await?;
        Ok(events.len())
    }

    /// Attempts the subscriber's advisory lock on a dedicated connection.
    ///
    /// On success the connection stays pinned inside the worker until
    /// [`release_lock`](Worker::release_lock). Returns `false` when another
    /// instance holds the lock.
    pub async fn try_acquire_lock(&mut self) -> Result<bool> {
        let name = self.subscriber.name();
        let mut conn = self
            .store
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::db(format!("worker {name}: acquire conn"), e.into()))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(lock_key(name))
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::db(format!("worker {name}: acquire lock"), e.into()))?;

        if !acquired {
            return Ok(false);
        }
        self.lock_conn = Some(conn);
        Ok(true)
    }

    /// Releases the advisory lock and returns the pinned connection to the
    /// pool. If the unlock statement fails, the connection is closed
    /// instead of returned — ending the database session releases the lock
    /// server-side and keeps it from leaking to the pool's next caller.
    pub async fn release_lock(&mut self) -> Result<()> {
        let Some(mut conn) = self.lock_conn.take() else {
            return Ok(());
        };
        let name = self.subscriber.name();

        let unlock: std::result::Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
                .bind(lock_key(name))
                .fetch_one(&mut *conn)
                .await;

        match unlock {
            Ok(_released) => Ok(()),
            Err(e) => {
                let _ = sqlx::Connection::close(conn.leak()).await;
                Err(Error::db(format!("worker {name}: release lock"), e.into()))
            }
        }
    }

    fn filter_events(&self, events: &[Event]) -> Vec<Event> {
        let types: HashSet<String> = self.subscriber.event_types().into_iter().collect();
        events
            .iter()
            .filter(|event| types.contains(&event.event_type))
            .cloned()
            .collect()
    }
}
