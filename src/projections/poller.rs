//! Batched global-ordered reads plus LISTEN-based wakeups.

use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::events::{Event, EventStore, NOTIFY_CHANNEL};
use crate::store::Store;

/// Reads batches of events from the global log and supports LISTEN/NOTIFY
/// for low-latency wakeups between polls.
pub struct Poller {
    events: EventStore,
    pool: PgPool,
    batch_size: i64,
}

impl Poller {
    /// Creates a poller that reads up to `batch_size` events per poll.
    pub fn new(store: &Store, batch_size: i64) -> Self {
        Self {
            events: EventStore::new(store),
            pool: store.pool().clone(),
            batch_size,
        }
    }

    /// Returns events with `global_position` greater than `after_position`,
    /// in global order.
    pub async fn poll(&self, after_position: i64) -> Result<Vec<Event>> {
        self.events.read_all(after_position, self.batch_size).await
    }

    /// Blocks until a notification arrives on the `whisker_events` channel.
    ///
    /// A dedicated connection is held for the duration of the wait and
    /// released when the future completes or is dropped. Notifications are
    /// advisory: correctness never depends on receiving one, only latency.
    pub async fn wait_for_notification(&self) -> Result<()> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| Error::db("poller: connect listener", e.into()))?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .map_err(|e| Error::db("poller: listen", e.into()))?;
        listener
            .recv()
            .await
            .map_err(|e| Error::db("poller: wait", e.into()))?;
        Ok(())
    }
}
