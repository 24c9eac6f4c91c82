//! The daemon: one worker task per subscriber, plus full rebuilds.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::projections::{CheckpointStore, ProjectionStatus, Subscriber, Worker};
use crate::schema;
use crate::store::{Backend, Store};

/// Daemon configuration. Defaults: poll every 5 seconds, 100 events per
/// batch.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    polling_interval: Duration,
    batch_size: i64,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

impl DaemonOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often each worker polls for new events.
    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Sets the maximum number of events fetched per poll cycle.
    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Runs registered subscribers in independent tasks, each with its own
/// checkpoint and advisory lock. This is the entry point for running
/// projections and side-effect handlers.
pub struct Daemon {
    store: Store,
    options: DaemonOptions,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Daemon {
    pub fn new(store: Store) -> Self {
        Self::with_options(store, DaemonOptions::default())
    }

    pub fn with_options(store: Store, options: DaemonOptions) -> Self {
        Self {
            store,
            options,
            subscribers: Vec::new(),
        }
    }

    /// Registers a subscriber. Must be called before [`run`](Daemon::run).
    pub fn add(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Spawns one worker task per subscriber and blocks until `shutdown`
    /// is cancelled and all workers have stopped.
    ///
    /// Each worker drains immediately on startup, then again on every
    /// polling tick and on every event-append notification. Worker errors
    /// are logged, never propagated.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();
        for subscriber in &self.subscribers {
            let mut worker = Worker::new(&self.store, subscriber.clone());
            worker.set_batch_size(self.options.batch_size);
            let interval = self.options.polling_interval;
            let token = shutdown.clone();
            tasks.spawn(async move {
                run_worker(worker, interval, token).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Drops and replays the read model for the named projection.
    ///
    /// The worker's advisory lock is taken for the whole rebuild; if
    /// another instance holds it the call fails with
    /// [`Error::ConcurrencyConflict`]. On completion the checkpoint status
    /// is back to `running`.
    pub async fn rebuild(&self, name: &str) -> Result<()> {
        schema::validate_collection_name(name)?;

        let subscriber = self
            .subscribers
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("daemon: subscriber {name:?}")))?;

        let mut worker = Worker::new(&self.store, subscriber);
        worker.set_batch_size(self.options.batch_size);

        if !worker.try_acquire_lock().await? {
            return Err(Error::ConcurrencyConflict(format!(
                "daemon: rebuild {name}: another instance holds the lock"
            )));
        }

        let result = self.rebuild_locked(&mut worker, name).await;
        if let Err(error) = worker.release_lock().await {
            error!(worker = %name, %error, "release lock");
        }
        result
    }

    async fn rebuild_locked(&self, worker: &mut Worker, name: &str) -> Result<()> {
        let exec = self.store.executor();
        let table = schema::collection_table(name);

        exec.execute(&format!("DROP TABLE IF EXISTS {table}"), &[])
            .await
            .map_err(|e| Error::db(format!("daemon: drop table {table}"), e))?;

        let bootstrap = self.store.bootstrap();
        bootstrap.invalidate_table(&table);
        bootstrap.ensure_collection(exec.as_ref(), name).await?;

        let checkpoints = CheckpointStore::new(&self.store);
        checkpoints.reset(name).await?;

        loop {
            let polled = worker.process_batch().await?;
            if polled == 0 {
                break;
            }
        }

        checkpoints
            .set_status(name, ProjectionStatus::Running)
            .await?;
        Ok(())
    }
}

async fn run_worker(mut worker: Worker, interval: Duration, shutdown: CancellationToken) {
    let name = worker.subscriber_name().to_owned();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately: workers catch up on
        // startup before settling into the notify/interval cadence.
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
            result = worker.wait_for_notification() => {
                if let Err(error) = result {
                    warn!(worker = %name, %error, "listen failed; falling back to interval polling");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = ticker.tick() => {}
                    }
                }
            }
        }
        drain_batches(&mut worker, &shutdown).await;
    }
}

/// Drains the log to empty under the subscriber's advisory lock. Errors
/// end the drain; the next tick retries. The lock is always released
/// before returning.
async fn drain_batches(worker: &mut Worker, shutdown: &CancellationToken) {
    let name = worker.subscriber_name().to_owned();

    match worker.try_acquire_lock().await {
        Ok(true) => {}
        Ok(false) => {
            debug!(worker = %name, "another instance holds the lock");
            return;
        }
        Err(error) => {
            error!(worker = %name, %error, "acquire lock");
            return;
        }
    }

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match worker.process_batch().await {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                error!(worker = %name, %error, "process batch");
                break;
            }
        }
    }

    if let Err(error) = worker.release_lock().await {
        error!(worker = %name, %error, "release lock");
    }
}
