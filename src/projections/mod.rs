//! Asynchronous projections: checkpointed, at-least-once event dispatch.
//!
//! A subscriber is either a [`Projection`] (stateful read model keyed by
//! stream id) or a [`Handler`] (stateless side effects). The [`Daemon`]
//! runs one [`Worker`] task per subscriber; each worker polls the global
//! event log past its checkpoint, filters by the subscriber's declared
//! event types, dispatches, and advances the checkpoint — all while holding
//! a PostgreSQL advisory lock so at most one worker per subscriber is
//! active across the whole fleet.
//!
//! Delivery is at least once: a crash between processing and checkpoint
//! advance replays the batch on restart. Subscribers must tolerate
//! redelivery.

mod checkpoint;
mod daemon;
mod handler;
mod poller;
mod projection;
mod store;
mod worker;

pub use checkpoint::{CheckpointStore, ProjectionStatus};
pub use daemon::{Daemon, DaemonOptions};
pub use handler::Handler;
pub use poller::Poller;
pub use projection::Projection;
pub use store::CollectionProcessingStore;
pub use worker::Worker;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::Event;

/// Implemented by both read-model projections and side-effect handlers.
/// The daemon dispatches events to each subscriber independently.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Identifier used for checkpointing, advisory locking, and (for
    /// projections) the read-model table name.
    fn name(&self) -> &str;

    /// Event types this subscriber wants. Events of other types still
    /// advance the checkpoint without being dispatched.
    fn event_types(&self) -> Vec<String>;

    /// Processes one filtered batch. An error aborts the batch without
    /// advancing the checkpoint; the whole batch is redelivered later.
    async fn process(&self, events: &[Event], store: &dyn ProcessingStore) -> Result<()>;
}

/// Read-model persistence as seen by a subscriber. The default
/// implementation maps onto a document collection keyed by stream id;
/// side-effect handlers ignore it.
#[async_trait]
pub trait ProcessingStore: Send + Sync {
    /// Returns the stored state and its version, or `None` when the stream
    /// has no read model yet.
    async fn load_state(&self, id: &str) -> Result<Option<(Vec<u8>, i32)>>;

    /// Inserts or replaces the state. The stored version becomes
    /// `version + 1` on every upsert, independent of event versions.
    async fn upsert_state(&self, id: &str, data: &[u8], version: i32) -> Result<()>;

    /// Removes the read model for a stream.
    async fn delete_state(&self, id: &str) -> Result<()>;
}
