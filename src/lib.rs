//! # Whisker — document store and event sourcing on PostgreSQL
//!
//! Whisker layers three composed capabilities over a PostgreSQL 15+
//! database:
//!
//! - **Typed document collections** with optimistic concurrency: plain
//!   serde structs stored as JSONB in per-collection tables, with lazy
//!   schema bootstrap and declared-index creation
//! - **Append-only event streams** with per-stream version checks and a
//!   database-assigned global ordering
//! - **Asynchronous projections**: checkpointed, at-least-once dispatch of
//!   the event log into read-model collections or side-effect handlers,
//!   single-writer per subscriber via advisory locks
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ application                                                  │
//! │   Collection<T>   EventStore    Daemon ── Worker per         │
//! │        │              │                    subscriber        │
//! └────────┼──────────────┼──────────────────────┼───────────────┘
//!          ▼              ▼                      ▼
//!     Backend (Store = pool, Session = one transaction)
//!          │
//!          ▼
//!     PostgreSQL: whisker_{name} / whisker_events /
//!                 whisker_projection_checkpoints
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use whisker::{Collection, Document, EventStore, NewEvent, Store};
//!
//! #[derive(serde::Serialize, serde::Deserialize, Document)]
//! struct User {
//!     id: String,
//!     version: i64,
//!     #[document(index)]
//!     email: String,
//! }
//!
//! let store = Store::connect("postgres://localhost/app").await?;
//!
//! let users = Collection::<User>::new(&store, "users");
//! let mut user = User { id: "u1".into(), version: 0, email: "a@example.com".into() };
//! users.insert(&mut user).await?;
//!
//! let events = EventStore::new(&store);
//! events.append("user-u1", 0, &[
//!     NewEvent::new("UserRegistered", serde_json::json!({"email": "a@example.com"})),
//! ]).await?;
//! ```
//!
//! Sessions compose both worlds atomically: `store.session().await?` hands
//! back a [`Session`] satisfying the same [`Backend`] contract, and every
//! collection or event-store operation built on it joins one transaction.
//!
//! Delivery to projections is at least once; subscribers must tolerate
//! redelivery. Listen/notify wakeups are advisory only — polling alone is
//! correct, notifications just cut latency.

/// Pluggable JSON codec.
///
/// Document payloads cross the database boundary as bytes through the
/// [`Codec`] seam; the default is serde_json. The structural mapping
/// between typed documents and JSON objects lives in the derive layer and
/// is codec-independent.
pub mod codec;

/// Typed document collections.
///
/// CRUD and batch operations over a per-collection JSONB table.
///
/// Key behaviors:
/// - Lazy table and declared-index creation on first touch
/// - Optimistic concurrency for types with a version field
/// - Single-statement batch operations bounded by the store's batch limit
/// - Partial success with per-id [`BatchError`] reporting
pub mod collection;

/// ORM-compat SQL rewriting.
///
/// An optional front over the executor that maps column-style
/// INSERT/SELECT/UPDATE/DELETE/CREATE TABLE statements from foreign ORM
/// layers onto the JSONB document schema, and repacks results into the
/// column shape the caller expects. Unregistered tables pass through
/// untouched. Nothing else in the crate depends on this module.
pub mod compat;

/// The [`Document`] trait and its index/field metadata types.
///
/// Normally implemented with `#[derive(Document)]`: id and version roles
/// resolve convention-first with attribute override, JSON keys follow
/// serde, and `#[document(index)]` declares collection indexes.
pub mod document;

/// Error types for all whisker operations.
///
/// One crate-level [`Error`] enum with kind variants plus wrapped database
/// and codec causes, and the [`BatchError`] composite for batch
/// operations.
pub mod error;

/// Append-only event streams.
///
/// A single `whisker_events` table holds every stream.
///
/// Key behaviors:
/// - Optimistic appends: per-stream version checks, contiguous versions
/// - A database-assigned global position ordering events across streams
///   (monotonic in commit order, gaps allowed)
/// - Best-effort NOTIFY after each append to wake projection pollers
pub mod events;

/// Database execution seam.
///
/// The [`Executor`] trait gives collections and event stores one contract
/// over either the connection pool or an open transaction; the
/// `in_transaction` flag lets the schema bootstrap skip
/// `CREATE INDEX CONCURRENTLY` where it cannot run.
pub mod executor;

/// Asynchronous projections.
///
/// Checkpointed, at-least-once dispatch of the event log to subscribers.
///
/// Key pieces:
/// - [`Projection`]: typed read models keyed by stream id
/// - [`Handler`]: stateless side effects
/// - [`Worker`]: poll → filter → process → checkpoint under an advisory
///   lock held on a pinned connection
/// - [`Daemon`]: one worker task per subscriber, interval polling plus
///   notify wakeups, and full rebuilds
pub mod projections;

/// Fluent query builder.
///
/// Immutable-chain filters over JSONB paths with a fixed operator set,
/// ordering, pagination, and a cursor-style `after`. Field resolution is
/// the injection boundary for field names; values are always bound.
pub mod query;

/// Schema bootstrap.
///
/// Idempotent, memoized creation of collection tables, the events table,
/// the checkpoint table, and indexes — consulted lazily on first touch
/// rather than through a migration step.
pub mod schema;

/// Transactional sessions.
///
/// One database transaction behind the same executor contract, spanning
/// any mixture of document and event operations; commit is atomic and
/// single-shot, rollback idempotent.
pub mod session;

/// The store: lifecycle root.
///
/// Opens the pool, wires the codec and batch-limit defaults, hands out
/// sessions, and exposes the [`Backend`] contract every other component
/// builds against.
pub mod store;

pub use codec::{Codec, JsonCodec};
pub use collection::Collection;
pub use document::{Document, FieldSpec, IndexKind, IndexSpec};
pub use error::{BatchError, Error, Result};
pub use events::{Event, EventStore, NewEvent, NOTIFY_CHANNEL};
pub use executor::{Executor, SqlValue};
pub use query::{Direction, Query};
pub use schema::{validate_collection_name, Bootstrap};
pub use session::Session;
pub use store::{Backend, Store, StoreOptions};

pub use projections::{
    CheckpointStore, Daemon, DaemonOptions, Handler, Poller, ProcessingStore, Projection,
    ProjectionStatus, Subscriber, Worker,
};

/// The derive macro for [`Document`].
pub use whisker_derive::Document;

// Re-exported for the derive macro's generated code and for callers
// building event payloads.
pub use serde_json;
