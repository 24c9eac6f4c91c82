//! Append-only event streams over a single `whisker_events` table.
//!
//! Events belong to a stream (`stream_id`) and carry a per-stream version
//! assigned contiguously from 1. The database assigns `global_position`
//! from an identity column, giving a total order across streams that is
//! monotonic in commit order. Rolled-back appends burn identity values, so
//! readers must treat positions as an ordering cursor with gaps, never a
//! count.
//!
//! Appends are optimistic: the expected stream version is checked up front
//! and the `(stream_id, version)` primary key backstops the race window
//! between check and insert, so a lost race always surfaces as a conflict.
//! After a successful append a best-effort `NOTIFY` nudges projection
//! pollers; a failed notify is swallowed because polling alone is correct.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;

use crate::error::{Error, Result};
use crate::executor::{Executor, SqlValue};
use crate::schema::Bootstrap;
use crate::store::Backend;

/// The LISTEN/NOTIFY channel signalled after each append. The payload is
/// empty: the channel means "poll again", not event identity.
pub const NOTIFY_CHANNEL: &str = "whisker_events";

/// A stored event read back from the log.
#[derive(Debug, Clone)]
pub struct Event {
    pub stream_id: String,
    /// Position within the stream, contiguous from 1.
    pub version: i32,
    /// Application-defined type tag, used by projections for filtering.
    pub event_type: String,
    pub data: Value,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    /// Database-assigned position in the global log. Strictly increasing
    /// in commit order; may have gaps.
    pub global_position: i64,
}

/// An event to append. Version and global position are assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub data: Value,
    pub metadata: Option<Value>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append / read-stream / read-all over the event log.
pub struct EventStore {
    exec: Arc<dyn Executor>,
    bootstrap: Arc<Bootstrap>,
}

impl EventStore {
    /// Creates an event store view against the given backend.
    pub fn new(backend: &dyn Backend) -> Self {
        Self {
            exec: backend.executor(),
            bootstrap: backend.bootstrap(),
        }
    }

    /// Appends events to a stream with optimistic concurrency control.
    ///
    /// Pass `expected_version` 0 to create a new stream; appending to an
    /// existing stream with 0 fails [`Error::StreamExists`]. A non-zero
    /// `expected_version` must match the stream head or the append fails
    /// [`Error::ConcurrencyConflict`]. Versions `expected_version + 1 ..`
    /// are assigned to the events in order, in one statement.
    pub async fn append(
        &self,
        stream_id: &str,
        expected_version: i32,
        events: &[NewEvent],
    ) -> Result<()> {
        if events.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "events: append {stream_id}: at least one event required"
            )));
        }

        self.bootstrap.ensure_events(self.exec.as_ref()).await?;

        let context = format!("events: append {stream_id}");

        if expected_version > 0 {
            let row = self
                .exec
                .fetch_optional(
                    "SELECT COALESCE(MAX(version), 0) FROM whisker_events WHERE stream_id = $1",
                    &[SqlValue::Text(stream_id.to_owned())],
                )
                .await
                .map_err(|e| Error::db(format!("{context}: check version"), e))?;
            let current: i32 = match row {
                Some(row) => row
                    .try_get(0)
                    .map_err(|e| Error::db(format!("{context}: check version"), e.into()))?,
                None => 0,
            };
            if current != expected_version {
                return Err(Error::ConcurrencyConflict(format!(
                    "{context}: expected version {expected_version} but got {current}"
                )));
            }
        }

        let (sql, params) = build_append_sql(stream_id, expected_version, events);
        let result = self.exec.execute(&sql, &params).await;
        if let Err(e) = result {
            if e.is_unique_violation() {
                return Err(if expected_version == 0 {
                    Error::StreamExists {
                        stream_id: stream_id.to_owned(),
                    }
                } else {
                    Error::ConcurrencyConflict(context)
                });
            }
            return Err(Error::db(context, e));
        }

        // Best-effort wakeup for projection pollers; polling covers misses.
        let _ = self
            .exec
            .execute("SELECT pg_notify('whisker_events', '')", &[])
            .await;

        Ok(())
    }

    /// Returns all events of a stream in version order. `from_version > 0`
    /// skips earlier versions. A missing stream yields an empty vector.
    pub async fn read_stream(&self, stream_id: &str, from_version: i32) -> Result<Vec<Event>> {
        self.bootstrap.ensure_events(self.exec.as_ref()).await?;

        let context = format!("events: read {stream_id}");
        let mut sql = String::from(
            "SELECT stream_id, version, type, data, metadata, created_at, global_position \
             FROM whisker_events WHERE stream_id = $1",
        );
        let mut params = vec![SqlValue::Text(stream_id.to_owned())];
        if from_version > 0 {
            params.push(SqlValue::Int4(from_version));
            sql.push_str(" AND version >= $2");
        }
        sql.push_str(" ORDER BY version ASC");

        let rows = self
            .exec
            .fetch_all(&sql, &params)
            .await
            .map_err(|e| Error::db(context.clone(), e))?;
        rows.iter().map(|row| scan_event(row, &context)).collect()
    }

    /// Returns up to `limit` events across all streams with
    /// `global_position > after_position`, in global order. Lazily ensures
    /// the global-position index.
    pub async fn read_all(&self, after_position: i64, limit: i64) -> Result<Vec<Event>> {
        self.bootstrap.ensure_events(self.exec.as_ref()).await?;
        self.bootstrap
            .ensure_events_global_position_index(self.exec.as_ref())
            .await?;

        let context = "events: read all".to_owned();
        let sql = "SELECT stream_id, version, type, data, metadata, created_at, global_position \
                   FROM whisker_events WHERE global_position > $1 \
                   ORDER BY global_position ASC LIMIT $2";
        let rows = self
            .exec
            .fetch_all(sql, &[SqlValue::Int8(after_position), SqlValue::Int8(limit)])
            .await
            .map_err(|e| Error::db(context.clone(), e))?;
        rows.iter().map(|row| scan_event(row, &context)).collect()
    }
}

fn scan_event(row: &sqlx::postgres::PgRow, context: &str) -> Result<Event> {
    let scan = |e: sqlx::Error| Error::db(format!("{context}: scan"), e.into());
    Ok(Event {
        stream_id: row.try_get(0).map_err(scan)?,
        version: row.try_get(1).map_err(scan)?,
        event_type: row.try_get(2).map_err(scan)?,
        data: row.try_get(3).map_err(scan)?,
        metadata: row.try_get(4).map_err(scan)?,
        created_at: row.try_get(5).map_err(scan)?,
        global_position: row.try_get(6).map_err(scan)?,
    })
}

/// Builds the multi-row insert assigning contiguous versions after
/// `expected_version`.
fn build_append_sql(
    stream_id: &str,
    expected_version: i32,
    events: &[NewEvent],
) -> (String, Vec<SqlValue>) {
    let mut sql =
        String::from("INSERT INTO whisker_events (stream_id, version, type, data, metadata) VALUES ");
    let mut params = Vec::with_capacity(events.len() * 5);
    for (i, event) in events.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let base = params.len();
        sql.push_str(&format!(
            "(${}, ${}, ${}, ${}, ${})",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5
        ));
        params.push(SqlValue::Text(stream_id.to_owned()));
        params.push(SqlValue::Int4(expected_version + i as i32 + 1));
        params.push(SqlValue::Text(event.event_type.clone()));
        params.push(SqlValue::Json(event.data.clone()));
        params.push(SqlValue::OptionalJson(event.metadata.clone()));
    }
    (sql, params)
}
