//! Schema bootstrap: lazy, idempotent DDL with an in-process memo.
//!
//! Whisker creates its tables on first touch instead of shipping a
//! migration step. Every entry point validates the collection name, checks
//! the memo, issues `CREATE ... IF NOT EXISTS`, and records the name. The
//! database-side `IF NOT EXISTS` makes concurrent racers idempotent; the
//! memo makes repeat calls free.
//!
//! Index creation uses `CREATE INDEX CONCURRENTLY`, which cannot run inside
//! a transaction block — entry points that would emit it check
//! [`Executor::in_transaction`] and skip (without memoizing) so a later
//! non-transactional call still creates the index.
//!
//! Sessions carry a private `Bootstrap` so DDL issued inside an uncommitted
//! transaction cannot mark tables as created for other callers.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::document::{IndexKind, IndexSpec};
use crate::error::{Error, Result};
use crate::executor::Executor;

/// Maximum collection name length (one leading letter plus up to 54 more
/// characters).
const MAX_NAME_LEN: usize = 55;

/// Validates a collection name against `^[A-Za-z][A-Za-z0-9_]{0,54}$`.
///
/// This is the only defense against SQL injection for the collection
/// namespace: names are interpolated into DDL and table references, so
/// every call site that does must validate first.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = match name.as_bytes() {
        [] => false,
        [first, rest @ ..] => {
            name.len() <= MAX_NAME_LEN
                && first.is_ascii_alphabetic()
                && rest
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
        }
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "schema: invalid collection name {name:?}: must start with a letter and contain only letters, digits, and underscores (max {MAX_NAME_LEN} chars)"
        )))
    }
}

/// Table name for a collection.
pub(crate) fn collection_table(name: &str) -> String {
    format!("whisker_{name}")
}

pub(crate) fn collection_ddl(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS whisker_{name} (
    id TEXT PRIMARY KEY,
    data JSONB NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"
    )
}

pub(crate) const EVENTS_TABLE: &str = "whisker_events";

pub(crate) const EVENTS_DDL: &str = "CREATE TABLE IF NOT EXISTS whisker_events (
    stream_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    type TEXT NOT NULL,
    data JSONB NOT NULL,
    metadata JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    global_position BIGINT GENERATED ALWAYS AS IDENTITY,
    PRIMARY KEY (stream_id, version)
)";

pub(crate) const CHECKPOINTS_TABLE: &str = "whisker_projection_checkpoints";

pub(crate) const CHECKPOINTS_DDL: &str =
    "CREATE TABLE IF NOT EXISTS whisker_projection_checkpoints (
    projection_name TEXT PRIMARY KEY,
    last_position BIGINT NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'running',
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

pub(crate) const EVENTS_GLOBAL_POSITION_INDEX: &str = "idx_whisker_events_global_position";

pub(crate) const EVENTS_GLOBAL_POSITION_INDEX_DDL: &str =
    "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_whisker_events_global_position \
     ON whisker_events (global_position)";

/// Name of a declared index: `idx_whisker_{collection}_{field}` for btree,
/// `idx_whisker_{collection}_data_gin` for GIN.
pub(crate) fn index_name(collection: &str, index: &IndexSpec) -> String {
    match index.kind {
        IndexKind::Btree => format!("idx_whisker_{collection}_{}", index.json_key),
        IndexKind::Gin => format!("idx_whisker_{collection}_data_gin"),
    }
}

pub(crate) fn index_ddl(collection: &str, index: &IndexSpec) -> String {
    match index.kind {
        IndexKind::Btree => format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_whisker_{collection}_{key} \
             ON whisker_{collection} ((data->>'{key}'))",
            key = index.json_key,
        ),
        IndexKind::Gin => format!(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_whisker_{collection}_data_gin \
             ON whisker_{collection} USING GIN (data)"
        ),
    }
}

/// In-process memo of created tables and indexes.
///
/// The store holds one shared instance; each session gets a fresh private
/// one. The memo is never updated when DDL fails.
#[derive(Debug, Default)]
pub struct Bootstrap {
    tables: Mutex<HashSet<String>>,
    indexes: Mutex<HashSet<String>>,
}

impl Bootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    fn table_created(&self, table: &str) -> bool {
        self.tables.lock().expect("bootstrap memo poisoned").contains(table)
    }

    fn mark_table_created(&self, table: &str) {
        self.tables
            .lock()
            .expect("bootstrap memo poisoned")
            .insert(table.to_owned());
    }

    /// Removes a table from the memo so the next ensure recreates it.
    /// Used by projection rebuilds after `DROP TABLE`.
    pub fn invalidate_table(&self, table: &str) {
        self.tables.lock().expect("bootstrap memo poisoned").remove(table);
    }

    pub fn is_index_created(&self, name: &str) -> bool {
        self.indexes.lock().expect("bootstrap memo poisoned").contains(name)
    }

    pub fn mark_index_created(&self, name: &str) {
        self.indexes
            .lock()
            .expect("bootstrap memo poisoned")
            .insert(name.to_owned());
    }

    /// Ensures the table backing the named collection exists.
    pub async fn ensure_collection(&self, exec: &dyn Executor, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let table = collection_table(name);
        if self.table_created(&table) {
            return Ok(());
        }
        exec.execute(&collection_ddl(name), &[])
            .await
            .map_err(|e| Error::db(format!("schema: create table {table}"), e))?;
        self.mark_table_created(&table);
        Ok(())
    }

    /// Ensures the `whisker_events` table exists.
    pub async fn ensure_events(&self, exec: &dyn Executor) -> Result<()> {
        if self.table_created(EVENTS_TABLE) {
            return Ok(());
        }
        exec.execute(EVENTS_DDL, &[])
            .await
            .map_err(|e| Error::db("schema: create events table", e))?;
        self.mark_table_created(EVENTS_TABLE);
        Ok(())
    }

    /// Ensures the projection checkpoint table exists.
    pub async fn ensure_checkpoints(&self, exec: &dyn Executor) -> Result<()> {
        if self.table_created(CHECKPOINTS_TABLE) {
            return Ok(());
        }
        exec.execute(CHECKPOINTS_DDL, &[])
            .await
            .map_err(|e| Error::db("schema: create checkpoints table", e))?;
        self.mark_table_created(CHECKPOINTS_TABLE);
        Ok(())
    }

    /// Ensures the global-position index on `whisker_events`. Skipped
    /// (without memoizing) inside a transaction, where `CONCURRENTLY` is
    /// not allowed.
    pub async fn ensure_events_global_position_index(&self, exec: &dyn Executor) -> Result<()> {
        if exec.in_transaction() || self.is_index_created(EVENTS_GLOBAL_POSITION_INDEX) {
            return Ok(());
        }
        exec.execute(EVENTS_GLOBAL_POSITION_INDEX_DDL, &[])
            .await
            .map_err(|e| Error::db("schema: create events global position index", e))?;
        self.mark_index_created(EVENTS_GLOBAL_POSITION_INDEX);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        for name in ["users", "OrderSummaries", "a", "x9", "snake_case_name"] {
            assert!(validate_collection_name(name).is_ok(), "{name}");
        }
        let max = format!("a{}", "b".repeat(54));
        assert!(validate_collection_name(&max).is_ok());
    }

    #[test]
    fn rejects_invalid_names() {
        for name in ["", "9users", "_users", "users;drop", "a b", "café"] {
            let err = validate_collection_name(name).unwrap_err();
            assert!(
                matches!(err, Error::InvalidArgument(_)),
                "{name}: {err:?}"
            );
        }
        let too_long = format!("a{}", "b".repeat(55));
        assert!(validate_collection_name(&too_long).is_err());
    }

    #[test]
    fn collection_ddl_shape() {
        let ddl = collection_ddl("users");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS whisker_users"));
        assert!(ddl.contains("id TEXT PRIMARY KEY"));
        assert!(ddl.contains("data JSONB NOT NULL"));
        assert!(ddl.contains("version INTEGER NOT NULL DEFAULT 1"));
    }

    #[test]
    fn events_ddl_shape() {
        assert!(EVENTS_DDL.contains("global_position BIGINT GENERATED ALWAYS AS IDENTITY"));
        assert!(EVENTS_DDL.contains("PRIMARY KEY (stream_id, version)"));
        assert!(EVENTS_DDL.contains("metadata JSONB,"));
    }

    #[test]
    fn index_names_and_ddl() {
        let btree = IndexSpec {
            kind: IndexKind::Btree,
            json_key: "status",
        };
        let gin = IndexSpec {
            kind: IndexKind::Gin,
            json_key: "",
        };
        assert_eq!(index_name("orders", &btree), "idx_whisker_orders_status");
        assert_eq!(index_name("orders", &gin), "idx_whisker_orders_data_gin");
        assert!(index_ddl("orders", &btree).contains("((data->>'status'))"));
        assert!(index_ddl("orders", &gin).contains("USING GIN (data)"));
        assert!(index_ddl("orders", &btree).starts_with("CREATE INDEX CONCURRENTLY IF NOT EXISTS"));
    }

    #[test]
    fn memo_tracks_tables_and_indexes() {
        let bootstrap = Bootstrap::new();
        assert!(!bootstrap.table_created("whisker_users"));
        bootstrap.mark_table_created("whisker_users");
        assert!(bootstrap.table_created("whisker_users"));
        bootstrap.invalidate_table("whisker_users");
        assert!(!bootstrap.table_created("whisker_users"));

        assert!(!bootstrap.is_index_created("idx_whisker_users_email"));
        bootstrap.mark_index_created("idx_whisker_users_email");
        assert!(bootstrap.is_index_created("idx_whisker_users_email"));
    }
}
