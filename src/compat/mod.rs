//! ORM-compat layer: a SQL-rewriting front over the executor.
//!
//! Foreign ORM layers emit column-style SQL against plain tables. This
//! module intercepts those statements for registered models and maps them
//! onto whisker's JSONB document schema: inserts pack data columns into
//! `jsonb_build_object`, selects come back as `(id, data, version)` and are
//! repacked into the column shape the caller expects, updates rebuild the
//! payload and bump the version, and `CREATE TABLE` collapses to the
//! standard document DDL. Statements touching unregistered tables pass
//! through byte-for-byte.
//!
//! The layer is independent of the rest of the crate: nothing else depends
//! on it, and applications that never bridge an ORM can ignore it.

mod matcher;
mod registry;
mod rewrite;
mod rows;

pub use registry::{ColumnSpec, ModelInfo};
pub use rows::CompatRow;

use std::sync::Arc;

use serde_json::Value;
use sqlx::Row;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::executor::{Executor, SqlValue};
use crate::schema::Bootstrap;
use crate::store::Backend;

use matcher::{parse_sql, SqlOp};
use registry::Registry;

/// A query front that rewrites ORM SQL for registered models and executes
/// it against a whisker backend.
pub struct CompatPool {
    exec: Arc<dyn Executor>,
    bootstrap: Arc<Bootstrap>,
    registry: Registry,
}

impl CompatPool {
    pub fn new(backend: &dyn Backend) -> Self {
        Self {
            exec: backend.executor(),
            bootstrap: backend.bootstrap(),
            registry: Registry::default(),
        }
    }

    /// Teaches the pool about a model so its SQL can be intercepted. The
    /// name is the table name the ORM emits; the document lands in
    /// `whisker_{name}`.
    pub fn register<T: Document>(&mut self, name: &str) {
        self.registry.register(ModelInfo::of::<T>(name));
    }

    /// Rewrites one statement. Unregistered tables and unrecognized
    /// statements come back unchanged.
    pub fn rewrite(&self, sql: &str, params: Vec<SqlValue>) -> Result<(String, Vec<SqlValue>)> {
        if self.registry.is_empty() {
            return Ok((sql.to_owned(), params));
        }
        let Some((table, op)) = parse_sql(sql) else {
            return Ok((sql.to_owned(), params));
        };

        if op == SqlOp::SelectJoin {
            return rewrite::rewrite_join(&self.registry, sql, params);
        }

        let Some(info) = self.registry.lookup_table(&table) else {
            return Ok((sql.to_owned(), params));
        };
        match op {
            SqlOp::Insert => rewrite::rewrite_insert(&info, sql, params),
            SqlOp::Select => rewrite::rewrite_select(&info, sql, params),
            SqlOp::Update => rewrite::rewrite_update(&info, sql, params),
            SqlOp::Delete => rewrite::rewrite_delete(&info, sql, params),
            SqlOp::CreateTable => Ok((rewrite::rewrite_create_table(&info), params)),
            SqlOp::SelectJoin => unreachable!("handled above"),
        }
    }

    /// Rewrites and executes a statement, returning the rows affected.
    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        self.ensure_for(sql).await?;
        let (sql, params) = self.rewrite(sql, params)?;
        self.exec
            .execute(&sql, &params)
            .await
            .map_err(|e| Error::db("compat: execute", e))
    }

    /// Rewrites and runs a SELECT on a registered model, repacking each
    /// result row into the column shape the ORM expects.
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<CompatRow>> {
        let info = match parse_sql(sql) {
            Some((table, SqlOp::Select)) => self.registry.lookup_table(&table),
            _ => None,
        };
        let Some(info) = info else {
            return Err(Error::InvalidArgument(
                "compat: query requires a SELECT on a registered model".into(),
            ));
        };

        self.bootstrap
            .ensure_collection(self.exec.as_ref(), &info.name)
            .await?;
        let (sql, params) = rewrite::rewrite_select(&info, sql, params)?;
        let rows = self
            .exec
            .fetch_all(&sql, &params)
            .await
            .map_err(|e| Error::db("compat: query", e))?;

        let mut unpacked = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row
                .try_get("id")
                .map_err(|e| Error::db("compat: scan", e.into()))?;
            let data: Value = row
                .try_get("data")
                .map_err(|e| Error::db("compat: scan", e.into()))?;
            let version: i32 = row
                .try_get("version")
                .map_err(|e| Error::db("compat: scan", e.into()))?;
            unpacked.push(rows::unpack_row(&info, &id, &data, version));
        }
        Ok(unpacked)
    }

    /// Creates the backing table for a statement's model before running it,
    /// mirroring the lazy bootstrap of native collections.
    async fn ensure_for(&self, sql: &str) -> Result<()> {
        let Some((table, _)) = parse_sql(sql) else {
            return Ok(());
        };
        let Some(info) = self.registry.lookup_table(&table) else {
            return Ok(());
        };
        self.bootstrap
            .ensure_collection(self.exec.as_ref(), &info.name)
            .await
    }
}
