//! Database execution seam.
//!
//! Every subsystem talks to PostgreSQL through the [`Executor`] trait:
//! `execute` for statements, `fetch_all`/`fetch_optional` for queries, and
//! `in_transaction` so the schema bootstrap can tell whether
//! `CREATE INDEX CONCURRENTLY` is usable (it cannot run inside a
//! transaction block). The pool and the session's transaction wrapper both
//! implement it, so collections and event stores work identically against
//! either.
//!
//! Statements are built dynamically, so bind parameters travel as
//! [`SqlValue`]s and are bound positionally to `$n` placeholders.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::Postgres;
use thiserror::Error;

/// A bind parameter for a dynamically built statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int4(i32),
    Int8(i64),
    Bool(bool),
    Float8(f64),
    Json(serde_json::Value),
    /// A nullable JSONB value (event metadata).
    OptionalJson(Option<serde_json::Value>),
    /// A `text[]` bind, used with `= ANY($n)` and `unnest` statements.
    TextArray(Vec<String>),
    /// An `integer[]` bind for batched version predicates.
    Int4Array(Vec<i32>),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int4(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int8(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float8(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl From<Option<serde_json::Value>> for SqlValue {
    fn from(v: Option<serde_json::Value>) -> Self {
        SqlValue::OptionalJson(v)
    }
}

impl From<Vec<String>> for SqlValue {
    fn from(v: Vec<String>) -> Self {
        SqlValue::TextArray(v)
    }
}

impl From<Vec<i32>> for SqlValue {
    fn from(v: Vec<i32>) -> Self {
        SqlValue::Int4Array(v)
    }
}

/// Binds a parameter list to a query in positional order.
pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Int4(v) => query.bind(*v),
            SqlValue::Int8(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Float8(v) => query.bind(*v),
            SqlValue::Json(v) => query.bind(v.clone()),
            SqlValue::OptionalJson(v) => query.bind(v.clone()),
            SqlValue::TextArray(v) => query.bind(v.clone()),
            SqlValue::Int4Array(v) => query.bind(v.clone()),
        };
    }
    query
}

/// A failure at the executor layer.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The session owning this executor was already committed or rolled
    /// back.
    #[error("session already closed")]
    Closed,

    /// The database reported an error.
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl ExecError {
    /// True when the underlying database error is a unique-constraint
    /// violation (SQLSTATE 23505).
    pub(crate) fn is_unique_violation(&self) -> bool {
        match self {
            ExecError::Db(sqlx::Error::Database(db)) => db.code().as_deref() == Some("23505"),
            ExecError::Db(_) | ExecError::Closed => false,
        }
    }
}

/// Uniform statement execution over either the connection pool or an open
/// transaction.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs a statement and returns the number of rows affected.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecError>;

    /// Runs a query and returns all rows.
    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<PgRow>, ExecError>;

    /// Runs a query expected to return at most one row.
    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<PgRow>, ExecError>;

    /// True when statements run inside an open transaction.
    fn in_transaction(&self) -> bool;
}

#[async_trait]
impl Executor for PgPool {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecError> {
        let result = bind_params(sqlx::query(sql), params).execute(self).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<PgRow>, ExecError> {
        Ok(bind_params(sqlx::query(sql), params).fetch_all(self).await?)
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<PgRow>, ExecError> {
        Ok(bind_params(sqlx::query(sql), params)
            .fetch_optional(self)
            .await?)
    }

    fn in_transaction(&self) -> bool {
        false
    }
}
