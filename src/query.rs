//! Fluent query builder over a document collection.
//!
//! Queries chain immutably: every builder method consumes the builder and
//! returns the extended one, and `Clone` forks an in-progress chain.
//! Field names resolve to JSONB paths with a strict allow-list — reserved
//! columns pass through, a raw `->` expression is trusted verbatim (caller
//! opt-in), and anything else must be a plain identifier, which becomes
//! `data->>'field'`. This resolution is the injection boundary for field
//! names; values are always bound as parameters.

use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::Row;

use crate::codec::Codec;
use crate::collection::ensure_collection;
use crate::document::{Document, IndexSpec};
use crate::error::{Error, Result};
use crate::executor::{Executor, SqlValue};
use crate::schema::Bootstrap;

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Comparison operators accepted by [`Query::filter`].
const ALLOWED_OPS: &[&str] = &["=", "!=", ">", "<", ">=", "<="];

/// Columns that may be referenced directly instead of through the JSONB
/// payload.
const RESERVED_COLUMNS: &[&str] = &["id", "version", "created_at", "updated_at"];

fn resolve_field(field: &str) -> Result<String> {
    if field.is_empty() {
        return Err(Error::InvalidArgument("query: empty field name".into()));
    }
    if RESERVED_COLUMNS.contains(&field) {
        return Ok(field.to_owned());
    }
    if field.contains("->") {
        return Ok(field.to_owned());
    }
    if field
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Ok(format!("data->>'{field}'"));
    }
    Err(Error::InvalidArgument(format!(
        "query: invalid field name {field:?}"
    )))
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    op: String,
    value: SqlValue,
}

#[derive(Debug, Clone)]
struct OrderBy {
    field: String,
    direction: Direction,
}

/// The backend-independent part of a query: everything needed to render
/// SQL. Split out so rendering is testable without a database.
#[derive(Debug, Clone, Default)]
struct QueryParts {
    table: String,
    conditions: Vec<Condition>,
    order_bys: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    after: Option<SqlValue>,
}

impl QueryParts {
    /// Renders the WHERE clause (conditions plus, for selects, the `after`
    /// cursor) into `sql`, appending bind values to `params`.
    fn render_where(
        &self,
        sql: &mut String,
        params: &mut Vec<SqlValue>,
        include_after: bool,
    ) -> Result<()> {
        let mut first = true;
        let mut push_clause = |sql: &mut String| {
            if first {
                sql.push_str(" WHERE ");
                first = false;
            } else {
                sql.push_str(" AND ");
            }
        };

        for condition in &self.conditions {
            if !ALLOWED_OPS.contains(&condition.op.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "query: unsupported operator {:?}",
                    condition.op
                )));
            }
            let field = resolve_field(&condition.field)?;
            push_clause(sql);
            params.push(condition.value.clone());
            sql.push_str(&format!("{field} {} ${}", condition.op, params.len()));
        }

        if !include_after {
            return Ok(());
        }
        if let Some(after) = &self.after {
            let order = self.order_bys.first().ok_or_else(|| {
                Error::InvalidArgument(
                    "query: after requires at least one order_by clause".into(),
                )
            })?;
            let field = resolve_field(&order.field)?;
            let op = match order.direction {
                Direction::Asc => ">",
                Direction::Desc => "<",
            };
            push_clause(sql);
            params.push(after.clone());
            sql.push_str(&format!("{field} {op} ${}", params.len()));
        }

        Ok(())
    }

    fn render_order_limit(&self, sql: &mut String) -> Result<()> {
        if !self.order_bys.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, order) in self.order_bys.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                let field = resolve_field(&order.field)?;
                sql.push_str(&format!("{field} {}", order.direction.as_sql()));
            }
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(())
    }

    fn select_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = format!("SELECT id, data::text, version FROM {}", self.table);
        let mut params = Vec::new();
        self.render_where(&mut sql, &mut params, true)?;
        self.render_order_limit(&mut sql)?;
        Ok((sql, params))
    }

    /// COUNT rewrites the select list and drops ordering, pagination, and
    /// the `after` cursor.
    fn count_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let mut params = Vec::new();
        self.render_where(&mut sql, &mut params, false)?;
        Ok((sql, params))
    }

    fn exists_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        let mut inner = format!("SELECT 1 FROM {}", self.table);
        let mut params = Vec::new();
        self.render_where(&mut inner, &mut params, false)?;
        Ok((format!("SELECT EXISTS({inner})"), params))
    }
}

/// A filtered, sorted, paginated query against one collection.
pub struct Query<T: Document> {
    name: String,
    exec: Arc<dyn Executor>,
    codec: Arc<dyn Codec>,
    bootstrap: Arc<Bootstrap>,
    indexes: &'static [IndexSpec],
    parts: QueryParts,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            exec: self.exec.clone(),
            codec: self.codec.clone(),
            bootstrap: self.bootstrap.clone(),
            indexes: self.indexes,
            parts: self.parts.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Query<T> {
    pub(crate) fn new(
        name: String,
        table: String,
        exec: Arc<dyn Executor>,
        codec: Arc<dyn Codec>,
        bootstrap: Arc<Bootstrap>,
    ) -> Self {
        Self {
            name,
            exec,
            codec,
            bootstrap,
            indexes: T::INDEXES,
            parts: QueryParts {
                table,
                ..QueryParts::default()
            },
            _marker: PhantomData,
        }
    }

    /// Adds a filter condition. Supported operators: `=`, `!=`, `>`, `<`,
    /// `>=`, `<=`. Field names resolve to JSONB paths automatically.
    pub fn filter(
        mut self,
        field: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.parts.conditions.push(Condition {
            field: field.into(),
            op: op.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a sort clause. Repeated calls add secondary sort keys.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.parts.order_bys.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Caps the number of results. `limit(0)` is a no-op.
    pub fn limit(mut self, n: u64) -> Self {
        if n > 0 {
            self.parts.limit = Some(n);
        }
        self
    }

    /// Skips the first `n` results.
    pub fn offset(mut self, n: u64) -> Self {
        self.parts.offset = Some(n);
        self
    }

    /// Cursor pagination: returns documents strictly after `value` in the
    /// first `order_by` field. Fails `InvalidArgument` at execution when no
    /// `order_by` was set.
    pub fn after(mut self, value: impl Into<SqlValue>) -> Self {
        self.parts.after = Some(value.into());
        self
    }

    async fn ensure(&self) -> Result<()> {
        ensure_collection(
            &self.bootstrap,
            self.exec.as_ref(),
            &self.name,
            self.indexes,
        )
        .await
    }

    /// Runs the query and returns matching documents.
    pub async fn execute(&self) -> Result<Vec<T>> {
        self.ensure().await?;
        let (sql, params) = self.parts.select_sql()?;
        let rows = self
            .exec
            .fetch_all(&sql, &params)
            .await
            .map_err(|e| Error::db(format!("collection {}: query", self.name), e))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, data, version): (String, String, i32) = (
                row.try_get(0).map_err(|e| self.scan_err(e))?,
                row.try_get(1).map_err(|e| self.scan_err(e))?,
                row.try_get(2).map_err(|e| self.scan_err(e))?,
            );
            let value = self
                .codec
                .unmarshal(data.as_bytes())
                .map_err(|e| Error::codec(format!("collection {}: query {id}", self.name), e))?;
            let doc = T::from_data(value, &id, version as i64).map_err(|e| {
                Error::codec(format!("collection {}: query {id}", self.name), Box::new(e))
            })?;
            results.push(doc);
        }
        Ok(results)
    }

    /// Returns the number of documents matching the conditions.
    pub async fn count(&self) -> Result<i64> {
        self.ensure().await?;
        let (sql, params) = self.parts.count_sql()?;
        let row = self
            .exec
            .fetch_optional(&sql, &params)
            .await
            .map_err(|e| Error::db(format!("collection {}: count", self.name), e))?
            .ok_or_else(|| Error::NotFound(format!("collection {}: count", self.name)))?;
        row.try_get(0).map_err(|e| self.scan_err(e))
    }

    /// True when at least one document matches the conditions.
    pub async fn exists(&self) -> Result<bool> {
        self.ensure().await?;
        let (sql, params) = self.parts.exists_sql()?;
        let row = self
            .exec
            .fetch_optional(&sql, &params)
            .await
            .map_err(|e| Error::db(format!("collection {}: exists", self.name), e))?
            .ok_or_else(|| Error::NotFound(format!("collection {}: exists", self.name)))?;
        row.try_get(0).map_err(|e| self.scan_err(e))
    }

    fn scan_err(&self, e: sqlx::Error) -> Error {
        Error::db(format!("collection {}: scan", self.name), e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(table: &str) -> QueryParts {
        QueryParts {
            table: table.to_owned(),
            ..QueryParts::default()
        }
    }

    #[test]
    fn resolves_reserved_columns_verbatim() {
        for column in ["id", "version", "created_at", "updated_at"] {
            assert_eq!(resolve_field(column).unwrap(), column);
        }
    }

    #[test]
    fn resolves_identifiers_to_jsonb_paths() {
        assert_eq!(resolve_field("name").unwrap(), "data->>'name'");
        assert_eq!(resolve_field("http_status").unwrap(), "data->>'http_status'");
    }

    #[test]
    fn passes_raw_json_paths_through() {
        assert_eq!(
            resolve_field("data->'address'->>'city'").unwrap(),
            "data->'address'->>'city'"
        );
    }

    #[test]
    fn rejects_bad_fields() {
        assert!(resolve_field("").is_err());
        assert!(resolve_field("name; DROP TABLE x").is_err());
        assert!(resolve_field("a b").is_err());
        assert!(resolve_field("name'").is_err());
    }

    #[test]
    fn select_with_conditions_and_order() {
        let mut p = parts("whisker_users");
        p.conditions.push(Condition {
            field: "name".into(),
            op: "=".into(),
            value: SqlValue::Text("Alice".into()),
        });
        p.conditions.push(Condition {
            field: "version".into(),
            op: ">=".into(),
            value: SqlValue::Int4(2),
        });
        p.order_bys.push(OrderBy {
            field: "created_at".into(),
            direction: Direction::Desc,
        });
        p.limit = Some(10);
        p.offset = Some(5);

        let (sql, params) = p.select_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT id, data::text, version FROM whisker_users \
             WHERE data->>'name' = $1 AND version >= $2 \
             ORDER BY created_at DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn after_composes_with_conditions() {
        let mut p = parts("whisker_users");
        p.conditions.push(Condition {
            field: "status".into(),
            op: "=".into(),
            value: SqlValue::Text("active".into()),
        });
        p.order_bys.push(OrderBy {
            field: "name".into(),
            direction: Direction::Asc,
        });
        p.after = Some(SqlValue::Text("m".into()));

        let (sql, params) = p.select_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT id, data::text, version FROM whisker_users \
             WHERE data->>'status' = $1 AND data->>'name' > $2 \
             ORDER BY data->>'name' ASC"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn after_descending_uses_less_than() {
        let mut p = parts("whisker_users");
        p.order_bys.push(OrderBy {
            field: "name".into(),
            direction: Direction::Desc,
        });
        p.after = Some(SqlValue::Text("m".into()));
        let (sql, _) = p.select_sql().unwrap();
        assert!(sql.contains("data->>'name' < $1"));
    }

    #[test]
    fn after_without_order_by_fails() {
        let mut p = parts("whisker_users");
        p.after = Some(SqlValue::Text("m".into()));
        let err = p.select_sql().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rejects_unknown_operator() {
        let mut p = parts("whisker_users");
        p.conditions.push(Condition {
            field: "name".into(),
            op: "LIKE".into(),
            value: SqlValue::Text("%a%".into()),
        });
        let err = p.select_sql().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn count_drops_order_and_pagination() {
        let mut p = parts("whisker_users");
        p.conditions.push(Condition {
            field: "name".into(),
            op: "!=".into(),
            value: SqlValue::Text("Bob".into()),
        });
        p.order_bys.push(OrderBy {
            field: "name".into(),
            direction: Direction::Asc,
        });
        p.limit = Some(3);
        let (sql, params) = p.count_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM whisker_users WHERE data->>'name' != $1"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn exists_wraps_inner_select() {
        let mut p = parts("whisker_users");
        p.conditions.push(Condition {
            field: "id".into(),
            op: "=".into(),
            value: SqlValue::Text("u1".into()),
        });
        let (sql, _) = p.exists_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT EXISTS(SELECT 1 FROM whisker_users WHERE id = $1)"
        );
    }
}
