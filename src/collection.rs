//! Typed CRUD over a JSONB document table.
//!
//! A [`Collection`] is an ephemeral, cheaply-constructed view over the
//! `whisker_{name}` table, bound to whichever backend created it (store or
//! session). The table and any indexes declared on the document type are
//! created lazily on first touch.
//!
//! Single-document writes enforce optimistic concurrency when the type has
//! a version field: updates carry `AND version = $current` and a lost race
//! surfaces as [`Error::ConcurrencyConflict`]. Batch operations are bounded
//! by the store's `max_batch_size`, run as single statements over array
//! binds, and report per-id failures through [`BatchError`] while keeping
//! the successful rows.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::Row;

use crate::codec::Codec;
use crate::document::{Document, IndexSpec};
use crate::error::{BatchError, Error, Result};
use crate::executor::{Executor, SqlValue};
use crate::query::Query;
use crate::schema::{self, Bootstrap};
use crate::store::Backend;

/// Ensures the collection table and its declared indexes exist.
///
/// Index creation uses `CREATE INDEX CONCURRENTLY`, so it is skipped
/// entirely when the executor runs inside a transaction; the next
/// non-transactional touch picks it up.
pub(crate) async fn ensure_collection(
    bootstrap: &Bootstrap,
    exec: &dyn Executor,
    name: &str,
    indexes: &[IndexSpec],
) -> Result<()> {
    bootstrap.ensure_collection(exec, name).await?;
    if indexes.is_empty() || exec.in_transaction() {
        return Ok(());
    }
    for index in indexes {
        let index_name = schema::index_name(name, index);
        if bootstrap.is_index_created(&index_name) {
            continue;
        }
        exec.execute(&schema::index_ddl(name, index), &[])
            .await
            .map_err(|e| Error::db(format!("collection {name}: create index {index_name}"), e))?;
        bootstrap.mark_index_created(&index_name);
    }
    Ok(())
}

/// Typed document collection backed by a `whisker_{name}` table.
pub struct Collection<T: Document> {
    name: String,
    table: String,
    exec: Arc<dyn Executor>,
    codec: Arc<dyn Codec>,
    bootstrap: Arc<Bootstrap>,
    max_batch_size: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> Collection<T> {
    /// Creates a collection view against the given backend. The collection
    /// name is validated on first use.
    pub fn new(backend: &dyn Backend, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            table: schema::collection_table(name),
            exec: backend.executor(),
            codec: backend.codec(),
            bootstrap: backend.bootstrap(),
            max_batch_size: backend.max_batch_size(),
            _marker: PhantomData,
        }
    }

    async fn ensure(&self) -> Result<()> {
        ensure_collection(&self.bootstrap, self.exec.as_ref(), &self.name, T::INDEXES).await
    }

    fn check_batch_size(&self, size: usize, op: &str) -> Result<()> {
        if self.max_batch_size > 0 && size > self.max_batch_size {
            return Err(Error::BatchTooLarge {
                context: format!("collection {}: {op}", self.name),
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    /// Serializes a document payload to JSON text via the codec.
    fn marshal(&self, doc: &T, context: &str) -> Result<String> {
        let value = doc
            .to_data()
            .map_err(|e| Error::codec(context.to_owned(), Box::new(e)))?;
        let bytes = self
            .codec
            .marshal(&value)
            .map_err(|e| Error::codec(context.to_owned(), e))?;
        String::from_utf8(bytes).map_err(|e| Error::codec(context.to_owned(), Box::new(e)))
    }

    fn unmarshal(&self, data: &str, id: &str, version: i32, context: &str) -> Result<T> {
        let value = self
            .codec
            .unmarshal(data.as_bytes())
            .map_err(|e| Error::codec(context.to_owned(), e))?;
        T::from_data(value, id, version as i64)
            .map_err(|e| Error::codec(context.to_owned(), Box::new(e)))
    }

    /// Stores a new document. The id field must be non-empty. On success
    /// the document's version is set to 1. An existing id fails with
    /// [`Error::DuplicateId`].
    pub async fn insert(&self, doc: &mut T) -> Result<()> {
        self.ensure().await?;

        let id = doc.document_id().to_owned();
        if id.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "collection {}: insert: id must not be empty",
                self.name
            )));
        }

        let context = format!("collection {}: insert {id}", self.name);
        let data = self.marshal(doc, &context)?;
        let sql = format!("INSERT INTO {} (id, data) VALUES ($1, $2::jsonb)", self.table);
        self.exec
            .execute(&sql, &[SqlValue::Text(id), SqlValue::Text(data)])
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    Error::DuplicateId(context.clone())
                } else {
                    Error::db(context.clone(), e)
                }
            })?;

        doc.set_document_version(1);
        Ok(())
    }

    /// Retrieves a document by id. Fails [`Error::NotFound`] when absent.
    pub async fn load(&self, id: &str) -> Result<T> {
        self.ensure().await?;

        let context = format!("collection {}: load {id}", self.name);
        let sql = format!("SELECT data::text, version FROM {} WHERE id = $1", self.table);
        let row = self
            .exec
            .fetch_optional(&sql, &[SqlValue::Text(id.to_owned())])
            .await
            .map_err(|e| Error::db(context.clone(), e))?
            .ok_or_else(|| Error::NotFound(context.clone()))?;

        let data: String = row.try_get(0).map_err(|e| Error::db(context.clone(), e.into()))?;
        let version: i32 = row.try_get(1).map_err(|e| Error::db(context.clone(), e.into()))?;
        self.unmarshal(&data, id, version, &context)
    }

    /// Replaces an existing document's data. When the type has a version
    /// field, the update is optimistic: a concurrent modification fails
    /// with [`Error::ConcurrencyConflict`]. On success the version is
    /// incremented.
    pub async fn update(&self, doc: &mut T) -> Result<()> {
        self.ensure().await?;

        let id = doc.document_id().to_owned();
        let context = format!("collection {}: update {id}", self.name);
        let current = doc.document_version();
        let new_version = current.unwrap_or(0) + 1;
        let data = self.marshal(doc, &context)?;

        let (sql, params) = match current {
            Some(version) => (
                format!(
                    "UPDATE {} SET data = $1::jsonb, version = $2, updated_at = now() \
                     WHERE id = $3 AND version = $4",
                    self.table
                ),
                vec![
                    SqlValue::Text(data),
                    SqlValue::Int4(new_version as i32),
                    SqlValue::Text(id),
                    SqlValue::Int4(version as i32),
                ],
            ),
            None => (
                format!(
                    "UPDATE {} SET data = $1::jsonb, version = $2, updated_at = now() \
                     WHERE id = $3",
                    self.table
                ),
                vec![
                    SqlValue::Text(data),
                    SqlValue::Int4(new_version as i32),
                    SqlValue::Text(id),
                ],
            ),
        };

        let affected = self
            .exec
            .execute(&sql, &params)
            .await
            .map_err(|e| Error::db(context.clone(), e))?;

        if affected == 0 {
            return Err(if current.is_some() {
                Error::ConcurrencyConflict(context)
            } else {
                Error::NotFound(context)
            });
        }

        doc.set_document_version(new_version);
        Ok(())
    }

    /// Removes a document by id. Fails [`Error::NotFound`] when absent.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ensure().await?;

        let context = format!("collection {}: delete {id}", self.name);
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let affected = self
            .exec
            .execute(&sql, &[SqlValue::Text(id.to_owned())])
            .await
            .map_err(|e| Error::db(context.clone(), e))?;
        if affected == 0 {
            return Err(Error::NotFound(context));
        }
        Ok(())
    }

    /// True when a document with the given id exists.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        self.ensure().await?;

        let context = format!("collection {}: exists {id}", self.name);
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)",
            self.table
        );
        let row = self
            .exec
            .fetch_optional(&sql, &[SqlValue::Text(id.to_owned())])
            .await
            .map_err(|e| Error::db(context.clone(), e))?
            .ok_or_else(|| Error::NotFound(context.clone()))?;
        row.try_get(0).map_err(|e| Error::db(context, e.into()))
    }

    /// Total number of documents in the collection.
    pub async fn count(&self) -> Result<i64> {
        self.query().count().await
    }

    /// Starts a fluent query over this collection.
    pub fn query(&self) -> Query<T> {
        Query::new(
            self.name.clone(),
            self.table.clone(),
            self.exec.clone(),
            self.codec.clone(),
            self.bootstrap.clone(),
        )
    }

    /// Starts a query with an initial filter condition.
    pub fn filter(
        &self,
        field: impl Into<String>,
        op: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Query<T> {
        self.query().filter(field, op, value)
    }

    /// Stores multiple documents in one multi-row insert. All documents
    /// must have non-empty ids. A unique-constraint violation rolls the
    /// whole insert back and reports every id in a [`BatchError`].
    pub async fn insert_many(&self, docs: &mut [T]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.check_batch_size(docs.len(), "insert many")?;
        self.ensure().await?;

        let mut ids = Vec::with_capacity(docs.len());
        let mut payloads = Vec::with_capacity(docs.len());
        for (i, doc) in docs.iter().enumerate() {
            let id = doc.document_id().to_owned();
            if id.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "collection {}: insert many: document {i}: id must not be empty",
                    self.name
                )));
            }
            let context = format!("collection {}: insert many {id}", self.name);
            payloads.push(self.marshal(doc, &context)?);
            ids.push(id);
        }

        let sql = format!(
            "INSERT INTO {} (id, data) SELECT * FROM unnest($1::text[], $2::jsonb[])",
            self.table
        );
        let result = self
            .exec
            .execute(
                &sql,
                &[SqlValue::TextArray(ids.clone()), SqlValue::TextArray(payloads)],
            )
            .await;

        if let Err(e) = result {
            if e.is_unique_violation() {
                let errors = ids
                    .iter()
                    .map(|id| {
                        let context = format!("collection {}: insert {id}", self.name);
                        (id.clone(), Error::DuplicateId(context))
                    })
                    .collect();
                return Err(Error::Batch(BatchError {
                    op: "insert",
                    total: ids.len(),
                    errors,
                }));
            }
            return Err(Error::db(format!("collection {}: insert many", self.name), e));
        }

        for doc in docs.iter_mut() {
            doc.set_document_version(1);
        }
        Ok(())
    }

    /// Loads multiple documents by id with a single query. Found documents
    /// are returned in no guaranteed order; missing ids are reported in the
    /// accompanying [`BatchError`], which is `None` when all were found.
    pub async fn load_many(&self, ids: &[&str]) -> Result<(Vec<T>, Option<BatchError>)> {
        if ids.is_empty() {
            return Ok((Vec::new(), None));
        }
        self.check_batch_size(ids.len(), "load many")?;
        self.ensure().await?;

        let context = format!("collection {}: load many", self.name);
        let sql = format!(
            "SELECT id, data::text, version FROM {} WHERE id = ANY($1::text[])",
            self.table
        );
        let id_params: Vec<String> = ids.iter().map(|id| (*id).to_owned()).collect();
        let rows = self
            .exec
            .fetch_all(&sql, &[SqlValue::TextArray(id_params)])
            .await
            .map_err(|e| Error::db(context.clone(), e))?;

        let mut found = HashSet::with_capacity(rows.len());
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0).map_err(|e| Error::db(context.clone(), e.into()))?;
            let data: String = row.try_get(1).map_err(|e| Error::db(context.clone(), e.into()))?;
            let version: i32 = row.try_get(2).map_err(|e| Error::db(context.clone(), e.into()))?;
            let doc_context = format!("collection {}: load many {id}", self.name);
            docs.push(self.unmarshal(&data, &id, version, &doc_context)?);
            found.insert(id);
        }

        let missing: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !found.contains(*id))
            .collect();
        if missing.is_empty() {
            return Ok((docs, None));
        }
        let errors = missing
            .into_iter()
            .map(|id| {
                let context = format!("collection {}: load {id}", self.name);
                (id.to_owned(), Error::NotFound(context))
            })
            .collect();
        Ok((
            docs,
            Some(BatchError {
                op: "load",
                total: ids.len(),
                errors,
            }),
        ))
    }

    /// Applies versioned updates to multiple documents in one statement.
    /// Rows that pass their version predicate are updated and their
    /// documents' versions incremented; the rest are reported in the
    /// returned [`BatchError`].
    pub async fn update_many(&self, docs: &mut [T]) -> Result<Option<BatchError>> {
        if docs.is_empty() {
            return Ok(None);
        }
        self.check_batch_size(docs.len(), "update many")?;
        self.ensure().await?;

        let versioned = docs[0].document_version().is_some();
        let context = format!("collection {}: update many", self.name);

        let mut ids = Vec::with_capacity(docs.len());
        let mut payloads = Vec::with_capacity(docs.len());
        let mut versions = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            let id = doc.document_id().to_owned();
            let doc_context = format!("collection {}: update {id}", self.name);
            payloads.push(self.marshal(doc, &doc_context)?);
            versions.push(doc.document_version().unwrap_or(0) as i32);
            ids.push(id);
        }

        let (sql, params) = if versioned {
            (
                format!(
                    "UPDATE {table} AS t \
                     SET data = v.data, version = t.version + 1, updated_at = now() \
                     FROM unnest($1::text[], $2::jsonb[], $3::integer[]) AS v(id, data, version) \
                     WHERE t.id = v.id AND t.version = v.version \
                     RETURNING t.id",
                    table = self.table
                ),
                vec![
                    SqlValue::TextArray(ids.clone()),
                    SqlValue::TextArray(payloads),
                    SqlValue::Int4Array(versions),
                ],
            )
        } else {
            (
                format!(
                    "UPDATE {table} AS t \
                     SET data = v.data, version = t.version + 1, updated_at = now() \
                     FROM unnest($1::text[], $2::jsonb[]) AS v(id, data) \
                     WHERE t.id = v.id \
                     RETURNING t.id",
                    table = self.table
                ),
                vec![
                    SqlValue::TextArray(ids.clone()),
                    SqlValue::TextArray(payloads),
                ],
            )
        };

        let rows = self
            .exec
            .fetch_all(&sql, &params)
            .await
            .map_err(|e| Error::db(context.clone(), e))?;

        let mut updated = HashSet::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0).map_err(|e| Error::db(context.clone(), e.into()))?;
            updated.insert(id);
        }

        for doc in docs.iter_mut() {
            if updated.contains(doc.document_id()) {
                let next = doc.document_version().unwrap_or(0) + 1;
                doc.set_document_version(next);
            }
        }

        if updated.len() == ids.len() {
            return Ok(None);
        }
        let errors = ids
            .iter()
            .filter(|id| !updated.contains(*id))
            .map(|id| {
                let doc_context = format!("collection {}: update {id}", self.name);
                let error = if versioned {
                    Error::VersionConflict(doc_context)
                } else {
                    Error::NotFound(doc_context)
                };
                (id.clone(), error)
            })
            .collect();
        Ok(Some(BatchError {
            op: "update",
            total: ids.len(),
            errors,
        }))
    }

    /// Deletes multiple documents with a single statement. Missing ids are
    /// reported in the returned [`BatchError`]; the present ones are still
    /// deleted.
    pub async fn delete_many(&self, ids: &[&str]) -> Result<Option<BatchError>> {
        if ids.is_empty() {
            return Ok(None);
        }
        self.check_batch_size(ids.len(), "delete many")?;
        self.ensure().await?;

        let context = format!("collection {}: delete many", self.name);
        let sql = format!(
            "DELETE FROM {} WHERE id = ANY($1::text[]) RETURNING id",
            self.table
        );
        let id_params: Vec<String> = ids.iter().map(|id| (*id).to_owned()).collect();
        let rows = self
            .exec
            .fetch_all(&sql, &[SqlValue::TextArray(id_params)])
            .await
            .map_err(|e| Error::db(context.clone(), e))?;

        let mut deleted = HashSet::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0).map_err(|e| Error::db(context.clone(), e.into()))?;
            deleted.insert(id);
        }

        let missing: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !deleted.contains(*id))
            .collect();
        if missing.is_empty() {
            return Ok(None);
        }
        let errors = missing
            .into_iter()
            .map(|id| {
                let doc_context = format!("collection {}: delete {id}", self.name);
                (id.to_owned(), Error::NotFound(doc_context))
            })
            .collect();
        Ok(Some(BatchError {
            op: "delete",
            total: ids.len(),
            errors,
        }))
    }
}
