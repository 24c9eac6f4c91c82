//! Default processing store: a document collection keyed by stream id.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::Row;

use crate::error::{Error, Result};
use crate::executor::{Executor, SqlValue};
use crate::projections::ProcessingStore;
use crate::schema::{self, Bootstrap};
use crate::store::Backend;

/// Persists projection state in the `whisker_{name}` collection table.
/// The stored version counter increments on every upsert, independent of
/// the source events' versions.
pub struct CollectionProcessingStore {
    exec: Arc<dyn Executor>,
    bootstrap: Arc<Bootstrap>,
    name: String,
    table: String,
}

impl CollectionProcessingStore {
    pub fn new(backend: &dyn Backend, name: &str) -> Self {
        Self {
            exec: backend.executor(),
            bootstrap: backend.bootstrap(),
            name: name.to_owned(),
            table: schema::collection_table(name),
        }
    }

    async fn ensure(&self) -> Result<()> {
        self.bootstrap
            .ensure_collection(self.exec.as_ref(), &self.name)
            .await
    }
}

#[async_trait]
impl ProcessingStore for CollectionProcessingStore {
    async fn load_state(&self, id: &str) -> Result<Option<(Vec<u8>, i32)>> {
        self.ensure().await?;

        let context = format!("processing store {}: load {id}", self.name);
        let sql = format!("SELECT data::text, version FROM {} WHERE id = $1", self.table);
        let row = self
            .exec
            .fetch_optional(&sql, &[SqlValue::Text(id.to_owned())])
            .await
            .map_err(|e| Error::db(context.clone(), e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.try_get(0).map_err(|e| Error::db(context.clone(), e.into()))?;
        let version: i32 = row.try_get(1).map_err(|e| Error::db(context, e.into()))?;
        Ok(Some((data.into_bytes(), version)))
    }

    async fn upsert_state(&self, id: &str, data: &[u8], version: i32) -> Result<()> {
        self.ensure().await?;

        let context = format!("processing store {}: upsert {id}", self.name);
        let payload = String::from_utf8(data.to_vec())
            .map_err(|e| Error::codec(context.clone(), Box::new(e)))?;
        let sql = format!(
            "INSERT INTO {} (id, data, version, created_at, updated_at) \
             VALUES ($1, $2::jsonb, $3, now(), now()) \
             ON CONFLICT (id) DO UPDATE SET data = $2::jsonb, version = $3, updated_at = now()",
            self.table
        );
        self.exec
            .execute(
                &sql,
                &[
                    SqlValue::Text(id.to_owned()),
                    SqlValue::Text(payload),
                    SqlValue::Int4(version + 1),
                ],
            )
            .await
            .map_err(|e| Error::db(context, e))?;
        Ok(())
    }

    async fn delete_state(&self, id: &str) -> Result<()> {
        self.ensure().await?;

        let context = format!("processing store {}: delete {id}", self.name);
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        self.exec
            .execute(&sql, &[SqlValue::Text(id.to_owned())])
            .await
            .map_err(|e| Error::db(context, e))?;
        Ok(())
    }
}
