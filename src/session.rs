//! Sessions: one transaction spanning documents and events.
//!
//! A session wraps a single database transaction behind the same
//! [`Executor`] contract the pool satisfies, so collections and event
//! stores built against it compose atomically — commit persists every
//! operation, rollback discards them all.
//!
//! Sessions carry a private schema-bootstrap memo: DDL executed inside the
//! transaction is invisible to other connections until commit, so marking
//! tables created in the store's shared memo would poison it for other
//! callers.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::executor::{bind_params, ExecError, Executor, SqlValue};
use crate::schema::Bootstrap;
use crate::store::Backend;

/// A unit of work wrapping one database transaction.
///
/// Construct collections and event stores against the session exactly as
/// against the store; their operations then run inside the transaction.
/// Dropping a session without committing leaves the rollback to the
/// driver, which discards the transaction when the connection is returned
/// to the pool; calling [`rollback`](Session::rollback) (or
/// [`close`](Session::close)) makes it explicit.
pub struct Session {
    executor: Arc<TxExecutor>,
    codec: Arc<dyn Codec>,
    bootstrap: Arc<Bootstrap>,
    max_batch_size: usize,
}

impl Session {
    pub(crate) fn new(
        tx: Transaction<'static, Postgres>,
        codec: Arc<dyn Codec>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            executor: Arc::new(TxExecutor {
                tx: Mutex::new(Some(tx)),
            }),
            codec,
            bootstrap: Arc::new(Bootstrap::new()),
            max_batch_size,
        }
    }

    /// Commits every operation in this session atomically. A second call
    /// after commit or rollback fails with [`Error::SessionClosed`].
    pub async fn commit(&self) -> Result<()> {
        let mut guard = self.executor.tx.lock().await;
        match guard.take() {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|e| Error::db("whisker: commit session", e.into())),
            None => Err(Error::SessionClosed),
        }
    }

    /// Discards every operation in this session. Safe to call more than
    /// once; a rollback after close is a no-op.
    pub async fn rollback(&self) -> Result<()> {
        let mut guard = self.executor.tx.lock().await;
        match guard.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| Error::db("whisker: rollback session", e.into())),
            None => Ok(()),
        }
    }

    /// Rolls back if the session was not committed. Safe to call
    /// unconditionally at the end of a unit of work.
    pub async fn close(&self) -> Result<()> {
        self.rollback().await
    }
}

impl Backend for Session {
    fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    fn codec(&self) -> Arc<dyn Codec> {
        self.codec.clone()
    }

    fn bootstrap(&self) -> Arc<Bootstrap> {
        self.bootstrap.clone()
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

/// Routes executor calls through the session's transaction. Once the
/// transaction is taken by commit or rollback, every call fails with
/// [`ExecError::Closed`].
struct TxExecutor {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

#[async_trait]
impl Executor for TxExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, ExecError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(ExecError::Closed)?;
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<Vec<PgRow>, ExecError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(ExecError::Closed)?;
        Ok(bind_params(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await?)
    }

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<Option<PgRow>, ExecError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(ExecError::Closed)?;
        Ok(bind_params(sqlx::query(sql), params)
            .fetch_optional(&mut **tx)
            .await?)
    }

    fn in_transaction(&self) -> bool {
        true
    }
}
