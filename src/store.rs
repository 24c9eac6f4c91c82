//! The store: lifecycle root and backend wiring.
//!
//! A [`Store`] owns the PostgreSQL connection pool, the configured codec,
//! the shared schema-bootstrap memo, and the batch-size limit. Collections,
//! event stores, and projection machinery are ephemeral views constructed
//! against a [`Backend`] — either the store itself (pool execution) or a
//! [`Session`](crate::Session) (transactional execution).

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::codec::{Codec, JsonCodec};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::schema::Bootstrap;
use crate::session::Session;

/// Access to the whisker subsystems shared by all components: the database
/// executor, the JSON codec, the schema bootstrap, and the batch limit.
/// Both [`Store`] and [`Session`](crate::Session) implement it.
pub trait Backend: Send + Sync {
    fn executor(&self) -> Arc<dyn Executor>;
    fn codec(&self) -> Arc<dyn Codec>;
    fn bootstrap(&self) -> Arc<Bootstrap>;
    /// Maximum documents per batch operation; 0 means unlimited.
    fn max_batch_size(&self) -> usize;
}

/// Store configuration. The defaults are a serde_json codec and a batch
/// limit of 1000 documents.
#[derive(Clone)]
pub struct StoreOptions {
    codec: Arc<dyn Codec>,
    max_batch_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            codec: Arc::new(JsonCodec),
            max_batch_size: 1000,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default JSON codec.
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Sets the maximum number of documents per batch operation. Pass 0 to
    /// remove the limit.
    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n;
        self
    }
}

/// The main entry point: a PostgreSQL-backed document and event store.
///
/// Cloning is cheap; all clones share the same pool and bootstrap memo.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    codec: Arc<dyn Codec>,
    bootstrap: Arc<Bootstrap>,
    max_batch_size: usize,
}

impl Store {
    /// Connects to PostgreSQL with default options.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, StoreOptions::default()).await
    }

    /// Connects to PostgreSQL with explicit options.
    pub async fn connect_with(url: &str, options: StoreOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .connect(url)
            .await
            .map_err(|e| Error::db("whisker: connect", e.into()))?;
        Ok(Self::with_pool(pool, options))
    }

    /// Wraps an existing pool. Useful when the application already manages
    /// its own pool configuration.
    pub fn with_pool(pool: PgPool, options: StoreOptions) -> Self {
        Self {
            pool,
            codec: options.codec,
            bootstrap: Arc::new(Bootstrap::new()),
            max_batch_size: options.max_batch_size,
        }
    }

    /// The underlying connection pool. Exposed for projection workers
    /// (advisory-lock connections) and ORM-compat shims.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begins a transaction and returns a session whose operations all run
    /// inside it.
    pub async fn session(&self) -> Result<Session> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::db("whisker: begin session", e.into()))?;
        Ok(Session::new(tx, self.codec.clone(), self.max_batch_size))
    }

    /// Closes the connection pool, waiting for checked-out connections to
    /// be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl Backend for Store {
    fn executor(&self) -> Arc<dyn Executor> {
        Arc::new(self.pool.clone())
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
