//! Error types for whisker operations.
//!
//! A single crate-level [`Error`] enum covers every failure mode, so callers
//! can match on the kind regardless of which subsystem produced it. Variants
//! carry the operation context that produced them ("collection users: load
//! u1: ..."), and database or codec causes stay attached as sources.
//!
//! Batch operations report per-document failures through [`BatchError`],
//! which preserves the inner error for each id so callers can still match on
//! kinds after a partial failure.

use std::collections::HashMap;

use thiserror::Error;

use crate::executor::ExecError;

/// All errors that can occur in whisker operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A document or stream with the given identity does not exist.
    #[error("{0}: not found")]
    NotFound(String),

    /// An optimistic concurrency check failed: a versioned update lost the
    /// race, or an event append saw an unexpected stream version.
    #[error("{0}: concurrency conflict")]
    ConcurrencyConflict(String),

    /// An append with expected version 0 targeted a stream that already has
    /// events.
    #[error("events: append {stream_id}: stream already exists")]
    StreamExists { stream_id: String },

    /// An insert collided with an existing document id.
    #[error("{0}: duplicate id")]
    DuplicateId(String),

    /// A batched update failed its per-row version predicate.
    #[error("{0}: version conflict")]
    VersionConflict(String),

    /// A batch operation exceeded the configured maximum size. Nothing was
    /// written.
    #[error("{context}: batch of {size} exceeds maximum {max}")]
    BatchTooLarge {
        context: String,
        size: usize,
        max: usize,
    },

    /// Invalid input: a bad collection name, query field, operator, or an
    /// empty document id. Raised before any I/O.
    #[error("{0}")]
    InvalidArgument(String),

    /// The session was already committed or rolled back.
    #[error("session already closed")]
    SessionClosed,

    /// A database operation failed.
    #[error("{context}: {source}")]
    Db {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// The codec could not marshal or unmarshal a document payload.
    #[error("{context}: {source}")]
    Codec {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Per-document failures from a batch operation.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl Error {
    /// Wraps an executor-level failure with operation context. A closed
    /// session surfaces as [`Error::SessionClosed`] rather than a database
    /// fault.
    pub(crate) fn db(context: impl Into<String>, source: ExecError) -> Self {
        match source {
            ExecError::Closed => Error::SessionClosed,
            ExecError::Db(source) => Error::Db {
                context: context.into(),
                source,
            },
        }
    }

    pub(crate) fn codec(
        context: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Error::Codec {
            context: context.into(),
            source,
        }
    }

    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for [`Error::ConcurrencyConflict`].
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict(_))
    }
}

/// A `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Per-document errors from a batch operation, keyed by document id.
///
/// Batch operations succeed partially where possible: the documents that
/// could be processed are, and the rest are reported here with the error
/// each one hit.
#[derive(Debug, Error)]
#[error("batch {op}: {} of {total} documents failed", .errors.len())]
pub struct BatchError {
    /// The batch operation that failed ("insert", "load", "update", "delete").
    pub op: &'static str,
    /// Total number of documents in the batch.
    pub total: usize,
    /// The failure for each affected document id.
    pub errors: HashMap<String, Error>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_context() {
        let err = Error::NotFound("collection users: load u1".to_string());
        assert_eq!(err.to_string(), "collection users: load u1: not found");

        let err = Error::StreamExists {
            stream_id: "order-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "events: append order-1: stream already exists"
        );

        let err = Error::BatchTooLarge {
            context: "collection users: insert many".to_string(),
            size: 1500,
            max: 1000,
        };
        assert_eq!(
            err.to_string(),
            "collection users: insert many: batch of 1500 exceeds maximum 1000"
        );
    }

    #[test]
    fn batch_error_counts_failures() {
        let mut errors = HashMap::new();
        errors.insert(
            "u1".to_string(),
            Error::NotFound("collection users: load u1".to_string()),
        );
        errors.insert(
            "u2".to_string(),
            Error::NotFound("collection users: load u2".to_string()),
        );
        let err = BatchError {
            op: "load",
            total: 5,
            errors,
        };
        assert_eq!(err.to_string(), "batch load: 2 of 5 documents failed");
        assert!(err.errors["u1"].is_not_found());
    }

    #[test]
    fn kind_predicates() {
        assert!(Error::NotFound(String::new()).is_not_found());
        assert!(Error::ConcurrencyConflict(String::new()).is_concurrency_conflict());
        assert!(!Error::SessionClosed.is_not_found());
    }
}
