//! The typed document contract.
//!
//! A document is a plain serde struct with an id column, an optional
//! version column, and everything else stored in the JSONB `data` payload.
//! [`Document`] is normally implemented with `#[derive(Document)]`, which
//! resolves the id and version roles (convention first, attribute
//! override), computes JSON keys from the serde attributes, and collects
//! declared indexes. See the `whisker-derive` crate for the attribute
//! grammar.
//!
//! The stored payload never contains the id or version keys: `to_data`
//! strips them and `from_data` re-injects the column values on load, so the
//! columns stay authoritative.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Index kinds supported on document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// A btree index over one JSON path (`data->>'field'`).
    Btree,
    /// A GIN index over the whole `data` column.
    Gin,
}

/// A declared index on a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub kind: IndexKind,
    /// JSON key of the indexed field; empty for the whole-document GIN
    /// index.
    pub json_key: &'static str,
}

/// A data field of a document type, as seen by the ORM-compat layer:
/// the SQL column name a foreign ORM would use and the JSON key the field
/// is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub column: &'static str,
    pub json_key: &'static str,
}

/// A typed document stored in a whisker collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Indexes declared with `#[document(index)]`, in declaration order.
    const INDEXES: &'static [IndexSpec] = &[];

    /// Data fields of the type, excluding the id and version roles.
    const FIELDS: &'static [FieldSpec] = &[];

    /// The document id.
    fn document_id(&self) -> &str;

    /// Overwrites the document id (used when reconstructing from a row).
    fn set_document_id(&mut self, id: &str);

    /// The current optimistic-concurrency version, or `None` when the type
    /// has no version field.
    fn document_version(&self) -> Option<i64> {
        None
    }

    /// Overwrites the version. A no-op for unversioned types.
    fn set_document_version(&mut self, _version: i64) {}

    /// Serializes the document into its stored JSON payload, with the id
    /// and version keys stripped.
    fn to_data(&self) -> Result<Value, serde_json::Error>;

    /// Reconstructs a document from its stored payload plus the id and
    /// version column values.
    fn from_data(data: Value, id: &str, version: i64) -> Result<Self, serde_json::Error>;
}
