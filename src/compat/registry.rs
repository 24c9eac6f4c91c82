//! Model registry for the ORM-compat layer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::document::Document;
use crate::schema;

/// A data column as a foreign ORM sees it: the SQL column name and the
/// JSON key the field is stored under in the `data` payload.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub column: String,
    pub json_key: String,
}

/// Everything the rewriter needs to know about one registered model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// The table name the ORM emits in its SQL.
    pub name: String,
    /// The whisker table the model actually lives in (`whisker_{name}`).
    pub table: String,
    pub id_column: String,
    pub version_column: String,
    pub data_columns: Vec<ColumnSpec>,
}

impl ModelInfo {
    /// Builds model info from a document type's derived field list.
    pub fn of<T: Document>(name: &str) -> Self {
        let data_columns = T::FIELDS
            .iter()
            .map(|field| ColumnSpec {
                column: field.column.to_owned(),
                json_key: field.json_key.to_owned(),
            })
            .collect();
        Self {
            name: name.to_owned(),
            table: schema::collection_table(name),
            id_column: "id".to_owned(),
            version_column: "version".to_owned(),
            data_columns,
        }
    }
}

/// Registered models, addressable by the name the ORM uses or by the
/// whisker table name.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    by_name: HashMap<String, Arc<ModelInfo>>,
    by_table: HashMap<String, Arc<ModelInfo>>,
}

impl Registry {
    pub(crate) fn register(&mut self, info: ModelInfo) {
        let info = Arc::new(info);
        self.by_table.insert(info.table.clone(), info.clone());
        self.by_name.insert(info.name.clone(), info);
    }

    /// Resolves a table reference as it appears in foreign SQL: either the
    /// ORM-visible name or the already-rewritten whisker table.
    pub(crate) fn lookup_table(&self, table: &str) -> Option<Arc<ModelInfo>> {
        self.by_table
            .get(table)
            .or_else(|| self.by_name.get(table))
            .cloned()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
