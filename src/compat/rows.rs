//! Row repacking: JSONB results back into the column shape ORMs expect.

use std::collections::HashMap;

use serde_json::Value;

use crate::compat::registry::ModelInfo;

/// A result row presented with the column names the foreign ORM selected,
/// repacked from the stored `(id, data, version)` shape.
#[derive(Debug, Clone)]
pub struct CompatRow {
    columns: HashMap<String, Value>,
}

impl CompatRow {
    /// The value for a column, or `None` when the stored payload has no
    /// such key.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> &HashMap<String, Value> {
        &self.columns
    }
}

/// Extracts JSONB fields into a column-name → value map. Keys missing from
/// the payload are simply absent, matching a NULL column.
pub(crate) fn unpack_row(info: &ModelInfo, id: &str, data: &Value, version: i32) -> CompatRow {
    let mut columns = HashMap::with_capacity(info.data_columns.len() + 2);
    columns.insert(info.id_column.clone(), Value::String(id.to_owned()));
    columns.insert(info.version_column.clone(), Value::from(version));

    if let Value::Object(map) = data {
        for spec in &info.data_columns {
            if let Some(value) = map.get(&spec.json_key) {
                columns.insert(spec.column.clone(), value.clone());
            }
        }
    }

    CompatRow { columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::registry::ColumnSpec;
    use serde_json::json;

    #[test]
    fn unpacks_columns_and_skips_missing_keys() {
        let info = ModelInfo {
            name: "users".to_owned(),
            table: "whisker_users".to_owned(),
            id_column: "id".to_owned(),
            version_column: "version".to_owned(),
            data_columns: vec![
                ColumnSpec {
                    column: "user_name".to_owned(),
                    json_key: "userName".to_owned(),
                },
                ColumnSpec {
                    column: "email".to_owned(),
                    json_key: "email".to_owned(),
                },
            ],
        };

        let row = unpack_row(&info, "u1", &json!({"userName": "alice"}), 3);
        assert_eq!(row.get("id"), Some(&json!("u1")));
        assert_eq!(row.get("version"), Some(&json!(3)));
        assert_eq!(row.get("user_name"), Some(&json!("alice")));
        assert_eq!(row.get("email"), None);
    }
}
