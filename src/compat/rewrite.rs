//! SQL rewriting: column-style statements onto the JSONB document schema.
//!
//! These rewrites are deliberately lexical. ORMs emit a narrow, predictable
//! SQL dialect, and the registry tells us exactly which tables and columns
//! to touch; everything else is left byte-for-byte intact.

use crate::compat::registry::{ModelInfo, Registry};
use crate::compat::ColumnSpec;
use crate::error::{Error, Result};
use crate::executor::SqlValue;
use crate::schema;

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Replaces whole-word, case-insensitive occurrences of `target`.
/// Word boundaries are non-identifier characters, so `user` does not match
/// inside `user_name`.
fn replace_word(s: &str, target: &str, replacement: &str) -> String {
    let mut result = s.to_owned();
    let target_lower = target.to_ascii_lowercase();
    let mut idx = 0;
    loop {
        let haystack = result[idx..].to_ascii_lowercase();
        let Some(pos) = haystack.find(&target_lower) else {
            break;
        };
        let abs = idx + pos;
        let end = abs + target.len();
        let bytes = result.as_bytes();
        let before_ok = abs == 0 || !is_ident_char(bytes[abs - 1]);
        let after_ok = end >= result.len() || !is_ident_char(bytes[end]);
        if before_ok && after_ok {
            result.replace_range(abs..end, replacement);
            idx = abs + replacement.len();
        } else {
            idx = end;
        }
    }
    result
}

fn replace_table_name(sql: &str, old_table: &str, new_table: &str) -> String {
    let result = sql.replace(&format!("\"{old_table}\""), new_table);
    replace_word(&result, old_table, new_table)
}

fn rewrite_column_refs(clause: &str, columns: &[ColumnSpec]) -> String {
    let mut result = clause.to_owned();
    for column in columns {
        result = replace_word(
            &result,
            &column.column,
            &format!("data->>'{}'", column.json_key),
        );
    }
    result
}

/// Shifts `$n` placeholders in a clause by `new_start - old_start`.
fn renumber_args(sql: &str, old_start: usize, new_start: usize) -> String {
    if new_start == old_start {
        return sql.to_owned();
    }
    let offset = new_start as i64 - old_start as i64;
    let mut result = sql.to_owned();
    for i in (old_start..=64).rev() {
        let old = format!("${i}");
        let replacement = format!("${}", i as i64 + offset);
        result = result.replace(&old, &replacement);
    }
    result
}

fn extract_insert_columns(sql: &str) -> Vec<String> {
    let Some(start) = sql.find('(') else {
        return Vec::new();
    };
    let Some(end) = sql[start..].find(')') else {
        return Vec::new();
    };
    sql[start + 1..start + end]
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_ascii_lowercase())
        .filter(|col| !col.is_empty())
        .collect()
}

/// Reads a single-quoted SQL string starting after the opening quote.
/// Returns the unescaped value and the index after the closing quote.
///
/// The copy is byte-for-byte: splits only happen at ASCII quote bytes, so
/// multi-byte UTF-8 sequences in the literal pass through intact.
fn parse_quoted_string(rest: &str, mut i: usize) -> (String, usize) {
    let bytes = rest.as_bytes();
    let mut value = Vec::new();
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                value.push(b'\'');
                i += 2;
                continue;
            }
            i += 1;
            break;
        }
        value.push(bytes[i]);
        i += 1;
    }
    (String::from_utf8_lossy(&value).into_owned(), i)
}

fn parse_unquoted_token(rest: &str, mut i: usize) -> (String, usize) {
    let bytes = rest.as_bytes();
    let start = i;
    while i < bytes.len() && bytes[i] != b',' && bytes[i] != b')' && bytes[i] != b' ' {
        i += 1;
    }
    (rest[start..i].trim().to_owned(), i)
}

/// Parses an inline VALUES clause into text parameters. ORMs that inline
/// literals (rather than binding) produce `VALUES ('x', 42, NULL)`; every
/// value comes back as text and the rewritten SQL casts as needed.
fn extract_inline_values(sql: &str) -> Vec<SqlValue> {
    let upper = sql.to_ascii_uppercase();
    let Some(values_idx) = upper.find("VALUES") else {
        return Vec::new();
    };
    let rest = &sql[values_idx + 6..];
    let Some(open) = rest.find('(') else {
        return Vec::new();
    };
    let rest = &rest[open + 1..];

    let mut values = Vec::new();
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b')' {
            break;
        }
        let (value, next) = if bytes[i] == b'\'' {
            parse_quoted_string(rest, i + 1)
        } else {
            parse_unquoted_token(rest, i)
        };
        values.push(SqlValue::Text(value));
        i = next;
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t' || bytes[i] == b',') {
            i += 1;
        }
    }
    values
}

/// `INSERT INTO t (cols...) VALUES (...)` → a whisker document insert with
/// the data columns packed into `jsonb_build_object`.
pub(crate) fn rewrite_insert(
    info: &ModelInfo,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<(String, Vec<SqlValue>)> {
    let columns = extract_insert_columns(sql);
    if columns.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "compat: cannot parse INSERT columns from: {sql}"
        )));
    }

    // ORMs that inline literal values bind no parameters; recover them
    // from the SQL text so the rest of the rewrite works uniformly.
    let params = if params.is_empty() {
        extract_inline_values(sql)
    } else {
        params
    };

    let mut id_value = None;
    let mut data_pairs: Vec<(String, SqlValue)> = Vec::new();
    for (column, value) in columns.iter().zip(params.into_iter()) {
        if *column == info.id_column {
            id_value = Some(value);
        } else if let Some(spec) = info.data_columns.iter().find(|c| c.column == *column) {
            data_pairs.push((spec.json_key.clone(), value));
        }
    }

    let id_value = id_value.ok_or_else(|| {
        Error::InvalidArgument(format!(
            "compat: INSERT missing id column {:?}",
            info.id_column
        ))
    })?;

    let mut new_params = vec![id_value];
    let mut json_pairs = Vec::with_capacity(data_pairs.len());
    for (json_key, value) in data_pairs {
        new_params.push(value);
        json_pairs.push(format!("'{json_key}', ${}::text", new_params.len()));
    }

    let json_expr = if json_pairs.is_empty() {
        "'{}'::jsonb".to_owned()
    } else {
        format!("jsonb_build_object({})", json_pairs.join(", "))
    };

    let rewritten = format!(
        "INSERT INTO {} (id, data, version, created_at, updated_at) \
         VALUES ($1, {json_expr}, 1, now(), now())",
        info.table
    );
    Ok((rewritten, new_params))
}

/// `SELECT ... FROM t WHERE ...` → selects `(id, data, version)` from the
/// whisker table with WHERE column references turned into JSONB paths.
pub(crate) fn rewrite_select(
    info: &ModelInfo,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<(String, Vec<SqlValue>)> {
    let mut rewritten = replace_table_name(sql, &info.name, &info.table);

    let upper = rewritten.to_ascii_uppercase();
    if let Some(where_idx) = upper.find(" WHERE ") {
        let split = where_idx + 7;
        let rewritten_where = rewrite_column_refs(&rewritten[split..], &info.data_columns);
        rewritten = format!("{}{}", &rewritten[..split], rewritten_where);
    }

    let upper = rewritten.to_ascii_uppercase();
    if let (Some(select_idx), Some(from_idx)) = (upper.find("SELECT "), upper.find(" FROM ")) {
        rewritten = format!(
            "{}id, data, version{}",
            &rewritten[..select_idx + 7],
            &rewritten[from_idx..]
        );
    }

    Ok((rewritten, params))
}

/// `UPDATE t SET ... WHERE ...` → rebuilds the whole `data` payload with
/// `jsonb_build_object`, bumps the version, and rewrites WHERE references.
pub(crate) fn rewrite_update(
    info: &ModelInfo,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<(String, Vec<SqlValue>)> {
    let (set_columns, set_params, where_clause, where_params) = parse_update(sql, params);

    let mut new_params = Vec::new();
    let mut json_pairs = Vec::new();
    for (column, value) in set_columns.iter().zip(set_params.into_iter()) {
        if let Some(spec) = info
            .data_columns
            .iter()
            .find(|c| c.column.eq_ignore_ascii_case(column))
        {
            new_params.push(value);
            json_pairs.push(format!("'{}', ${}::text", spec.json_key, new_params.len()));
        }
    }

    let json_expr = if json_pairs.is_empty() {
        "'{}'::jsonb".to_owned()
    } else {
        format!("jsonb_build_object({})", json_pairs.join(", "))
    };

    let where_clause = rewrite_column_refs(&where_clause, &info.data_columns);
    let old_start = set_columns.len() + 1;
    let new_start = new_params.len() + 1;
    let where_clause = renumber_args(&where_clause, old_start, new_start);
    new_params.extend(where_params);

    let rewritten = format!(
        "UPDATE {} SET data = {json_expr}, version = version + 1, updated_at = now() \
         WHERE {where_clause}",
        info.table
    );
    Ok((rewritten, new_params))
}

/// Splits an UPDATE into SET columns (with their bound values) and the
/// WHERE clause (with the remaining values). Assumes the ORM binds SET
/// placeholders before WHERE placeholders, which every supported dialect
/// does.
fn parse_update(
    sql: &str,
    params: Vec<SqlValue>,
) -> (Vec<String>, Vec<SqlValue>, String, Vec<SqlValue>) {
    let upper = sql.to_ascii_uppercase();
    let set_idx = upper.find(" SET ").map(|i| i + 5).unwrap_or(0);
    let where_idx = upper.find(" WHERE ");
    let (set_clause, where_clause) = match where_idx {
        Some(idx) => (&sql[set_idx..idx], sql[idx + 7..].to_owned()),
        None => (&sql[set_idx..], String::new()),
    };

    let mut columns = Vec::new();
    let mut set_indices = Vec::new();
    for part in set_clause.split(',') {
        let Some(eq) = part.find('=') else { continue };
        let column = part[..eq].trim().trim_matches('"').to_ascii_lowercase();
        columns.push(column);
        let value = part[eq + 1..].trim();
        if let Some(rest) = value.strip_prefix('$') {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(n) = digits.parse::<usize>() {
                if n > 0 {
                    set_indices.push(n - 1);
                }
            }
        }
    }

    let mut set_params = Vec::new();
    for &idx in &set_indices {
        if idx < params.len() {
            set_params.push(params[idx].clone());
        }
    }
    let where_params = params.into_iter().skip(set_indices.len()).collect();
    (columns, set_params, where_clause, where_params)
}

pub(crate) fn rewrite_delete(
    info: &ModelInfo,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<(String, Vec<SqlValue>)> {
    let mut rewritten = replace_table_name(sql, &info.name, &info.table);
    let upper = rewritten.to_ascii_uppercase();
    if let Some(where_idx) = upper.find(" WHERE ") {
        let split = where_idx + 7;
        let rewritten_where = rewrite_column_refs(&rewritten[split..], &info.data_columns);
        rewritten = format!("{}{}", &rewritten[..split], rewritten_where);
    }
    Ok((rewritten, params))
}

/// Discards the ORM's column definitions and emits the standard whisker
/// document DDL.
pub(crate) fn rewrite_create_table(info: &ModelInfo) -> String {
    schema::collection_ddl(&info.name)
}

struct TableAlias {
    alias: String,
    info: std::sync::Arc<ModelInfo>,
}

/// SELECT with JOINs: every registered table reference is rewritten, and
/// alias-qualified data columns become `alias.data->>'jsonKey'`.
pub(crate) fn rewrite_join(
    registry: &Registry,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<(String, Vec<SqlValue>)> {
    let aliases = extract_table_aliases(registry, sql)?;

    let mut rewritten = sql.to_owned();
    for ta in &aliases {
        rewritten = replace_word(&rewritten, &ta.info.name, &ta.info.table);
    }

    for ta in &aliases {
        for column in &ta.info.data_columns {
            let qualified = format!("{}.{}", ta.alias, column.column);
            let replacement = format!("{}.data->>'{}'", ta.alias, column.json_key);
            rewritten = replace_word(&rewritten, &qualified, &replacement);
        }
    }

    Ok((rewritten, params))
}

fn extract_table_aliases(registry: &Registry, sql: &str) -> Result<Vec<TableAlias>> {
    let upper = sql.to_ascii_uppercase();
    let from_idx = upper
        .find(" FROM ")
        .ok_or_else(|| Error::InvalidArgument("compat: no FROM clause in join query".into()))?;

    let mut aliases = Vec::new();
    let (table, alias) = extract_table_and_alias(&sql[from_idx + 6..]);
    if let Some(info) = registry.lookup_table(&table) {
        aliases.push(TableAlias { alias, info });
    }

    let mut search_from = from_idx;
    while let Some(join_idx) = upper[search_from..].find(" JOIN ") {
        let after_join = search_from + join_idx + 6;
        let (table, alias) = extract_table_and_alias(&sql[after_join..]);
        if let Some(info) = registry.lookup_table(&table) {
            aliases.push(TableAlias { alias, info });
        }
        search_from = after_join;
    }

    Ok(aliases)
}

/// Parses `"table alias"` or bare `"table"` from the start of a clause.
/// A following SQL keyword means the table has no alias.
fn extract_table_and_alias(s: &str) -> (String, String) {
    const KEYWORDS: &[&str] = &[
        "ON", "WHERE", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "CROSS", "ORDER", "GROUP",
        "LIMIT",
    ];
    let s = s.trim_start();
    let table = crate::compat::matcher::extract_first_word(s);
    let rest = s[s.find(&table).map(|i| i + table.len()).unwrap_or(s.len())..].trim_start();
    if rest.is_empty() {
        return (table.clone(), table);
    }
    let next = crate::compat::matcher::extract_first_word(rest);
    if next.is_empty() || KEYWORDS.contains(&next.to_ascii_uppercase().as_str()) {
        return (table.clone(), table);
    }
    (table, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_info() -> ModelInfo {
        ModelInfo {
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
        }
    }

    fn text(v: &str) -> SqlValue {
        SqlValue::Text(v.to_owned())
    }

    #[test]
    fn insert_packs_data_columns() {
        let (sql, params) = rewrite_insert(
            &users_info(),
            "INSERT INTO users (id, user_name, email) VALUES ($1, $2, $3)",
            vec![text("u1"), text("alice"), text("a@example.com")],
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO whisker_users (id, data, version, created_at, updated_at) \
             VALUES ($1, jsonb_build_object('userName', $2::text, 'email', $3::text), 1, now(), now())"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[0], text("u1"));
    }

    #[test]
    fn insert_recovers_inline_values() {
        let (sql, params) = rewrite_insert(
            &users_info(),
            "INSERT INTO \"users\" (\"id\", \"user_name\") VALUES ('u1', 'al''ice')",
            Vec::new(),
        )
        .unwrap();
        assert!(sql.contains("jsonb_build_object('userName', $2::text)"));
        assert_eq!(params[0], text("u1"));
        assert_eq!(params[1], text("al'ice"));
    }

    #[test]
    fn insert_without_id_fails() {
        let err = rewrite_insert(
            &users_info(),
            "INSERT INTO users (user_name) VALUES ($1)",
            vec![text("alice")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn select_rewrites_table_columns_and_select_list() {
        let (sql, _) = rewrite_select(
            &users_info(),
            "SELECT id, user_name, email FROM users WHERE user_name = $1",
            vec![text("alice")],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT id, data, version FROM whisker_users WHERE data->>'userName' = $1"
        );
    }

    #[test]
    fn update_rebuilds_payload_and_renumbers_where() {
        let (sql, params) = rewrite_update(
            &users_info(),
            "UPDATE users SET user_name = $1, email = $2 WHERE id = $3",
            vec![text("bob"), text("b@example.com"), text("u1")],
        )
        .unwrap();
        assert_eq!(
            sql,
            "UPDATE whisker_users SET data = jsonb_build_object('userName', $1::text, 'email', $2::text), \
             version = version + 1, updated_at = now() WHERE id = $3"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params[2], text("u1"));
    }

    #[test]
    fn update_dropping_non_data_set_column_shifts_where_args() {
        // `version = $2` is not a data column: it is dropped from the SET
        // payload, so the WHERE placeholder moves from $3 to $2.
        let (sql, params) = rewrite_update(
            &users_info(),
            "UPDATE users SET user_name = $1, version = $2 WHERE id = $3",
            vec![text("bob"), text("9"), text("u1")],
        )
        .unwrap();
        assert!(sql.ends_with("WHERE id = $2"));
        assert_eq!(params.len(), 2);
        assert_eq!(params[1], text("u1"));
    }

    #[test]
    fn delete_rewrites_table_and_where() {
        let (sql, _) = rewrite_delete(
            &users_info(),
            "DELETE FROM users WHERE email = $1",
            vec![text("a@example.com")],
        )
        .unwrap();
        assert_eq!(
            sql,
            "DELETE FROM whisker_users WHERE data->>'email' = $1"
        );
    }

    #[test]
    fn create_table_emits_standard_ddl() {
        let sql = rewrite_create_table(&users_info());
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS whisker_users"));
        assert!(sql.contains("data JSONB NOT NULL"));
    }

    #[test]
    fn join_rewrites_aliased_references() {
        let mut registry = Registry::default();
        registry.register(users_info());
        registry.register(ModelInfo {
            name: "orders".to_owned(),
            table: "whisker_orders".to_owned(),
            id_column: "id".to_owned(),
            version_column: "version".to_owned(),
            data_columns: vec![ColumnSpec {
                column: "total".to_owned(),
                json_key: "total".to_owned(),
            }],
        });

        let (sql, _) = rewrite_join(
            &registry,
            "SELECT u.user_name, o.total FROM users u \
             JOIN orders o ON o.id = u.id WHERE o.total = $1",
            vec![text("10")],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT u.data->>'userName', o.data->>'total' FROM whisker_users u \
             JOIN whisker_orders o ON o.id = u.id WHERE o.data->>'total' = $1"
        );
    }

    #[test]
    fn word_replacement_respects_boundaries() {
        assert_eq!(
            replace_word("SELECT user_name FROM user", "user", "whisker_user"),
            "SELECT user_name FROM whisker_user"
        );
    }

    #[test]
    fn inline_value_parsing() {
        let values = extract_inline_values("INSERT INTO t (a, b, c) VALUES ('x', 42, NULL)");
        assert_eq!(
            values,
            vec![text("x"), text("42"), text("NULL")]
        );
    }

    #[test]
    fn inline_values_keep_multibyte_utf8_intact() {
        let values = extract_inline_values(
            "INSERT INTO t (a, b, c) VALUES ('café', '東京', '🦀 l''été')",
        );
        assert_eq!(
            values,
            vec![text("café"), text("東京"), text("🦀 l'été")]
        );
    }
}
