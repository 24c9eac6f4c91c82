//! Statement classification for the ORM-compat rewriter.

/// The statement shapes the rewriter understands. Anything else passes
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SqlOp {
    Insert,
    Select,
    SelectJoin,
    Update,
    Delete,
    CreateTable,
}

/// Extracts the primary table name and operation from a statement.
/// Returns `None` for statements the rewriter does not recognize.
pub(crate) fn parse_sql(sql: &str) -> Option<(String, SqlOp)> {
    let trimmed = sql.trim();
    let upper = trimmed.to_ascii_uppercase();

    if let Some(rest) = strip_ci(trimmed, &upper, "INSERT INTO ") {
        return Some((extract_first_word(rest), SqlOp::Insert));
    }
    if upper.starts_with("SELECT ") {
        let from_idx = upper.find(" FROM ")?;
        let table = extract_first_word(&trimmed[from_idx + 6..]);
        if table.is_empty() {
            return None;
        }
        let has_join = upper[from_idx..].contains(" JOIN ");
        let op = if has_join { SqlOp::SelectJoin } else { SqlOp::Select };
        return Some((table, op));
    }
    if let Some(rest) = strip_ci(trimmed, &upper, "UPDATE ") {
        return Some((extract_first_word(rest), SqlOp::Update));
    }
    if let Some(rest) = strip_ci(trimmed, &upper, "DELETE FROM ") {
        return Some((extract_first_word(rest), SqlOp::Delete));
    }
    if let Some(rest) = strip_ci(trimmed, &upper, "CREATE TABLE ") {
        let rest = match strip_ci(rest, &rest.to_ascii_uppercase(), "IF NOT EXISTS ") {
            Some(after) => after,
            None => rest,
        };
        return Some((extract_first_word(rest), SqlOp::CreateTable));
    }
    None
}

/// Case-insensitive prefix strip; `upper` must be the uppercased `s`.
fn strip_ci<'a>(s: &'a str, upper: &str, prefix: &str) -> Option<&'a str> {
    upper.starts_with(prefix).then(|| &s[prefix.len()..])
}

/// Reads a (possibly double-quoted) identifier from the start of `s`.
pub(crate) fn extract_first_word(s: &str) -> String {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return rest[..end].to_owned();
        }
    }
    let end = s
        .find(|c: char| matches!(c, ' ' | '(' | '\t' | '\n' | ',' | ';'))
        .unwrap_or(s.len());
    s[..end].trim_matches('"').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_basic_statements() {
        assert_eq!(
            parse_sql("INSERT INTO users (id, name) VALUES ($1, $2)"),
            Some(("users".to_owned(), SqlOp::Insert))
        );
        assert_eq!(
            parse_sql("SELECT id, name FROM users WHERE id = $1"),
            Some(("users".to_owned(), SqlOp::Select))
        );
        assert_eq!(
            parse_sql("UPDATE users SET name = $1 WHERE id = $2"),
            Some(("users".to_owned(), SqlOp::Update))
        );
        assert_eq!(
            parse_sql("DELETE FROM users WHERE id = $1"),
            Some(("users".to_owned(), SqlOp::Delete))
        );
        assert_eq!(
            parse_sql("CREATE TABLE users (id BIGSERIAL PRIMARY KEY)"),
            Some(("users".to_owned(), SqlOp::CreateTable))
        );
        assert_eq!(
            parse_sql("CREATE TABLE IF NOT EXISTS users (id TEXT)"),
            Some(("users".to_owned(), SqlOp::CreateTable))
        );
    }

    #[test]
    fn detects_joins() {
        assert_eq!(
            parse_sql(
                "SELECT u.name, o.total FROM users u JOIN orders o ON o.user_id = u.id"
            ),
            Some(("users".to_owned(), SqlOp::SelectJoin))
        );
    }

    #[test]
    fn handles_quoted_identifiers() {
        assert_eq!(
            parse_sql("INSERT INTO \"users\" (\"id\") VALUES ($1)"),
            Some(("users".to_owned(), SqlOp::Insert))
        );
    }

    #[test]
    fn unrecognized_statements_pass() {
        assert_eq!(parse_sql("TRUNCATE users"), None);
        assert_eq!(parse_sql("BEGIN"), None);
        assert_eq!(parse_sql("SELECT 1"), None);
    }
}
