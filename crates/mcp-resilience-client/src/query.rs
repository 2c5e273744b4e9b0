//! SQL statement classification and pre-flight validation.
//!
//! Checks are shallow: a statement must start with a known keyword, carry
//! the clause its kind needs and contain none of the chained-statement or
//! comment patterns used to smuggle a second statement past the server.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use thiserror::Error;

const DANGEROUS_PATTERNS: &[&str] = &[
    r";\s*DROP\s+TABLE",
    r";\s*DELETE\s+FROM",
    r";\s*UPDATE\s+.*\s*SET",
    r";\s*INSERT\s+INTO",
    r"--",
    r"/\*.*\*/",
];

static VALIDATOR: LazyLock<Validator> = LazyLock::new(Validator::new);

/// Kind of SQL statement, from its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// `CREATE TABLE`.
    Create,
    Alter,
    Drop,
    Unknown,
}

impl QueryType {
    /// Classify `sql` by its leading keyword.
    #[must_use]
    pub fn of(sql: &str) -> Self {
        let sql = sql.trim().to_uppercase();
        [
            ("SELECT", Self::Select),
            ("INSERT", Self::Insert),
            ("UPDATE", Self::Update),
            ("DELETE", Self::Delete),
            ("CREATE TABLE", Self::Create),
            ("ALTER", Self::Alter),
            ("DROP", Self::Drop),
        ]
        .into_iter()
        .find_map(|(keyword, kind)| sql.starts_with(keyword).then_some(kind))
        .unwrap_or(Self::Unknown)
    }

    /// Whether the statement modifies rows.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Reason a statement was rejected before reaching the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Query cannot be empty")]
    Empty,
    #[error("Query contains potentially dangerous pattern: {0}")]
    Dangerous(&'static str),
    #[error("{0}")]
    MissingClause(&'static str),
    #[error("Unsupported query type: {0}")]
    Unsupported(QueryType),
    #[error("Expected a {expected} statement, got {found}")]
    WrongKind { expected: &'static str, found: QueryType },
}

struct Validator {
    dangerous: Vec<(&'static str, Regex)>,
    clauses: Vec<(QueryType, Regex, &'static str)>,
}

impl Validator {
    fn new() -> Self {
        let dangerous = DANGEROUS_PATTERNS
            .iter()
            .filter_map(|pattern| {
                Regex::new(&format!("(?i){pattern}"))
                    .ok()
                    .map(|regex| (*pattern, regex))
            })
            .collect();

        let clauses = [
            (QueryType::Select, r"FROM\s+\w+", "SELECT query must include FROM clause"),
            (QueryType::Insert, r"INTO\s+\w+", "INSERT query must include INTO clause"),
            (QueryType::Update, r"SET\s+\w+\s*=", "UPDATE query must include SET clause"),
            (QueryType::Delete, r"FROM\s+\w+", "DELETE query must include FROM clause"),
            (
                QueryType::Create,
                r"TABLE\s+\w+\s*\(",
                "CREATE TABLE query must include table name and column definitions",
            ),
        ]
        .into_iter()
        .filter_map(|(kind, pattern, message)| {
            Regex::new(&format!("(?i){pattern}"))
                .ok()
                .map(|regex| (kind, regex, message))
        })
        .collect();

        Self { dangerous, clauses }
    }

    fn validate(&self, sql: &str) -> Result<QueryType, QueryError> {
        if sql.trim().is_empty() {
            return Err(QueryError::Empty);
        }
        if let Some((pattern, _)) = self.dangerous.iter().find(|(_, re)| re.is_match(sql)) {
            return Err(QueryError::Dangerous(*pattern));
        }

        let kind = QueryType::of(sql);
        let Some((_, clause, message)) = self.clauses.iter().find(|(k, _, _)| *k == kind) else {
            return Err(QueryError::Unsupported(kind));
        };
        if clause.is_match(sql) {
            Ok(kind)
        } else {
            Err(QueryError::MissingClause(*message))
        }
    }
}

/// Check `sql` for basic shape and injection patterns.
///
/// Only `SELECT`, `INSERT`, `UPDATE`, `DELETE` and `CREATE TABLE` pass.
///
/// # Errors
/// Returns the first [`QueryError`] found.
pub fn validate_query(sql: &str) -> Result<QueryType, QueryError> {
    VALIDATOR.validate(sql)
}

/// Validate `sql` and require its kind to satisfy `accept`.
pub(crate) fn expect_kind(
    sql: &str,
    expected: &'static str,
    accept: impl Fn(QueryType) -> bool,
) -> Result<QueryType, QueryError> {
    let kind = validate_query(sql)?;
    if accept(kind) {
        Ok(kind)
    } else {
        Err(QueryError::WrongKind {
            expected,
            found: kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_valid_queries() {
        let select = "SELECT * FROM users";
        assert_eq!(assert_ok!(validate_query(select)), QueryType::Select);
        assert_eq!(QueryType::of(select), QueryType::Select);

        let insert = "INSERT INTO users (name, email) VALUES ('Test', 'test@example.com')";
        assert_eq!(assert_ok!(validate_query(insert)), QueryType::Insert);

        assert_ok!(validate_query("update users set name = 'x' where id = 1"));
        assert_ok!(validate_query("DELETE FROM users WHERE id = 2"));
        assert_ok!(validate_query("CREATE TABLE t (id INTEGER)"));
    }

    #[test]
    fn test_invalid_queries() {
        assert_eq!(assert_err!(validate_query("   ")), QueryError::Empty);
        assert_eq!(
            assert_err!(validate_query("SELECT * FROM")),
            QueryError::MissingClause("SELECT query must include FROM clause")
        );
        assert_eq!(
            assert_err!(validate_query("SELECT * FROM users; DROP TABLE users")),
            QueryError::Dangerous(r";\s*DROP\s+TABLE")
        );
        assert_eq!(
            assert_err!(validate_query("SELECT * FROM users -- all of them")),
            QueryError::Dangerous("--")
        );
        assert_eq!(
            assert_err!(validate_query("CREATE TABLE t")),
            QueryError::MissingClause(
                "CREATE TABLE query must include table name and column definitions"
            )
        );
        assert_eq!(
            assert_err!(validate_query("DROP TABLE users")),
            QueryError::Unsupported(QueryType::Drop)
        );
    }

    #[test]
    fn test_query_type() {
        assert_eq!(QueryType::of("  select 1"), QueryType::Select);
        assert_eq!(QueryType::of("CREATE INDEX i ON t (a)"), QueryType::Unknown);
        assert_eq!(QueryType::of("ALTER TABLE t ADD c"), QueryType::Alter);
        assert_eq!(QueryType::of("PRAGMA table_info(t)"), QueryType::Unknown);
        assert_eq!(QueryType::Create.to_string(), "CREATE");
        assert!(QueryType::Delete.is_write());
        assert!(!QueryType::Select.is_write());
    }

    #[test]
    fn test_expect_kind() {
        assert_ok!(expect_kind("SELECT * FROM t", "SELECT", |k| k == QueryType::Select));
        assert_eq!(
            assert_err!(expect_kind("DELETE FROM t", "SELECT", |k| k == QueryType::Select)),
            QueryError::WrongKind {
                expected: "SELECT",
                found: QueryType::Delete
            }
        );
    }
}
