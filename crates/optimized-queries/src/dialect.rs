//! SQL dialect adapter
//!
//! Per-driver facts needed to render JSON-aggregating subqueries: the JSON
//! object constructor, array aggregation (or its string-concatenation
//! fallback), identifier quoting, placeholder style and the session
//! statement-timeout pragma.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server version used for feature gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse strings such as `8.0.34`, `5.7.21-log` or `10.6.12-MariaDB`
    pub fn parse(version: &str) -> Option<Self> {
        let numeric: String = version
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self { major, minor, patch })
    }
}

/// SQL dialect of the connected database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    PostgreSQL,
    SQLite,
    /// MySQL; `version` gates `JSON_ARRAYAGG` (None = assume modern server)
    MySQL { version: Option<ServerVersion> },
    /// MariaDB; `version` gates `JSON_ARRAYAGG`
    MariaDB { version: Option<ServerVersion> },
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::PostgreSQL => write!(f, "postgresql"),
            Dialect::SQLite => write!(f, "sqlite"),
            Dialect::MySQL { .. } => write!(f, "mysql"),
            Dialect::MariaDB { .. } => write!(f, "mariadb"),
        }
    }
}

impl Dialect {
    /// Whether placeholders are numbered (`$1`, `$2`, ...)
    pub fn numbered_placeholders(&self) -> bool {
        matches!(self, Dialect::PostgreSQL)
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            Dialect::PostgreSQL | Dialect::SQLite => '"',
            Dialect::MySQL { .. } | Dialect::MariaDB { .. } => '`',
        }
    }

    /// Quote an identifier, doubling any embedded quote character
    pub fn quote(&self, identifier: &str) -> String {
        let q = self.identifier_quote();
        let mut out = String::with_capacity(identifier.len() + 2);
        out.push(q);
        for c in identifier.chars() {
            if c == q {
                out.push(q);
            }
            out.push(c);
        }
        out.push(q);
        out
    }

    /// Quote `table.column`
    pub fn qualified(&self, table: &str, column: &str) -> String {
        format!("{}.{}", self.quote(table), self.quote(column))
    }

    /// Name of the JSON object constructor
    pub fn json_object_fn(&self) -> &'static str {
        match self {
            Dialect::PostgreSQL => "json_build_object",
            Dialect::SQLite => "json_object",
            Dialect::MySQL { .. } | Dialect::MariaDB { .. } => "JSON_OBJECT",
        }
    }

    /// Whether the server has a native JSON array aggregate
    pub fn supports_json_arrayagg(&self) -> bool {
        match self {
            Dialect::PostgreSQL | Dialect::SQLite => true,
            Dialect::MySQL { version } => {
                version.map_or(true, |v| v >= ServerVersion::new(5, 7, 22))
            }
            Dialect::MariaDB { version } => {
                version.map_or(true, |v| v >= ServerVersion::new(10, 5, 0))
            }
        }
    }

    /// Wrap a per-row JSON expression in an array aggregate that yields `[]`
    /// (never NULL) when no rows match.
    ///
    /// `order_by` is only honoured where the aggregate accepts an ordering
    /// clause; see [`Dialect::supports_ordered_aggregate`].
    pub fn json_array_agg(&self, row_json: &str, order_by: Option<&str>) -> String {
        let order = order_by
            .filter(|o| !o.is_empty() && self.supports_ordered_aggregate())
            .map(|o| format!(" ORDER BY {}", o))
            .unwrap_or_default();

        match self {
            Dialect::PostgreSQL => format!("COALESCE(json_agg({}{}), '[]'::json)", row_json, order),
            Dialect::SQLite => format!("COALESCE(json_group_array({}), '[]')", row_json),
            Dialect::MySQL { .. } | Dialect::MariaDB { .. } => {
                if self.supports_json_arrayagg() {
                    format!("COALESCE(JSON_ARRAYAGG({}), JSON_ARRAY())", row_json)
                } else {
                    format!(
                        "COALESCE(CONCAT('[', GROUP_CONCAT({}{} SEPARATOR ','), ']'), '[]')",
                        row_json, order
                    )
                }
            }
        }
    }

    /// Whether the array aggregate accepts `ORDER BY` inside the call
    pub fn supports_ordered_aggregate(&self) -> bool {
        match self {
            Dialect::PostgreSQL => true,
            Dialect::SQLite => false,
            Dialect::MySQL { .. } | Dialect::MariaDB { .. } => !self.supports_json_arrayagg(),
        }
    }

    /// Suffix that turns a JSON expression into text for the driver
    pub fn json_text_cast(&self) -> &'static str {
        match self {
            Dialect::PostgreSQL => "::text",
            _ => "",
        }
    }

    /// Suffix for SUM/AVG results, which PostgreSQL returns as NUMERIC
    pub fn numeric_result_cast(&self) -> &'static str {
        match self {
            Dialect::PostgreSQL => "::float8",
            _ => "",
        }
    }

    /// Session-level statement timeout pragma, if the dialect has one
    pub fn statement_timeout_sql(&self, timeout: Duration) -> Option<String> {
        let millis = timeout.as_millis().max(1);
        match self {
            Dialect::PostgreSQL => Some(format!("SET statement_timeout = {}", millis)),
            Dialect::MySQL { .. } => Some(format!("SET SESSION MAX_EXECUTION_TIME = {}", millis)),
            Dialect::MariaDB { .. } => Some(format!(
                "SET SESSION max_statement_time = {}",
                timeout.as_secs_f64().max(0.001)
            )),
            Dialect::SQLite => None,
        }
    }

    /// Case-insensitive pattern operator used by search
    pub fn like_operator(&self) -> &'static str {
        match self {
            Dialect::PostgreSQL => "ILIKE",
            _ => "LIKE",
        }
    }

    /// ` LIMIT n OFFSET m`; an offset alone still needs a LIMIT outside PostgreSQL
    pub fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (None, Some(offset)) => match self {
                Dialect::PostgreSQL => format!(" OFFSET {}", offset),
                Dialect::SQLite => format!(" LIMIT -1 OFFSET {}", offset),
                Dialect::MySQL { .. } | Dialect::MariaDB { .. } => {
                    format!(" LIMIT {} OFFSET {}", u64::MAX, offset)
                }
            },
        }
    }
}

/// Rewrite `?` placeholders into numbered `$n` placeholders, skipping
/// anything inside single-quoted literals or quoted identifiers.
pub fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut index = 0usize;
    let mut in_literal = false;
    let mut in_identifier = false;

    for c in sql.chars() {
        match c {
            '\'' if !in_identifier => {
                in_literal = !in_literal;
                out.push(c);
            }
            '"' if !in_literal => {
                in_identifier = !in_identifier;
                out.push(c);
            }
            '?' if !in_literal && !in_identifier => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }

    out
}

/// Count `?` and `$n` placeholders outside literals and quoted identifiers
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0usize;
    let mut in_literal = false;
    let mut in_identifier = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_identifier => in_literal = !in_literal,
            '"' | '`' if !in_literal => in_identifier = !in_identifier,
            '?' if !in_literal && !in_identifier => count += 1,
            '$' if !in_literal && !in_identifier => {
                if chars.peek().map_or(false, |next| next.is_ascii_digit()) {
                    count += 1;
                }
            }
            _ => {}
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(Dialect::SQLite.quote("users"), "\"users\"");
        assert_eq!(Dialect::PostgreSQL.quote("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySQL { version: None }.quote("users"), "`users`");
        assert_eq!(Dialect::SQLite.qualified("users", "id"), "\"users\".\"id\"");
    }

    #[test]
    fn test_json_arrayagg_version_gating() {
        let old = Dialect::MySQL { version: ServerVersion::parse("5.7.21-log") };
        let new = Dialect::MySQL { version: ServerVersion::parse("8.0.34") };
        assert!(!old.supports_json_arrayagg());
        assert!(new.supports_json_arrayagg());
        assert!(Dialect::MySQL { version: None }.supports_json_arrayagg());
        assert!(!Dialect::MariaDB { version: ServerVersion::parse("10.4.2-MariaDB") }
            .supports_json_arrayagg());
    }

    #[test]
    fn test_concat_fallback_defaults_to_empty_array() {
        let old = Dialect::MySQL { version: Some(ServerVersion::new(5, 6, 0)) };
        let sql = old.json_array_agg("JSON_OBJECT('id', t.id)", None);
        assert_eq!(
            sql,
            "COALESCE(CONCAT('[', GROUP_CONCAT(JSON_OBJECT('id', t.id) SEPARATOR ','), ']'), '[]')"
        );
    }

    #[test]
    fn test_postgres_ordered_aggregate() {
        let sql = Dialect::PostgreSQL.json_array_agg("x", Some("\"c\".\"id\" DESC"));
        assert_eq!(sql, "COALESCE(json_agg(x ORDER BY \"c\".\"id\" DESC), '[]'::json)");
        let sql = Dialect::SQLite.json_array_agg("x", Some("\"c\".\"id\" DESC"));
        assert_eq!(sql, "COALESCE(json_group_array(x), '[]')");
    }

    #[test]
    fn test_statement_timeout_sql() {
        let timeout = Duration::from_millis(2500);
        assert_eq!(
            Dialect::PostgreSQL.statement_timeout_sql(timeout).as_deref(),
            Some("SET statement_timeout = 2500")
        );
        assert_eq!(
            Dialect::MySQL { version: None }.statement_timeout_sql(timeout).as_deref(),
            Some("SET SESSION MAX_EXECUTION_TIME = 2500")
        );
        assert_eq!(Dialect::SQLite.statement_timeout_sql(timeout), None);
    }

    #[test]
    fn test_number_placeholders_skips_literals() {
        let sql = "SELECT '?' AS q, \"a?\" FROM t WHERE a = ? AND b IN (?, ?)";
        assert_eq!(
            number_placeholders(sql),
            "SELECT '?' AS q, \"a?\" FROM t WHERE a = $1 AND b IN ($2, $3)"
        );
        assert_eq!(count_placeholders(sql), 3);
        assert_eq!(count_placeholders(&number_placeholders(sql)), 3);
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(Dialect::SQLite.limit_offset(Some(10), None), " LIMIT 10");
        assert_eq!(Dialect::SQLite.limit_offset(Some(10), Some(20)), " LIMIT 10 OFFSET 20");
        assert_eq!(Dialect::SQLite.limit_offset(None, Some(5)), " LIMIT -1 OFFSET 5");
        assert_eq!(Dialect::PostgreSQL.limit_offset(None, Some(5)), " OFFSET 5");
        assert_eq!(Dialect::PostgreSQL.limit_offset(None, None), "");
    }

    #[test]
    fn test_server_version_parse() {
        assert_eq!(ServerVersion::parse("8.0.34"), Some(ServerVersion::new(8, 0, 34)));
        assert_eq!(ServerVersion::parse("10.6"), Some(ServerVersion::new(10, 6, 0)));
        assert_eq!(ServerVersion::parse("abc"), None);
    }
}
