//! SQL text buffer with positional bindings
//!
//! Text and bound values are appended together, so the binding list always
//! follows the textual order of the `?` placeholders written so far.

use serde::{Deserialize, Serialize};

use crate::dialect::{count_placeholders, Dialect};
use crate::error::CompileError;
use crate::security::validate_identifier;
use crate::value::DatabaseValue;

/// SQL text plus the values bound to its placeholders, in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledFragment {
    pub sql: String,
    pub bindings: Vec<DatabaseValue>,
}

impl CompiledFragment {
    pub fn new(sql: String, bindings: Vec<DatabaseValue>) -> Self {
        Self { sql, bindings }
    }

    /// Number of `?` placeholders in the text
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.sql)
    }
}

#[derive(Debug, Clone)]
pub struct SqlBuffer {
    dialect: Dialect,
    sql: String,
    bindings: Vec<DatabaseValue>,
}

impl SqlBuffer {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(256),
            bindings: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder and its value
    pub fn push_bind(&mut self, value: DatabaseValue) -> &mut Self {
        self.sql.push('?');
        self.bindings.push(value);
        self
    }

    /// Append `?, ?, ...` for every value
    pub fn push_bind_list<I>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = DatabaseValue>,
    {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_bind(value);
        }
        self
    }

    /// Append a validated, quoted identifier
    pub fn push_identifier(&mut self, identifier: &str) -> Result<&mut Self, CompileError> {
        validate_identifier(identifier)?;
        let quoted = self.dialect.quote(identifier);
        self.sql.push_str(&quoted);
        Ok(self)
    }

    /// Append `"table"."column"`
    pub fn push_qualified(&mut self, table: &str, column: &str) -> Result<&mut Self, CompileError> {
        self.push_identifier(table)?;
        self.sql.push('.');
        self.push_identifier(column)
    }

    /// Append a column reference. `table.column` is taken as already
    /// qualified; a bare column gets `qualifier` when one is given.
    pub fn push_column(&mut self, qualifier: Option<&str>, column: &str) -> Result<&mut Self, CompileError> {
        match (column.split_once('.'), qualifier) {
            (Some((table, column)), _) => self.push_qualified(table, column),
            (None, Some(table)) => self.push_qualified(table, column),
            (None, None) => self.push_identifier(column),
        }
    }

    /// Append a fragment's text and bindings
    pub fn push_fragment(&mut self, fragment: &CompiledFragment) -> &mut Self {
        self.sql.push_str(&fragment.sql);
        self.bindings.extend(fragment.bindings.iter().cloned());
        self
    }

    /// Append raw SQL carrying its own placeholders
    pub fn push_raw(&mut self, sql: &str, bindings: &[DatabaseValue]) -> Result<&mut Self, CompileError> {
        let expected = count_placeholders(sql);
        if expected != bindings.len() {
            return Err(CompileError::BindingMismatch {
                expected,
                actual: bindings.len(),
            });
        }
        self.sql.push_str(sql);
        self.bindings.extend(bindings.iter().cloned());
        Ok(self)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[DatabaseValue] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    pub fn into_fragment(self) -> CompiledFragment {
        CompiledFragment {
            sql: self.sql,
            bindings: self.bindings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_follow_text_order() {
        let mut buf = SqlBuffer::new(Dialect::SQLite);
        buf.push("SELECT * FROM ").push_identifier("users").unwrap();
        buf.push(" WHERE ").push_qualified("users", "id").unwrap();
        buf.push(" IN (").push_bind_list(vec![1.into(), 2.into()]).push(")");
        buf.push(" AND ").push_column(Some("users"), "name").unwrap();
        buf.push(" = ").push_bind("John".into());

        let fragment = buf.into_fragment();
        assert_eq!(
            fragment.sql,
            "SELECT * FROM \"users\" WHERE \"users\".\"id\" IN (?, ?) AND \"users\".\"name\" = ?"
        );
        assert_eq!(
            fragment.bindings,
            vec![DatabaseValue::Int32(1), DatabaseValue::Int32(2), DatabaseValue::from("John")]
        );
        assert_eq!(fragment.placeholder_count(), fragment.bindings.len());
    }

    #[test]
    fn test_push_column_respects_existing_qualifier() {
        let mut buf = SqlBuffer::new(Dialect::PostgreSQL);
        buf.push_column(Some("articles"), "users.name").unwrap();
        assert_eq!(buf.sql(), "\"users\".\"name\"");
    }

    #[test]
    fn test_invalid_identifiers_are_rejected() {
        let mut buf = SqlBuffer::new(Dialect::SQLite);
        assert!(buf.push_identifier("name; DROP TABLE users").is_err());
        assert!(buf.push_column(None, "a.b.c").is_err());
    }

    #[test]
    fn test_push_raw_checks_binding_count() {
        let mut buf = SqlBuffer::new(Dialect::SQLite);
        assert!(buf.push_raw("votes > ?", &[]).is_err());
        assert!(buf.push_raw("votes > ?", &[5.into()]).is_ok());
        assert_eq!(buf.bindings().len(), 1);
    }
}
