//! Split plans
//!
//! When a plan requests more relations than the configured budget, the
//! relations are partitioned into ordered batches. The first batch runs as
//! the base statement; each later batch is a template completed with the
//! primary keys the base statement returned, and its relation columns are
//! merged into the base rows by primary key.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::compiler::CompiledFragment;
use crate::dialect::{number_placeholders, Dialect};
use crate::plan::CompiledStatement;
use crate::value::{DatabaseValue, ResultRow};

/// Base statement plus id-scoped follow-ups
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    pub base: CompiledStatement,
    pub follow_ups: Vec<FollowUpBatch>,
    /// Output column holding the primary key in every batch
    pub primary_key: String,
}

impl SplitPlan {
    /// Number of statements when every batch runs
    pub fn statement_count(&self) -> usize {
        1 + self.follow_ups.len()
    }
}

/// Statement template for one batch of relations, open at `pk IN (`
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpBatch {
    /// Relation aliases produced by this batch
    pub relations: Vec<String>,
    pub(crate) template: CompiledFragment,
    pub(crate) dialect: Dialect,
}

impl FollowUpBatch {
    pub(crate) fn new(relations: Vec<String>, template: CompiledFragment, dialect: Dialect) -> Self {
        Self {
            relations,
            template,
            dialect,
        }
    }

    /// Complete the template for a set of primary keys
    pub fn bind(&self, ids: &[DatabaseValue]) -> CompiledStatement {
        let mut sql = self.template.sql.clone();
        let mut bindings = self.template.bindings.clone();

        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            bindings.push(id.clone());
        }
        sql.push(')');

        if self.dialect.numbered_placeholders() {
            sql = number_placeholders(&sql);
        }

        CompiledStatement { sql, bindings }
    }
}

/// Merge key of a JSON scalar (None for null keys)
pub fn key_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(if *b { "1".to_string() } else { "0".to_string() }),
        other => Some(other.to_string()),
    }
}

/// Distinct, non-null primary keys of `rows`, in row order
pub fn collect_keys(rows: &[ResultRow], column: &str) -> Vec<DatabaseValue> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter(|value| key_of(value).map_or(false, |key| seen.insert(key)))
        .map(DatabaseValue::from_json)
        .collect()
}

/// Copy `columns` from `batch` rows into `rows`, matched on `primary_key`.
///
/// Batch rows whose key is not already present are ignored.
pub fn merge_by_key(rows: &mut [ResultRow], batch: Vec<ResultRow>, primary_key: &str, columns: &[String]) {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if let Some(key) = row.get(primary_key).and_then(key_of) {
            index.entry(key).or_insert(i);
        }
    }

    for mut incoming in batch {
        let Some(position) = incoming.get(primary_key).and_then(key_of).and_then(|k| index.get(&k).copied()) else {
            continue;
        };
        for column in columns {
            if let Some(value) = incoming.shift_remove(column) {
                rows[position].insert(column.clone(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: i64, extra: &[(&str, JsonValue)]) -> ResultRow {
        let mut row = ResultRow::new();
        row.insert("id".to_string(), json!(id));
        for (key, value) in extra {
            row.insert(key.to_string(), value.clone());
        }
        row
    }

    #[test]
    fn test_bind_appends_ids_and_numbers_for_postgres() {
        let batch = FollowUpBatch::new(
            vec!["tags".to_string()],
            CompiledFragment::new(
                "SELECT \"a\".\"id\", (SELECT x WHERE y = ?) AS \"tags\" FROM \"a\" WHERE \"a\".\"id\" IN (".to_string(),
                vec!["en".into()],
            ),
            Dialect::PostgreSQL,
        );
        let statement = batch.bind(&[1.into(), 2.into()]);
        assert!(statement.sql.ends_with("WHERE y = $1) AS \"tags\" FROM \"a\" WHERE \"a\".\"id\" IN ($2, $3)"));
        assert_eq!(statement.bindings.len(), 3);
        assert_eq!(statement.placeholder_count(), 3);
    }

    #[test]
    fn test_collect_keys_skips_nulls_and_duplicates() {
        let mut rows = vec![row(1, &[]), row(2, &[]), row(1, &[])];
        rows.push(ResultRow::from_iter([("id".to_string(), JsonValue::Null)]));
        assert_eq!(
            collect_keys(&rows, "id"),
            vec![DatabaseValue::Int64(1), DatabaseValue::Int64(2)]
        );
    }

    #[test]
    fn test_merge_ignores_unknown_keys() {
        let mut rows = vec![row(1, &[("author", json!("{}"))]), row(2, &[])];
        let batch = vec![
            row(2, &[("tags", json!("[1]"))]),
            row(1, &[("tags", json!("[]"))]),
            row(99, &[("tags", json!("[5]"))]),
        ];

        merge_by_key(&mut rows, batch, "id", &["tags".to_string()]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["tags"], json!("[]"));
        assert_eq!(rows[0]["author"], json!("{}"));
        assert_eq!(rows[1]["tags"], json!("[1]"));
    }
}
