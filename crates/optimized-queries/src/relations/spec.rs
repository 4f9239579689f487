//! Relation, count and aggregate requests

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CompileError;
use crate::filter::Filter;

/// How a relation's rows are folded into a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// belongs-to / has-one: one object
    Single,
    /// has-many / has-many-through / morph-many: a list
    Collection,
    /// Pivot-backed list
    ManyToMany,
    /// morph-one: one object matched on the morph type
    Polymorphic,
    /// Dotted path; the first segment is joined
    Nested,
}

impl RelationKind {
    /// Whether the decoded value is a list
    pub fn is_many(self) -> bool {
        matches!(self, RelationKind::Collection | RelationKind::ManyToMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::Single => "single",
            RelationKind::Collection => "collection",
            RelationKind::ManyToMany => "many_to_many",
            RelationKind::Polymorphic => "polymorphic",
            RelationKind::Nested => "nested",
        };
        f.write_str(name)
    }
}

/// Requested columns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnSelection {
    /// `*`: introspect the entity
    All,
    Columns(Vec<String>),
}

impl ColumnSelection {
    /// An empty list or one containing `*` selects everything
    pub fn from_list<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() || columns.iter().any(|c| c == "*") {
            ColumnSelection::All
        } else {
            ColumnSelection::Columns(columns)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ColumnSelection::All)
    }
}

impl Default for ColumnSelection {
    fn default() -> Self {
        ColumnSelection::All
    }
}

/// An eager-loaded relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Relation name on the owning entity; also the output alias
    pub name: String,
    pub kind: RelationKind,
    pub columns: ColumnSelection,
    pub filter: Option<Filter>,
    /// Full dotted path for nested requests
    pub nested_path: Option<String>,
}

impl RelationSpec {
    /// Build a spec from a relation name or dotted path
    pub fn new(path: &str, kind: RelationKind) -> Self {
        let (name, nested_path) = match path.split_once('.') {
            Some((first, _)) => (first.to_string(), Some(path.to_string())),
            None => (path.to_string(), None),
        };

        Self {
            name,
            kind,
            columns: ColumnSelection::All,
            filter: None,
            nested_path,
        }
    }

    pub fn with_columns(mut self, columns: ColumnSelection) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Output column alias
    pub fn alias(&self) -> &str {
        &self.name
    }

    pub fn is_nested(&self) -> bool {
        self.nested_path.is_some()
    }

    /// Segments after the first hop of a nested path.
    ///
    /// Only the first hop is joined, so the next segment names the column
    /// projected from the related entity and anything deeper is ignored.
    pub fn nested_segments(&self) -> Result<Vec<&str>, CompileError> {
        let Some(path) = self.nested_path.as_deref() else {
            return Ok(Vec::new());
        };

        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() < 2 || segments.iter().any(|s| s.trim().is_empty()) {
            return Err(CompileError::MalformedNestedPath(path.to_string()));
        }

        Ok(segments[1..].to_vec())
    }
}

/// A correlated `COUNT(*)` over a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSpec {
    pub relation: String,
    pub filter: Option<Filter>,
    pub alias: Option<String>,
}

impl CountSpec {
    pub fn new(relation: &str) -> Self {
        Self {
            relation: relation.to_string(),
            filter: None,
            alias: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// `<relation>_count` unless overridden
    pub fn alias(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_count", self.relation))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    /// Whether the result is NUMERIC for integer input on PostgreSQL
    pub fn is_numeric(&self) -> bool {
        matches!(self, AggregateFunction::Sum | AggregateFunction::Avg)
    }
}

/// A correlated scalar aggregate over one column of a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub relation: String,
    pub column: String,
    pub function: AggregateFunction,
    pub filter: Option<Filter>,
}

impl AggregateSpec {
    pub fn new(relation: &str, column: &str, function: AggregateFunction) -> Self {
        Self {
            relation: relation.to_string(),
            column: column.to_string(),
            function,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// `<func>_<relation>_<column>`
    pub fn alias(&self) -> String {
        format!("{}_{}_{}", self.function.name(), self.relation, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_spec_uses_first_segment_as_name() {
        let spec = RelationSpec::new("author.name", RelationKind::Nested);
        assert_eq!(spec.name, "author");
        assert_eq!(spec.alias(), "author");
        assert_eq!(spec.nested_segments().unwrap(), vec!["name"]);

        let deep = RelationSpec::new("author.profile.bio", RelationKind::Nested);
        assert_eq!(deep.nested_segments().unwrap(), vec!["profile", "bio"]);
    }

    #[test]
    fn test_malformed_nested_paths() {
        for path in ["author.", "author..name", ".name"] {
            let spec = RelationSpec::new(path, RelationKind::Nested);
            assert_eq!(
                spec.nested_segments().unwrap_err(),
                CompileError::MalformedNestedPath(path.to_string())
            );
        }
    }

    #[test]
    fn test_aliases() {
        assert_eq!(CountSpec::new("comments").alias(), "comments_count");
        assert_eq!(CountSpec::new("comments").with_alias("approved").alias(), "approved");
        assert_eq!(
            AggregateSpec::new("comments", "votes", AggregateFunction::Sum).alias(),
            "sum_comments_votes"
        );
    }

    #[test]
    fn test_column_selection() {
        assert_eq!(ColumnSelection::from_list(Vec::<String>::new()), ColumnSelection::All);
        assert_eq!(ColumnSelection::from_list(["id", "*"]), ColumnSelection::All);
        assert_eq!(
            ColumnSelection::from_list(["id", "name"]),
            ColumnSelection::Columns(vec!["id".to_string(), "name".to_string()])
        );
    }
}
