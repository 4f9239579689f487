//! Query plans and their compiled forms

pub mod assemble;
pub mod split;

pub use assemble::Assembler;
pub use split::{FollowUpBatch, SplitPlan};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decode::{DecodeLayout, OutputFormat};
use crate::compiler::CompiledFragment;
use crate::dialect::{count_placeholders, number_placeholders, Dialect};
use crate::entity::EntityDescriptor;
use crate::filter::{Filter, Operator, OrderBy};
use crate::relations::{AggregateSpec, ColumnSelection, CountSpec, RelationSpec};
use crate::value::DatabaseValue;

/// Join type for base-query joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// `<type> JOIN table ON first <op> second`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub first: String,
    pub operator: Operator,
    pub second: String,
}

/// Free-text search over base and related columns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchSpec {
    pub term: String,
    /// Plain columns or `relation.column`
    pub columns: Vec<String>,
}

impl SearchSpec {
    /// `%term%`
    pub fn pattern(&self) -> String {
        format!("%{}%", self.term)
    }
}

/// Caching directives of one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirective {
    pub enabled: bool,
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl Default for CacheDirective {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            tags: Vec::new(),
        }
    }
}

/// Accumulated builder state of one query
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub entity: Arc<dyn EntityDescriptor>,
    pub columns: ColumnSelection,
    pub relations: Vec<RelationSpec>,
    pub counts: Vec<CountSpec>,
    pub aggregates: Vec<AggregateSpec>,
    pub filter: Filter,
    pub search: Option<SearchSpec>,
    pub joins: Vec<JoinClause>,
    pub order: Vec<OrderBy>,
    pub group_by: Vec<String>,
    pub having: Filter,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Output shape of `fetch` (None = configured default)
    pub format: Option<OutputFormat>,
    pub cache: CacheDirective,
    pub locale: Option<String>,
    /// Override of the configured safe mode
    pub safe_mode: Option<bool>,
    /// Override of the configured split threshold
    pub max_relations_per_query: Option<usize>,
    /// Override of the configured statement timeout
    pub timeout: Option<Duration>,
    /// Include soft-deleted base rows
    pub with_trashed: bool,
}

impl QueryPlan {
    pub fn new(entity: Arc<dyn EntityDescriptor>) -> Self {
        Self {
            entity,
            columns: ColumnSelection::All,
            relations: Vec::new(),
            counts: Vec::new(),
            aggregates: Vec::new(),
            filter: Filter::new(),
            search: None,
            joins: Vec::new(),
            order: Vec::new(),
            group_by: Vec::new(),
            having: Filter::new(),
            limit: None,
            offset: None,
            format: None,
            cache: CacheDirective::default(),
            locale: None,
            safe_mode: None,
            max_relations_per_query: None,
            timeout: None,
            with_trashed: false,
        }
    }

    /// Add a relation; a repeated name replaces the earlier request in place
    pub fn add_relation(&mut self, spec: RelationSpec) {
        match self.relations.iter_mut().find(|r| r.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.relations.push(spec),
        }
    }

    /// Add a count; a repeated alias replaces the earlier one in place
    pub fn add_count(&mut self, spec: CountSpec) {
        let alias = spec.alias();
        match self.counts.iter_mut().find(|c| c.alias() == alias) {
            Some(existing) => *existing = spec,
            None => self.counts.push(spec),
        }
    }

    /// Add an aggregate; a repeated alias replaces the earlier one in place
    pub fn add_aggregate(&mut self, spec: AggregateSpec) {
        let alias = spec.alias();
        match self.aggregates.iter_mut().find(|a| a.alias() == alias) {
            Some(existing) => *existing = spec,
            None => self.aggregates.push(spec),
        }
    }

    /// Relations, counts and aggregates compiled as subqueries
    pub fn subquery_count(&self) -> usize {
        self.relations.len() + self.counts.len() + self.aggregates.len()
    }

    /// Whether `name` is an output alias produced by a subquery
    pub fn is_subquery_alias(&self, name: &str) -> bool {
        self.relations.iter().any(|r| r.alias() == name)
            || self.counts.iter().any(|c| c.alias() == name)
            || self.aggregates.iter().any(|a| a.alias() == name)
    }
}

/// Final SQL text and bindings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledStatement {
    pub sql: String,
    pub bindings: Vec<DatabaseValue>,
}

impl CompiledStatement {
    /// Finish a `?`-placeholder fragment for `dialect`
    pub fn from_fragment(fragment: CompiledFragment, dialect: Dialect) -> Self {
        let sql = if dialect.numbered_placeholders() {
            number_placeholders(&fragment.sql)
        } else {
            fragment.sql
        };
        Self {
            sql,
            bindings: fragment.bindings,
        }
    }

    /// Placeholders in the text (`?` or `$n`)
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.sql)
    }
}

/// One statement, or a base statement with id-scoped follow-ups
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledQuery {
    Single(CompiledStatement),
    Split(SplitPlan),
}

impl CompiledQuery {
    /// The statement executed first
    pub fn base_statement(&self) -> &CompiledStatement {
        match self {
            CompiledQuery::Single(statement) => statement,
            CompiledQuery::Split(split) => &split.base,
        }
    }
}

/// Compiler output for a plan
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub query: CompiledQuery,
    pub layout: DecodeLayout,
    pub subqueries: usize,
}
