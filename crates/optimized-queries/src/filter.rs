//! Predicate builder
//!
//! A [`Filter`] is a plain value describing WHERE conditions (and, for
//! collection relations, ordering and a row cap). The compiler walks it
//! directly; nothing is executed to discover what it contains.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::compiler::SqlBuffer;
use crate::error::CompileError;
use crate::value::DatabaseValue;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Boolean connective joining a clause to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn as_sql(&self) -> &'static str {
        match self {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn new(column: &str, direction: OrderDirection) -> Self {
        Self {
            column: column.to_string(),
            direction,
        }
    }
}

/// A single predicate node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Compare {
        column: String,
        operator: Operator,
        value: DatabaseValue,
    },
    /// `column <op> other_column`
    Columns {
        left: String,
        operator: Operator,
        right: String,
    },
    In {
        column: String,
        values: Vec<DatabaseValue>,
        negated: bool,
    },
    Null {
        column: String,
        negated: bool,
    },
    Between {
        column: String,
        low: DatabaseValue,
        high: DatabaseValue,
    },
    /// Parenthesised sub-expression
    Group(Vec<Clause>),
    /// Raw SQL with its own `?` placeholders
    Raw {
        sql: String,
        bindings: Vec<DatabaseValue>,
    },
}

/// A condition and the connective joining it to the previous one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub conjunction: Conjunction,
    pub condition: Condition,
}

/// Predicate tree plus optional ordering and row cap
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    clauses: Vec<Clause>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    fn and(mut self, condition: Condition) -> Self {
        self.clauses.push(Clause {
            conjunction: Conjunction::And,
            condition,
        });
        self
    }

    fn or(mut self, condition: Condition) -> Self {
        self.clauses.push(Clause {
            conjunction: Conjunction::Or,
            condition,
        });
        self
    }

    /// Add `column = value`
    pub fn where_eq<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::Equal, value)
    }

    /// Add `column != value`
    pub fn where_not<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.where_op(column, Operator::NotEqual, value)
    }

    pub fn where_op<V: Into<DatabaseValue>>(self, column: &str, operator: Operator, value: V) -> Self {
        self.and(Condition::Compare {
            column: column.to_string(),
            operator,
            value: value.into(),
        })
    }

    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.where_op(column, Operator::Like, pattern)
    }

    pub fn where_column(self, left: &str, operator: Operator, right: &str) -> Self {
        self.and(Condition::Columns {
            left: left.to_string(),
            operator,
            right: right.to_string(),
        })
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.and(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        })
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.and(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        })
    }

    pub fn where_null(self, column: &str) -> Self {
        self.and(Condition::Null {
            column: column.to_string(),
            negated: false,
        })
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.and(Condition::Null {
            column: column.to_string(),
            negated: true,
        })
    }

    pub fn where_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.and(Condition::Between {
            column: column.to_string(),
            low: low.into(),
            high: high.into(),
        })
    }

    /// Add a parenthesised group built by `build`
    pub fn where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        let group = build(Filter::new());
        if group.clauses.is_empty() {
            return self;
        }
        self.and(Condition::Group(group.clauses))
    }

    pub fn where_raw(self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.and(Condition::Raw {
            sql: sql.to_string(),
            bindings,
        })
    }

    pub fn or_where_eq<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.or_where_op(column, Operator::Equal, value)
    }

    pub fn or_where_op<V: Into<DatabaseValue>>(self, column: &str, operator: Operator, value: V) -> Self {
        self.or(Condition::Compare {
            column: column.to_string(),
            operator,
            value: value.into(),
        })
    }

    pub fn or_where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.or(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        })
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.or(Condition::Null {
            column: column.to_string(),
            negated: false,
        })
    }

    pub fn or_where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        let group = build(Filter::new());
        if group.clauses.is_empty() {
            return self;
        }
        self.or(Condition::Group(group.clauses))
    }

    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order.push(OrderBy::new(column, direction));
        self
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Desc)
    }

    /// Cap the number of related rows (collections only)
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Append every clause of `other`, joined with AND
    pub fn merge(mut self, other: Filter) -> Self {
        if other.clauses.is_empty() {
            self.order.extend(other.order);
            self.limit = other.limit.or(self.limit);
            return self;
        }
        if self.clauses.is_empty() {
            self.clauses = other.clauses;
        } else {
            self.clauses.push(Clause {
                conjunction: Conjunction::And,
                condition: Condition::Group(other.clauses),
            });
        }
        self.order.extend(other.order);
        self.limit = other.limit.or(self.limit);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn has_conditions(&self) -> bool {
        !self.clauses.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.order.is_empty() && self.limit.is_none()
    }

    /// Write the conditions (without a leading WHERE/AND)
    pub fn write_conditions<'q>(
        &self,
        buf: &mut SqlBuffer,
        qualifier: impl Into<Qualifier<'q>>,
    ) -> Result<(), CompileError> {
        write_clauses(buf, &self.clauses, qualifier.into())
    }

    /// Write the ORDER BY terms (without the keyword)
    pub fn write_order<'q>(&self, buf: &mut SqlBuffer, qualifier: impl Into<Qualifier<'q>>) -> Result<(), CompileError> {
        write_order_terms(buf, &self.order, qualifier)
    }
}

/// Table prefix for bare column names; localized columns can be routed to
/// the translation join instead
#[derive(Debug, Clone, Copy, Default)]
pub struct Qualifier<'q> {
    table: Option<&'q str>,
    localized: Option<(&'q str, &'q [String])>,
}

impl<'q> Qualifier<'q> {
    pub fn table(table: &'q str) -> Self {
        Self {
            table: Some(table),
            localized: None,
        }
    }

    /// Qualify `fields` with `alias` rather than the table
    pub fn localized(mut self, alias: &'q str, fields: &'q [String]) -> Self {
        if !fields.is_empty() {
            self.localized = Some((alias, fields));
        }
        self
    }

    pub fn for_column(&self, column: &str) -> Option<&'q str> {
        match self.localized {
            Some((alias, fields)) if fields.iter().any(|f| f == column) => Some(alias),
            _ => self.table,
        }
    }
}

impl<'q> From<Option<&'q str>> for Qualifier<'q> {
    fn from(table: Option<&'q str>) -> Self {
        Self { table, localized: None }
    }
}

impl<'q> From<&'q str> for Qualifier<'q> {
    fn from(table: &'q str) -> Self {
        Self::table(table)
    }
}

pub(crate) fn write_order_terms<'q>(
    buf: &mut SqlBuffer,
    order: &[OrderBy],
    qualifier: impl Into<Qualifier<'q>>,
) -> Result<(), CompileError> {
    let qualifier = qualifier.into();
    for (i, term) in order.iter().enumerate() {
        if i > 0 {
            buf.push(", ");
        }
        buf.push_column(qualifier.for_column(&term.column), &term.column)?;
        buf.push(" ").push(term.direction.as_sql());
    }
    Ok(())
}

fn write_clauses(buf: &mut SqlBuffer, clauses: &[Clause], qualifier: Qualifier<'_>) -> Result<(), CompileError> {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            buf.push(clause.conjunction.as_sql());
        }
        write_condition(buf, &clause.condition, qualifier)?;
    }
    Ok(())
}

fn write_condition(buf: &mut SqlBuffer, condition: &Condition, qualifier: Qualifier<'_>) -> Result<(), CompileError> {
    match condition {
        Condition::Compare { column, operator, value } => {
            if value.is_null() && matches!(operator, Operator::Equal | Operator::NotEqual) {
                buf.push_column(qualifier.for_column(column), column)?;
                buf.push(if *operator == Operator::Equal { " IS NULL" } else { " IS NOT NULL" });
            } else {
                buf.push_column(qualifier.for_column(column), column)?;
                buf.push(" ").push(operator.as_sql()).push(" ");
                buf.push_bind(value.clone());
            }
        }
        Condition::Columns { left, operator, right } => {
            buf.push_column(qualifier.for_column(left), left)?;
            buf.push(" ").push(operator.as_sql()).push(" ");
            buf.push_column(qualifier.for_column(right), right)?;
        }
        Condition::In { column, values, negated } => {
            if values.is_empty() {
                // IN () is invalid SQL; an empty set matches nothing
                buf.push(if *negated { "1 = 1" } else { "1 = 0" });
            } else {
                buf.push_column(qualifier.for_column(column), column)?;
                buf.push(if *negated { " NOT IN (" } else { " IN (" });
                buf.push_bind_list(values.iter().cloned());
                buf.push(")");
            }
        }
        Condition::Null { column, negated } => {
            buf.push_column(qualifier.for_column(column), column)?;
            buf.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
        }
        Condition::Between { column, low, high } => {
            buf.push_column(qualifier.for_column(column), column)?;
            buf.push(" BETWEEN ").push_bind(low.clone());
            buf.push(" AND ").push_bind(high.clone());
        }
        Condition::Group(clauses) => {
            buf.push("(");
            write_clauses(buf, clauses, qualifier)?;
            buf.push(")");
        }
        Condition::Raw { sql, bindings } => {
            buf.push("(");
            buf.push_raw(sql, bindings)?;
            buf.push(")");
        }
    }
    Ok(())
}
