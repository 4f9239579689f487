//! Subquery compiler
//!
//! Emits one correlated, JSON-producing subquery per requested relation,
//! count or aggregate. Each fragment carries its own bindings in the order
//! its placeholders appear.

use tracing::warn;

use super::columns::{resolve_columns, write_json_object, write_json_object_flat, write_select_list, ResolvedColumns};
use super::source::{Link, RelationSource};
use super::{CompileContext, CompiledFragment, SqlBuffer};
use crate::entity::EntityDescriptor;
use crate::error::CompileError;
use crate::filter::{write_order_terms, Filter, OrderBy, Qualifier};
use crate::relations::{AggregateSpec, ColumnSelection, CountSpec, RelationKind, RelationSpec};
use crate::value::DatabaseValue;

/// Alias of the owner key column in keyed (non-correlated) loads
pub const OWNER_KEY_ALIAS: &str = "__owner_key";
/// Alias of the value column in keyed counts and aggregates
pub const AGGREGATE_ALIAS: &str = "aggregate";

/// Output shape of a compiled relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    One,
    Many,
}

pub struct SubqueryCompiler<'a> {
    ctx: CompileContext<'a>,
}

impl<'a> SubqueryCompiler<'a> {
    pub fn new(ctx: CompileContext<'a>) -> Self {
        Self { ctx }
    }

    /// Decoded shape of a relation request
    pub fn shape_of(&self, base: &dyn EntityDescriptor, spec: &RelationSpec) -> Result<Shape, CompileError> {
        let many = match spec.kind {
            RelationKind::Nested => base
                .relation(&spec.name)
                .ok_or_else(|| CompileError::UnknownRelation {
                    entity: base.type_name().to_string(),
                    relation: spec.name.clone(),
                })?
                .is_many(),
            kind => kind.is_many(),
        };
        Ok(if many { Shape::Many } else { Shape::One })
    }

    /// Columns projected for a relation request
    pub fn projection(&self, source: &RelationSource, spec: &RelationSpec) -> Result<ResolvedColumns, CompileError> {
        let selection = if spec.is_nested() {
            let segments = spec.nested_segments()?;
            if segments.len() > 1 {
                warn!(
                    relation = spec.name.as_str(),
                    path = spec.nested_path.as_deref().unwrap_or_default(),
                    "Only the first level of a nested relation is joined; deeper segments are ignored"
                );
            }
            ColumnSelection::Columns(vec![segments[0].to_string()])
        } else {
            spec.columns.clone()
        };

        resolve_columns(source.related.as_ref(), &selection, source.translation.as_deref())
    }

    /// `(SELECT ... ) AS "<relation>"`
    pub fn compile_relation(
        &self,
        base: &dyn EntityDescriptor,
        base_alias: &str,
        spec: &RelationSpec,
    ) -> Result<CompiledFragment, CompileError> {
        spec.nested_segments()?;
        let source = RelationSource::resolve(&self.ctx, base, &spec.name, true)?;
        let columns = self.projection(&source, spec)?;
        let shape = self.shape_of(base, spec)?;
        let filter = spec.filter.as_ref();
        let link = Link::Correlated { base_alias };

        let mut buf = SqlBuffer::new(self.ctx.dialect);
        buf.push("(");
        match shape {
            Shape::One => self.write_single(&mut buf, base, &source, &columns, filter, link)?,
            Shape::Many => self.write_collection(&mut buf, base, &source, &columns, filter, link)?,
        }
        buf.push(") AS ").push_identifier(spec.alias())?;

        Ok(buf.into_fragment())
    }

    fn write_single(
        &self,
        buf: &mut SqlBuffer,
        base: &dyn EntityDescriptor,
        source: &RelationSource,
        columns: &ResolvedColumns,
        filter: Option<&Filter>,
        link: Link<'_>,
    ) -> Result<(), CompileError> {
        let alias = source.alias();
        let translation_alias = source.translation_alias();
        buf.push("SELECT ");
        write_json_object(buf, &alias, &translation_alias, columns)?;
        buf.push(self.ctx.dialect.json_text_cast());
        self.write_body(buf, base, source, filter, link)?;
        if let Some(filter) = filter.filter(|f| !f.order().is_empty()) {
            buf.push(" ORDER BY ");
            let qualifier = Qualifier::table(&alias).localized(&translation_alias, source.translated_fields());
            filter.write_order(buf, qualifier)?;
        }
        buf.push(" LIMIT 1");
        Ok(())
    }

    fn write_collection(
        &self,
        buf: &mut SqlBuffer,
        base: &dyn EntityDescriptor,
        source: &RelationSource,
        columns: &ResolvedColumns,
        filter: Option<&Filter>,
        link: Link<'_>,
    ) -> Result<(), CompileError> {
        let dialect = self.ctx.dialect;
        let alias = source.alias();
        let translation_alias = source.translation_alias();
        let qualifier = Qualifier::table(&alias).localized(&translation_alias, source.translated_fields());
        let order = filter.map(Filter::order).unwrap_or_default();
        let limit = filter.and_then(Filter::row_limit);

        if limit.is_none() && (order.is_empty() || dialect.supports_ordered_aggregate()) {
            let mut row = SqlBuffer::new(dialect);
            write_json_object(&mut row, &alias, &translation_alias, columns)?;
            let mut order_sql = SqlBuffer::new(dialect);
            write_order_terms(&mut order_sql, order, qualifier)?;

            buf.push("SELECT ");
            buf.push(&dialect.json_array_agg(row.sql(), Some(order_sql.sql())));
            buf.push(dialect.json_text_cast());
            return self.write_body(buf, base, source, filter, link);
        }

        // Order and limit apply to a derived table before aggregation
        let rows_alias = format!("{}_rows", source.name);
        let mut row = SqlBuffer::new(dialect);
        write_json_object_flat(&mut row, &rows_alias, columns)?;

        // Aggregation order is not the derived table's order unless restated
        let mut outer_order = SqlBuffer::new(dialect);
        if let Some(projected) = projected_order(order, columns) {
            write_order_terms(&mut outer_order, &projected, rows_alias.as_str())?;
        }

        buf.push("SELECT ");
        buf.push(&dialect.json_array_agg(row.sql(), Some(outer_order.sql())));
        buf.push(dialect.json_text_cast());
        buf.push(" FROM (SELECT ");
        write_select_list(buf, &alias, &translation_alias, columns)?;
        self.write_body(buf, base, source, filter, link)?;
        if !order.is_empty() {
            buf.push(" ORDER BY ");
            write_order_terms(buf, order, qualifier)?;
        }
        if let Some(limit) = limit {
            buf.push(&format!(" LIMIT {}", limit));
        }
        buf.push(") AS ").push_identifier(&rows_alias)?;
        Ok(())
    }

    /// FROM, joins, owner link and filter conditions
    fn write_body(
        &self,
        buf: &mut SqlBuffer,
        base: &dyn EntityDescriptor,
        source: &RelationSource,
        filter: Option<&Filter>,
        link: Link<'_>,
    ) -> Result<(), CompileError> {
        source.write_from(buf, self.ctx.locale)?;
        buf.push(" WHERE ");
        source.write_scope(buf, base, link)?;
        if let Some(filter) = filter.filter(|f| f.has_conditions()) {
            buf.push(" AND (");
            let alias = source.alias();
            let translation_alias = source.translation_alias();
            let qualifier = Qualifier::table(&alias).localized(&translation_alias, source.translated_fields());
            filter.write_conditions(buf, qualifier)?;
            buf.push(")");
        }
        Ok(())
    }

    /// `(SELECT COUNT(*) ...) AS "<relation>_count"`
    pub fn compile_count(
        &self,
        base: &dyn EntityDescriptor,
        base_alias: &str,
        spec: &CountSpec,
    ) -> Result<CompiledFragment, CompileError> {
        let source = RelationSource::resolve(&self.ctx, base, &spec.relation, false)?;

        let mut buf = SqlBuffer::new(self.ctx.dialect);
        buf.push("(SELECT COUNT(*)");
        self.write_body(&mut buf, base, &source, spec.filter.as_ref(), Link::Correlated { base_alias })?;
        buf.push(") AS ").push_identifier(&spec.alias())?;

        Ok(buf.into_fragment())
    }

    /// `(SELECT SUM("rel"."col") ...) AS "sum_<relation>_<col>"`
    pub fn compile_aggregate(
        &self,
        base: &dyn EntityDescriptor,
        base_alias: &str,
        spec: &AggregateSpec,
    ) -> Result<CompiledFragment, CompileError> {
        if spec.column.trim().is_empty() {
            return Err(CompileError::InvalidAggregate {
                relation: spec.relation.clone(),
                reason: "aggregate column cannot be empty".to_string(),
            });
        }
        let source = RelationSource::resolve(&self.ctx, base, &spec.relation, false)?;

        let mut buf = SqlBuffer::new(self.ctx.dialect);
        buf.push("(SELECT ").push(spec.function.as_sql()).push("(");
        buf.push_qualified(&source.alias(), &spec.column)?;
        buf.push(")");
        if spec.function.is_numeric() {
            buf.push(self.ctx.dialect.numeric_result_cast());
        }
        self.write_body(&mut buf, base, &source, spec.filter.as_ref(), Link::Correlated { base_alias })?;
        buf.push(") AS ").push_identifier(&spec.alias())?;

        Ok(buf.into_fragment())
    }

    /// `EXISTS (SELECT 1 ... AND (c1 LIKE ? OR ...))` for searching related columns
    pub fn compile_relation_search(
        &self,
        base: &dyn EntityDescriptor,
        base_alias: &str,
        relation: &str,
        columns: &[&str],
        pattern: &str,
    ) -> Result<CompiledFragment, CompileError> {
        let source = RelationSource::resolve(&self.ctx, base, relation, false)?;
        let alias = source.alias();
        let like = self.ctx.dialect.like_operator();

        let mut buf = SqlBuffer::new(self.ctx.dialect);
        buf.push("EXISTS (SELECT 1");
        self.write_body(&mut buf, base, &source, None, Link::Correlated { base_alias })?;
        buf.push(" AND (");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                buf.push(" OR ");
            }
            buf.push_qualified(&alias, column)?;
            buf.push(" ").push(like).push(" ");
            buf.push_bind(DatabaseValue::String(pattern.to_string()));
        }
        buf.push("))");

        Ok(buf.into_fragment())
    }

    /// Plain rows of a relation for a set of owner keys, each tagged with
    /// its owner key under [`OWNER_KEY_ALIAS`]
    pub fn compile_keyed_relation(
        &self,
        base: &dyn EntityDescriptor,
        spec: &RelationSpec,
        columns: &ColumnSelection,
        keys: &[DatabaseValue],
    ) -> Result<CompiledFragment, CompileError> {
        let source = RelationSource::resolve(&self.ctx, base, &spec.name, true)?;
        let projected = RelationSpec {
            columns: columns.clone(),
            ..spec.clone()
        };
        let resolved = self.projection(&source, &projected)?;
        let alias = source.alias();
        let (owner_qualifier, owner_column) = source.owner_column();

        let mut buf = SqlBuffer::new(self.ctx.dialect);
        buf.push("SELECT ").push_qualified(&owner_qualifier, &owner_column)?;
        buf.push(" AS ").push_identifier(OWNER_KEY_ALIAS)?;
        if !resolved.is_empty() {
            buf.push(", ");
            write_select_list(&mut buf, &alias, &source.translation_alias(), &resolved)?;
        }
        self.write_body(&mut buf, base, &source, spec.filter.as_ref(), Link::Keys(keys))?;
        if let Some(filter) = spec.filter.as_ref().filter(|f| !f.order().is_empty()) {
            buf.push(" ORDER BY ");
            let translation_alias = source.translation_alias();
            let qualifier = Qualifier::table(&alias).localized(&translation_alias, source.translated_fields());
            filter.write_order(&mut buf, qualifier)?;
        }

        Ok(buf.into_fragment())
    }

    /// `COUNT(*)` per owner key
    pub fn compile_keyed_count(
        &self,
        base: &dyn EntityDescriptor,
        spec: &CountSpec,
        keys: &[DatabaseValue],
    ) -> Result<CompiledFragment, CompileError> {
        let source = RelationSource::resolve(&self.ctx, base, &spec.relation, false)?;
        self.keyed_group(base, &source, "COUNT(*)", spec.filter.as_ref(), keys)
    }

    /// Aggregate per owner key
    pub fn compile_keyed_aggregate(
        &self,
        base: &dyn EntityDescriptor,
        spec: &AggregateSpec,
        keys: &[DatabaseValue],
    ) -> Result<CompiledFragment, CompileError> {
        let source = RelationSource::resolve(&self.ctx, base, &spec.relation, false)?;
        let mut expr = SqlBuffer::new(self.ctx.dialect);
        expr.push(spec.function.as_sql()).push("(");
        expr.push_qualified(&source.alias(), &spec.column)?;
        expr.push(")");
        if spec.function.is_numeric() {
            expr.push(self.ctx.dialect.numeric_result_cast());
        }
        self.keyed_group(base, &source, expr.sql(), spec.filter.as_ref(), keys)
    }

    fn keyed_group(
        &self,
        base: &dyn EntityDescriptor,
        source: &RelationSource,
        expression: &str,
        filter: Option<&Filter>,
        keys: &[DatabaseValue],
    ) -> Result<CompiledFragment, CompileError> {
        let (owner_qualifier, owner_column) = source.owner_column();

        let mut buf = SqlBuffer::new(self.ctx.dialect);
        buf.push("SELECT ").push_qualified(&owner_qualifier, &owner_column)?;
        buf.push(" AS ").push_identifier(OWNER_KEY_ALIAS)?;
        buf.push(", ").push(expression).push(" AS ").push_identifier(AGGREGATE_ALIAS)?;
        self.write_body(&mut buf, base, source, filter, Link::Keys(keys))?;
        buf.push(" GROUP BY ").push_qualified(&owner_qualifier, &owner_column)?;

        Ok(buf.into_fragment())
    }
}

/// Order terms restated on the derived table's output names, when every
/// ordered column is projected
fn projected_order(order: &[OrderBy], columns: &ResolvedColumns) -> Option<Vec<OrderBy>> {
    if order.is_empty() {
        return None;
    }
    order
        .iter()
        .map(|term| {
            let column = term.column.rsplit('.').next().unwrap_or(&term.column);
            columns
                .names()
                .any(|name| name == column)
                .then(|| OrderBy::new(column, term.direction))
        })
        .collect()
}
