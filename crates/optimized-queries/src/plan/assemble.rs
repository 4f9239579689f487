//! Query plan assembler
//!
//! Merges the base selection, one fragment per relation, count and
//! aggregate, and the plan's own clauses into a single statement, or into a
//! [`SplitPlan`] when the plan requests more relations than allowed.

use tracing::warn;

use super::split::{FollowUpBatch, SplitPlan};
use super::{CompiledPlan, CompiledQuery, CompiledStatement, QueryPlan};
use crate::compiler::columns::write_select_list;
use crate::compiler::source::write_translation_join;
use crate::compiler::{resolve_columns, CompileContext, CompiledFragment, SqlBuffer, SubqueryCompiler};
use crate::config::OptimizerConfig;
use crate::decode::{DecodeLayout, RelationSlot};
use crate::dialect::Dialect;
use crate::entity::{EntityRegistry, DELETED_AT};
use crate::error::CompileError;
use crate::filter::{write_order_terms, Qualifier};
use crate::relations::{ColumnSelection, RelationSpec};
use crate::translation::TranslationResolver;
use crate::value::DatabaseValue;

/// Which parts of the plan a statement carries
struct Section<'p> {
    relations: &'p [RelationSpec],
    /// Counts and aggregates
    scalars: bool,
    /// Extra base columns (keys needed by split merges or the fallback)
    force_columns: &'p [String],
    /// Scope rows with the plan's WHERE/ORDER/LIMIT, or leave `pk IN (` open
    scope: Scope,
    /// Clamp the limit to the configured maximum
    bounded: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scope {
    Plan,
    OpenKeys,
}

pub struct Assembler<'a> {
    dialect: Dialect,
    registry: &'a EntityRegistry,
    translations: &'a TranslationResolver,
    config: &'a OptimizerConfig,
}

impl<'a> Assembler<'a> {
    pub fn new(
        dialect: Dialect,
        registry: &'a EntityRegistry,
        translations: &'a TranslationResolver,
        config: &'a OptimizerConfig,
    ) -> Self {
        Self {
            dialect,
            registry,
            translations,
            config,
        }
    }

    fn context<'p>(&'p self, plan: &'p QueryPlan) -> CompileContext<'p> {
        CompileContext {
            dialect: self.dialect,
            registry: self.registry,
            translations: self.translations,
            locale: plan.locale.as_deref(),
        }
    }

    /// Effective split threshold for a plan (0 = never split)
    fn max_relations(&self, plan: &QueryPlan) -> usize {
        plan.max_relations_per_query
            .unwrap_or(self.config.max_relations_per_query)
    }

    /// Compile a plan into one statement or a split plan
    pub fn compile(&self, plan: &QueryPlan) -> Result<CompiledPlan, CompileError> {
        let subqueries = plan.subquery_count();
        if self.config.debug && subqueries > self.config.complexity_warning_threshold {
            warn!(
                entity = plan.entity.type_name(),
                subqueries,
                threshold = self.config.complexity_warning_threshold,
                "Query carries many subqueries; consider splitting or fewer relations"
            );
        }

        let layout = self.layout(plan)?;
        let max = self.max_relations(plan);

        let query = if max > 0 && plan.relations.len() > max {
            CompiledQuery::Split(self.compile_split(plan, max)?)
        } else {
            CompiledQuery::Single(self.compile_statement(
                plan,
                Section {
                    relations: &plan.relations,
                    scalars: true,
                    force_columns: &[],
                    scope: Scope::Plan,
                    bounded: true,
                },
            )?)
        };

        Ok(CompiledPlan {
            query,
            layout,
            subqueries,
        })
    }

    /// Compile every relation into one statement, ignoring the split budget
    pub fn compile_unsplit(&self, plan: &QueryPlan) -> Result<CompiledStatement, CompileError> {
        self.compile_statement(
            plan,
            Section {
                relations: &plan.relations,
                scalars: true,
                force_columns: &[],
                scope: Scope::Plan,
                bounded: true,
            },
        )
    }

    /// Base rows only, with `extra_columns` added to the selection
    pub fn compile_base_only(
        &self,
        plan: &QueryPlan,
        extra_columns: &[String],
    ) -> Result<CompiledStatement, CompileError> {
        self.compile_statement(
            plan,
            Section {
                relations: &[],
                scalars: false,
                force_columns: extra_columns,
                scope: Scope::Plan,
                bounded: true,
            },
        )
    }

    /// `SELECT COUNT(*) AS "aggregate"` over the plan's matching rows
    pub fn compile_count(&self, plan: &QueryPlan) -> Result<CompiledStatement, CompileError> {
        let mut counted = plan.clone();
        counted.relations.clear();
        counted.order.clear();
        counted.limit = None;
        counted.offset = None;

        if counted.group_by.is_empty() && !counted.having.has_conditions() {
            counted.counts.clear();
            counted.aggregates.clear();
            counted.columns = ColumnSelection::Columns(vec![counted.entity.primary_key().to_string()]);
        }

        let inner = self.compile_statement(
            &counted,
            Section {
                relations: &[],
                scalars: true,
                force_columns: &[],
                scope: Scope::Plan,
                bounded: false,
            },
        )?;

        // Numbering already happened on the inner statement and stays valid
        Ok(CompiledStatement {
            sql: format!(
                "SELECT COUNT(*) AS {} FROM ({}) AS {}",
                self.dialect.quote("aggregate"),
                inner.sql,
                self.dialect.quote("aggregate_table")
            ),
            bindings: inner.bindings,
        })
    }

    /// One key column of the first matching row, if any
    pub fn compile_exists(&self, plan: &QueryPlan) -> Result<CompiledStatement, CompileError> {
        let mut exists_plan = plan.clone();
        exists_plan.relations.clear();
        exists_plan.counts.clear();
        exists_plan.aggregates.clear();
        exists_plan.order.clear();
        exists_plan.offset = None;
        exists_plan.limit = Some(1);
        exists_plan.columns = ColumnSelection::Columns(vec![exists_plan.entity.primary_key().to_string()]);
        self.compile_base_only(&exists_plan, &[])
    }

    /// Alias and shape of every relation column, in declaration order
    pub fn layout(&self, plan: &QueryPlan) -> Result<DecodeLayout, CompileError> {
        let compiler = SubqueryCompiler::new(self.context(plan));
        let relations = plan
            .relations
            .iter()
            .map(|spec| {
                Ok(RelationSlot {
                    alias: spec.alias().to_string(),
                    shape: compiler.shape_of(plan.entity.as_ref(), spec)?,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        Ok(DecodeLayout::new(relations))
    }

    fn compile_split(&self, plan: &QueryPlan, max: usize) -> Result<SplitPlan, CompileError> {
        let primary_key = plan.entity.primary_key().to_string();
        let force = vec![primary_key.clone()];
        let mut batches = plan.relations.chunks(max);

        let first = batches.next().unwrap_or(&[]);
        let base = self.compile_statement(
            plan,
            Section {
                relations: first,
                scalars: true,
                force_columns: &force,
                scope: Scope::Plan,
                bounded: true,
            },
        )?;

        let follow_ups = batches
            .map(|batch| {
                let template = self.compile_template(
                    plan,
                    Section {
                        relations: batch,
                        scalars: false,
                        force_columns: &force,
                        scope: Scope::OpenKeys,
                        bounded: false,
                    },
                )?;
                Ok(FollowUpBatch::new(
                    batch.iter().map(|spec| spec.alias().to_string()).collect(),
                    template,
                    self.dialect,
                ))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        Ok(SplitPlan {
            base,
            follow_ups,
            primary_key,
        })
    }

    fn compile_statement(&self, plan: &QueryPlan, section: Section<'_>) -> Result<CompiledStatement, CompileError> {
        let fragment = self.compile_template(plan, section)?;
        Ok(CompiledStatement::from_fragment(fragment, self.dialect))
    }

    /// Statement text with `?` placeholders
    fn compile_template(
        &self,
        plan: &QueryPlan,
        section: Section<'_>,
    ) -> Result<CompiledFragment, CompileError> {
        let ctx = self.context(plan);
        let compiler = SubqueryCompiler::new(ctx);
        let entity = plan.entity.as_ref();
        let table = entity.table();
        let translation_alias = format!("{}_trans", table);
        let base_translation = match plan.locale.as_deref() {
            Some(_) => self.translations.resolve(entity),
            None => None,
        };

        // Follow-up batches carry only the key and their relations
        let mut columns = match section.scope {
            Scope::Plan => resolve_columns(entity, &plan.columns, base_translation.as_deref())?,
            Scope::OpenKeys => Default::default(),
        };
        for column in section.force_columns {
            if !columns.main.contains(column) && !columns.translated.contains(column) {
                columns.main.push(column.clone());
            }
        }
        let translated_fields: &[String] = match (section.scope, base_translation.as_deref()) {
            (Scope::Plan, Some(meta)) => &meta.fields,
            _ => &[],
        };

        let mut buf = SqlBuffer::new(self.dialect);
        buf.push("SELECT ");
        let mut has_columns = !columns.is_empty();
        if has_columns {
            write_select_list(&mut buf, table, &translation_alias, &columns)?;
        }

        let mut push_separator = |buf: &mut SqlBuffer| {
            if has_columns {
                buf.push(", ");
            }
            has_columns = true;
        };

        for spec in section.relations {
            let fragment = compiler.compile_relation(entity, table, spec)?;
            push_separator(&mut buf);
            buf.push_fragment(&fragment);
        }
        if section.scalars {
            for spec in &plan.counts {
                let fragment = compiler.compile_count(entity, table, spec)?;
                push_separator(&mut buf);
                buf.push_fragment(&fragment);
            }
            for spec in &plan.aggregates {
                let fragment = compiler.compile_aggregate(entity, table, spec)?;
                push_separator(&mut buf);
                buf.push_fragment(&fragment);
            }
        }
        if !has_columns {
            buf.push_qualified(table, entity.primary_key())?;
        }

        buf.push(" FROM ").push_identifier(table)?;
        if let (Scope::Plan, Some(meta), Some(locale)) =
            (section.scope, base_translation.as_deref(), plan.locale.as_deref())
        {
            write_translation_join(&mut buf, table, entity.primary_key(), meta, &translation_alias, locale)?;
        }

        if section.scope == Scope::OpenKeys {
            buf.push(" WHERE ").push_qualified(table, entity.primary_key())?;
            buf.push(" IN (");
            return Ok(buf.into_fragment());
        }

        for join in &plan.joins {
            buf.push(" ").push(join.join_type.as_sql()).push(" ");
            buf.push_identifier(&join.table)?;
            buf.push(" ON ").push_column(Some(table), &join.first)?;
            buf.push(" ").push(join.operator.as_sql()).push(" ");
            buf.push_column(Some(&join.table), &join.second)?;
        }

        self.write_where(&mut buf, &compiler, plan, &translation_alias, translated_fields)?;

        if !plan.group_by.is_empty() {
            buf.push(" GROUP BY ");
            for (i, column) in plan.group_by.iter().enumerate() {
                if i > 0 {
                    buf.push(", ");
                }
                buf.push_column(Some(table), column)?;
            }
        }

        if plan.having.has_conditions() {
            buf.push(" HAVING ");
            plan.having.write_conditions(&mut buf, Qualifier::default())?;
        }

        // Subquery aliases are ordered by name, and only when this statement emits them
        let emits = |name: &str| {
            section.relations.iter().any(|r| r.alias() == name)
                || (section.scalars
                    && (plan.counts.iter().any(|c| c.alias() == name)
                        || plan.aggregates.iter().any(|a| a.alias() == name)))
        };
        let base_qualifier = Qualifier::table(table).localized(&translation_alias, translated_fields);
        let mut ordered = 0usize;
        for term in &plan.order {
            let qualifier = if !plan.is_subquery_alias(&term.column) {
                base_qualifier
            } else if emits(&term.column) {
                Qualifier::default()
            } else {
                warn!(column = term.column.as_str(), "Ordering by a subquery this statement does not select; ignored");
                continue;
            };
            buf.push(if ordered == 0 { " ORDER BY " } else { ", " });
            write_order_terms(&mut buf, std::slice::from_ref(term), qualifier)?;
            ordered += 1;
        }

        let limit = match (plan.limit, self.config.max_limit.filter(|_| section.bounded)) {
            (Some(limit), Some(max)) => Some(limit.min(max)),
            (None, Some(max)) => Some(max),
            (limit, None) => limit,
        };
        buf.push(&self.dialect.limit_offset(limit, plan.offset));

        Ok(buf.into_fragment())
    }

    fn write_where(
        &self,
        buf: &mut SqlBuffer,
        compiler: &SubqueryCompiler<'_>,
        plan: &QueryPlan,
        translation_alias: &str,
        translated_fields: &[String],
    ) -> Result<(), CompileError> {
        let entity = plan.entity.as_ref();
        let table = entity.table();
        let mut first = true;
        let mut next = |buf: &mut SqlBuffer| {
            buf.push(if first { " WHERE " } else { " AND " });
            first = false;
        };

        if entity.uses_soft_deletes() && !plan.with_trashed {
            next(buf);
            buf.push_qualified(table, DELETED_AT)?.push(" IS NULL");
        }

        if plan.filter.has_conditions() {
            next(buf);
            buf.push("(");
            let qualifier = Qualifier::table(table).localized(translation_alias, translated_fields);
            plan.filter.write_conditions(buf, qualifier)?;
            buf.push(")");
        }

        if let Some(search) = plan.search.as_ref().filter(|s| !s.term.is_empty() && !s.columns.is_empty()) {
            let pattern = search.pattern();
            let like = self.dialect.like_operator();
            next(buf);
            buf.push("(");

            let mut terms = 0usize;
            let mut related: Vec<(&str, Vec<&str>)> = Vec::new();
            for column in &search.columns {
                match column.split_once('.') {
                    Some((relation, column)) if entity.relation(relation).is_some() => {
                        match related.iter_mut().find(|(name, _)| *name == relation) {
                            Some((_, columns)) => columns.push(column),
                            None => related.push((relation, vec![column])),
                        }
                    }
                    _ => {
                        if terms > 0 {
                            buf.push(" OR ");
                        }
                        terms += 1;
                        // Localized fields live on the translation join
                        let qualifier = if translated_fields.iter().any(|f| f == column) {
                            translation_alias
                        } else {
                            table
                        };
                        buf.push_column(Some(qualifier), column)?;
                        buf.push(" ").push(like).push(" ");
                        buf.push_bind(DatabaseValue::String(pattern.clone()));
                    }
                }
            }
            for (relation, columns) in related {
                if terms > 0 {
                    buf.push(" OR ");
                }
                terms += 1;
                let fragment = compiler.compile_relation_search(entity, table, relation, &columns, &pattern)?;
                buf.push_fragment(&fragment);
            }

            buf.push(")");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Shape;
    use crate::entity::EntityMeta;
    use crate::filter::{Filter, OrderBy, OrderDirection};
    use crate::plan::SearchSpec;
    use crate::relations::{AggregateFunction, AggregateSpec, CountSpec, RelationDescriptor, RelationKind};
    use crate::translation::TranslationSchema;

    struct Fixture {
        registry: EntityRegistry,
        translations: TranslationResolver,
        config: OptimizerConfig,
    }

    impl Fixture {
        fn new(config: OptimizerConfig) -> Self {
            let registry = EntityRegistry::new();
            registry.register(
                EntityMeta::new("Article", "articles")
                    .with_columns(["title", "published", "author_id"])
                    .with_soft_deletes(true)
                    .with_translation(TranslationSchema::new(["title"]))
                    .with_relation("author", RelationDescriptor::belongs_to("User", "author_id", "id"))
                    .with_relation("comments", RelationDescriptor::has_many("Comment", "article_id", "id")),
            );
            registry.register(EntityMeta::new("User", "users").with_columns(["name"]));
            registry.register(EntityMeta::new("Comment", "comments").with_columns(["body", "article_id", "votes"]));
            Self {
                registry,
                translations: TranslationResolver::new(),
                config,
            }
        }

        fn assembler(&self, dialect: Dialect) -> Assembler<'_> {
            Assembler::new(dialect, &self.registry, &self.translations, &self.config)
        }

        fn plan(&self) -> QueryPlan {
            QueryPlan::new(self.registry.resolve("Article").unwrap())
        }
    }

    #[test]
    fn test_full_statement_binding_order() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut plan = fixture.plan();
        plan.columns = ColumnSelection::from_list(["id", "title"]);
        plan.locale = Some("en".to_string());
        plan.add_relation(
            RelationSpec::new("comments", RelationKind::Collection)
                .with_columns(ColumnSelection::from_list(["id"]))
                .with_filter(Filter::new().where_eq("body", "x")),
        );
        plan.add_count(CountSpec::new("comments").with_filter(Filter::new().where_op(
            "votes",
            crate::filter::Operator::GreaterThan,
            1,
        )));
        plan.filter = Filter::new().where_eq("published", true);
        plan.search = Some(SearchSpec {
            term: "rust".to_string(),
            columns: vec!["title".to_string(), "comments.body".to_string()],
        });
        plan.order = vec![OrderBy::new("comments_count", OrderDirection::Desc)];
        plan.limit = Some(10);

        let statement = fixture.assembler(Dialect::SQLite).compile_unsplit(&plan).unwrap();

        assert!(statement.sql.starts_with(
            "SELECT \"articles\".\"id\", \"articles_trans\".\"title\" AS \"title\", (SELECT"
        ));
        assert!(statement.sql.contains(
            "FROM \"articles\" LEFT JOIN \"article_translations\" AS \"articles_trans\" ON \"articles\".\"id\" = \"articles_trans\".\"article_id\" AND \"articles_trans\".\"locale\" = ?"
        ));
        assert!(statement.sql.contains(
            "WHERE \"articles\".\"deleted_at\" IS NULL AND (\"articles\".\"published\" = ?) AND (\"articles_trans\".\"title\" LIKE ? OR EXISTS (SELECT 1 FROM \"comments\""
        ));
        assert!(statement.sql.ends_with("ORDER BY \"comments_count\" DESC LIMIT 10"));

        // SELECT fragments, then the FROM join, then WHERE
        assert_eq!(
            statement.bindings,
            vec![
                DatabaseValue::from("x"),
                DatabaseValue::Int32(1),
                DatabaseValue::from("en"),
                DatabaseValue::Bool(true),
                DatabaseValue::from("%rust%"),
                DatabaseValue::from("%rust%"),
            ]
        );
        assert_eq!(statement.placeholder_count(), statement.bindings.len());
    }

    #[test]
    fn test_postgres_placeholders_are_numbered() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut plan = fixture.plan();
        plan.add_relation(
            RelationSpec::new("comments", RelationKind::Collection)
                .with_filter(Filter::new().where_eq("body", "x")),
        );
        plan.filter = Filter::new().where_eq("author_id", 10);

        let statement = fixture.assembler(Dialect::PostgreSQL).compile_unsplit(&plan).unwrap();
        assert!(statement.sql.contains("\"comments_rel\".\"body\" = $1"));
        assert!(statement.sql.contains("\"articles\".\"author_id\" = $2"));
        assert!(!statement.sql.contains('?'));
        assert_eq!(statement.placeholder_count(), 2);
    }

    #[test]
    fn test_with_trashed_drops_soft_delete_scope() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut plan = fixture.plan();
        plan.with_trashed = true;
        let statement = fixture.assembler(Dialect::SQLite).compile_unsplit(&plan).unwrap();
        assert!(!statement.sql.contains("deleted_at"));
        assert_eq!(
            statement.sql,
            "SELECT \"articles\".\"id\", \"articles\".\"published\", \"articles\".\"author_id\" FROM \"articles\""
        );
    }

    #[test]
    fn test_split_plan_batches_relations() {
        let fixture = Fixture::new(OptimizerConfig::default().with_max_relations_per_query(1));
        let mut plan = fixture.plan();
        plan.columns = ColumnSelection::from_list(["published"]);
        plan.add_relation(RelationSpec::new("author", RelationKind::Single));
        plan.add_relation(RelationSpec::new("comments", RelationKind::Collection));
        plan.add_aggregate(AggregateSpec::new("comments", "votes", AggregateFunction::Max));

        let compiled = fixture.assembler(Dialect::SQLite).compile(&plan).unwrap();
        let CompiledQuery::Split(split) = compiled.query else {
            panic!("expected a split plan");
        };

        assert_eq!(split.statement_count(), 2);
        assert!(split.base.sql.starts_with("SELECT \"articles\".\"published\", \"articles\".\"id\", (SELECT"));
        assert!(split.base.sql.contains("AS \"author\""));
        assert!(split.base.sql.contains("AS \"max_comments_votes\""));
        assert!(!split.base.sql.contains("AS \"comments\""));

        let follow_up = split.follow_ups[0].bind(&[1.into(), 2.into()]);
        assert!(follow_up.sql.starts_with("SELECT \"articles\".\"id\", (SELECT"));
        assert!(follow_up.sql.ends_with("FROM \"articles\" WHERE \"articles\".\"id\" IN (?, ?)"));
        assert_eq!(split.follow_ups[0].relations, vec!["comments".to_string()]);

        assert_eq!(compiled.layout.shape_of("author"), Some(Shape::One));
        assert_eq!(compiled.layout.shape_of("comments"), Some(Shape::Many));
    }

    #[test]
    fn test_no_split_within_budget() {
        let fixture = Fixture::new(OptimizerConfig::default().with_max_relations_per_query(2));
        let mut plan = fixture.plan();
        plan.add_relation(RelationSpec::new("author", RelationKind::Single));
        plan.add_relation(RelationSpec::new("comments", RelationKind::Collection));
        let compiled = fixture.assembler(Dialect::SQLite).compile(&plan).unwrap();
        assert!(matches!(compiled.query, CompiledQuery::Single(_)));
    }

    #[test]
    fn test_count_statement_wraps_base_query() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut plan = fixture.plan();
        plan.filter = Filter::new().where_eq("published", true);
        plan.limit = Some(5);
        plan.add_relation(RelationSpec::new("author", RelationKind::Single));

        let statement = fixture.assembler(Dialect::SQLite).compile_count(&plan).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(*) AS \"aggregate\" FROM (SELECT \"articles\".\"id\" FROM \"articles\" \
             WHERE \"articles\".\"deleted_at\" IS NULL AND (\"articles\".\"published\" = ?)) AS \"aggregate_table\""
        );
        assert_eq!(statement.bindings, vec![DatabaseValue::Bool(true)]);
    }

    #[test]
    fn test_max_limit_clamps() {
        let fixture = Fixture::new(OptimizerConfig::default().with_max_limit(50));
        let mut plan = fixture.plan();
        plan.limit = Some(500);
        let statement = fixture.assembler(Dialect::SQLite).compile_unsplit(&plan).unwrap();
        assert!(statement.sql.ends_with(" LIMIT 50"));
    }

    #[test]
    fn test_unknown_relation_is_a_compile_error() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut plan = fixture.plan();
        plan.add_relation(RelationSpec::new("missing", RelationKind::Single));
        let err = fixture.assembler(Dialect::SQLite).compile(&plan).unwrap_err();
        assert!(matches!(err, CompileError::UnknownRelation { .. }));
    }

    #[test]
    fn test_localized_base_filter_and_order_use_translation_join() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut plan = fixture.plan();
        plan.columns = ColumnSelection::from_list(["id", "title"]);
        plan.filter = Filter::new().where_eq("title", "Bonjour").where_eq("published", true);
        plan.order = vec![OrderBy::new("title", OrderDirection::Asc)];

        let untranslated = fixture.assembler(Dialect::SQLite).compile_unsplit(&plan).unwrap();
        assert!(untranslated.sql.contains("(\"articles\".\"title\" = ? AND \"articles\".\"published\" = ?)"));
        assert!(untranslated.sql.ends_with("ORDER BY \"articles\".\"title\" ASC"));

        plan.locale = Some("fr".to_string());
        let translated = fixture.assembler(Dialect::SQLite).compile_unsplit(&plan).unwrap();
        assert!(translated
            .sql
            .contains("(\"articles_trans\".\"title\" = ? AND \"articles\".\"published\" = ?)"));
        assert!(translated.sql.ends_with("ORDER BY \"articles_trans\".\"title\" ASC"));
        assert_eq!(translated.bindings.len(), 3);
    }
}
