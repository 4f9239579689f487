//! Per-relation fallback loading
//!
//! Used by safe mode when the optimized statement fails: base rows are
//! loaded on their own, then each relation, count and aggregate runs as a
//! separate keyed statement and is attached under the same alias the
//! optimized statement would have produced.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::executor::SqlExecutor;
use crate::compiler::{
    resolve_columns, CompileContext, CompiledFragment, Shape, SubqueryCompiler, AGGREGATE_ALIAS,
    OWNER_KEY_ALIAS,
};
use crate::config::OptimizerConfig;
use crate::decode::empty_value;
use crate::entity::{has_column, EntityDescriptor, EntityRegistry};
use crate::error::{CompileError, QueryResult};
use crate::plan::split::{collect_keys, key_of};
use crate::plan::{Assembler, CompiledStatement, QueryPlan};
use crate::relations::{ColumnSelection, RelationSpec};
use crate::translation::TranslationResolver;
use crate::value::ResultRow;

/// Rows produced by the fallback path
#[derive(Debug, Clone)]
pub struct FallbackResult {
    pub rows: Vec<ResultRow>,
    pub statements: usize,
}

pub struct FallbackLoader<'a> {
    registry: &'a EntityRegistry,
    translations: &'a TranslationResolver,
    config: &'a OptimizerConfig,
    executor: &'a dyn SqlExecutor,
}

impl<'a> FallbackLoader<'a> {
    pub fn new(
        registry: &'a EntityRegistry,
        translations: &'a TranslationResolver,
        config: &'a OptimizerConfig,
        executor: &'a dyn SqlExecutor,
    ) -> Self {
        Self {
            registry,
            translations,
            config,
            executor,
        }
    }

    pub async fn load(&self, plan: &QueryPlan, timeout: Option<Duration>) -> QueryResult<FallbackResult> {
        let dialect = self.executor.dialect();
        let entity = plan.entity.as_ref();
        let ctx = CompileContext {
            dialect,
            registry: self.registry,
            translations: self.translations,
            locale: plan.locale.as_deref(),
        };
        let compiler = SubqueryCompiler::new(ctx);

        // Base keys every relation hangs off
        let mut key_columns: Vec<String> = Vec::new();
        let relation_names = plan
            .relations
            .iter()
            .map(|r| r.name.as_str())
            .chain(plan.counts.iter().map(|c| c.relation.as_str()))
            .chain(plan.aggregates.iter().map(|a| a.relation.as_str()));
        for name in relation_names {
            let key = base_key(entity, name)?;
            if !key_columns.contains(&key) {
                key_columns.push(key);
            }
        }

        let translation = plan.locale.as_ref().and_then(|_| self.translations.resolve(entity));
        let selected = resolve_columns(entity, &plan.columns, translation.as_deref())?;
        let extras: Vec<String> = key_columns
            .iter()
            .filter(|key| !selected.names().any(|name| name == key.as_str()))
            .cloned()
            .collect();

        let assembler = Assembler::new(dialect, self.registry, self.translations, self.config);
        let base = assembler.compile_base_only(plan, &key_columns)?;
        let mut rows = self.executor.fetch_all(&base, timeout).await?;
        let mut statements = 1;

        for spec in &plan.relations {
            let key = base_key(entity, &spec.name)?;
            let keys = collect_keys(&rows, &key);
            let shape = compiler.shape_of(entity, spec)?;

            let mut grouped: HashMap<String, Vec<JsonValue>> = HashMap::new();
            if !keys.is_empty() {
                let columns = self.declared_selection(entity, spec)?;
                let fragment = compiler.compile_keyed_relation(entity, spec, &columns, &keys)?;
                let related = self.run(fragment, timeout).await?;
                statements += 1;

                for mut row in related {
                    let Some(owner) = row.shift_remove(OWNER_KEY_ALIAS).as_ref().and_then(key_of) else {
                        continue;
                    };
                    let object: serde_json::Map<String, JsonValue> = row.into_iter().collect();
                    grouped.entry(owner).or_default().push(JsonValue::Object(object));
                }
            }

            let limit = spec.filter.as_ref().and_then(|f| f.row_limit());
            for row in rows.iter_mut() {
                let mut related = row
                    .get(&key)
                    .and_then(key_of)
                    .and_then(|k| grouped.get(&k).cloned())
                    .unwrap_or_default();
                let value = match shape {
                    Shape::Many => {
                        if let Some(limit) = limit {
                            related.truncate(limit as usize);
                        }
                        JsonValue::Array(related)
                    }
                    Shape::One if related.is_empty() => empty_value(Shape::One),
                    Shape::One => related.swap_remove(0),
                };
                row.insert(spec.alias().to_string(), value);
            }
        }

        for spec in &plan.counts {
            let key = base_key(entity, &spec.relation)?;
            let keys = collect_keys(&rows, &key);
            let values = if keys.is_empty() {
                HashMap::new()
            } else {
                statements += 1;
                let fragment = compiler.compile_keyed_count(entity, spec, &keys)?;
                self.run_grouped(fragment, timeout).await?
            };
            attach(&mut rows, &key, &spec.alias(), &values, JsonValue::from(0));
        }

        for spec in &plan.aggregates {
            let key = base_key(entity, &spec.relation)?;
            let keys = collect_keys(&rows, &key);
            let values = if keys.is_empty() {
                HashMap::new()
            } else {
                statements += 1;
                let fragment = compiler.compile_keyed_aggregate(entity, spec, &keys)?;
                self.run_grouped(fragment, timeout).await?
            };
            attach(&mut rows, &key, &spec.alias(), &values, JsonValue::Null);
        }

        for row in rows.iter_mut() {
            for extra in &extras {
                row.shift_remove(extra);
            }
        }

        debug!(
            entity = entity.type_name(),
            statements,
            rows = rows.len(),
            "Loaded relations through the fallback path"
        );

        Ok(FallbackResult { rows, statements })
    }

    /// Requested columns restricted to what the related entity declares
    fn declared_selection(&self, entity: &dyn EntityDescriptor, spec: &RelationSpec) -> QueryResult<ColumnSelection> {
        let ColumnSelection::Columns(columns) = &spec.columns else {
            return Ok(ColumnSelection::All);
        };
        if spec.is_nested() {
            return Ok(spec.columns.clone());
        }

        let related = match entity.relation(&spec.name) {
            Some(descriptor) => self.registry.resolve(descriptor.related())?,
            None => {
                return Err(CompileError::UnknownRelation {
                    entity: entity.type_name().to_string(),
                    relation: spec.name.clone(),
                }
                .into())
            }
        };
        let translated = related.translation().map(|t| t.fields).unwrap_or_default();

        let (kept, dropped): (Vec<String>, Vec<String>) = columns
            .iter()
            .cloned()
            .partition(|c| has_column(related.as_ref(), c) || translated.contains(c));
        if !dropped.is_empty() {
            warn!(
                relation = spec.name.as_str(),
                columns = ?dropped,
                "Dropping columns the related entity does not declare"
            );
        }

        Ok(if kept.is_empty() {
            ColumnSelection::All
        } else {
            ColumnSelection::Columns(kept)
        })
    }

    async fn run(&self, fragment: CompiledFragment, timeout: Option<Duration>) -> QueryResult<Vec<ResultRow>> {
        let statement = CompiledStatement::from_fragment(fragment, self.executor.dialect());
        Ok(self.executor.fetch_all(&statement, timeout).await?)
    }

    /// Run a keyed `GROUP BY` statement into owner key -> value
    async fn run_grouped(
        &self,
        fragment: CompiledFragment,
        timeout: Option<Duration>,
    ) -> QueryResult<HashMap<String, JsonValue>> {
        let rows = self.run(fragment, timeout).await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| {
                let owner = row.get(OWNER_KEY_ALIAS).and_then(key_of)?;
                let value = row.shift_remove(AGGREGATE_ALIAS).unwrap_or(JsonValue::Null);
                Some((owner, value))
            })
            .collect())
    }
}

fn base_key(entity: &dyn EntityDescriptor, relation: &str) -> Result<String, CompileError> {
    entity
        .relation(relation)
        .map(|descriptor| descriptor.base_key().to_string())
        .ok_or_else(|| CompileError::UnknownRelation {
            entity: entity.type_name().to_string(),
            relation: relation.to_string(),
        })
}

fn attach(rows: &mut [ResultRow], key: &str, alias: &str, values: &HashMap<String, JsonValue>, default: JsonValue) {
    for row in rows.iter_mut() {
        let value = row
            .get(key)
            .and_then(key_of)
            .and_then(|k| values.get(&k).cloned())
            .unwrap_or_else(|| default.clone());
        row.insert(alias.to_string(), value);
    }
}
