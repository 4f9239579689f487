//! Fluent query surface
//!
//! `QueryOptimizer` owns the shared collaborators; `query` hands out an
//! [`OptimizedQuery`] whose consuming methods accumulate a [`QueryPlan`].
//! Terminal methods compile the plan and run it through the execution
//! controller.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::cache::{CacheInvalidator, CacheStore, ModelEvent, ModelObserver, ObserverRegistry, RequestCache};
use crate::config::OptimizerConfig;
use crate::decode::{Hydrated, ObjectRecord, Output, OutputFormat, Record, ResultDecoder};
use crate::entity::EntityRegistry;
use crate::error::{QueryError, QueryResult};
use crate::execution::{ExecutionHandles, PerformanceReport, SqlExecutor};
use crate::filter::{Filter, Operator, OrderBy, OrderDirection};
use crate::plan::{CompiledPlan, CompiledQuery, JoinClause, JoinType, QueryPlan, SearchSpec};
use crate::relations::{
    classify, AggregateFunction, AggregateSpec, ColumnSelection, CountSpec, RelationKind, RelationSpec,
};
use crate::translation::TranslationResolver;
use crate::value::DatabaseValue;

/// Entry point: shared configuration, entity metadata, caches and executor
#[derive(Clone)]
pub struct QueryOptimizer {
    handles: ExecutionHandles,
    observers: ObserverRegistry,
}

impl QueryOptimizer {
    pub fn new(
        config: OptimizerConfig,
        registry: Arc<EntityRegistry>,
        executor: Arc<dyn SqlExecutor>,
    ) -> QueryResult<Self> {
        config.validate()?;
        Ok(Self {
            handles: ExecutionHandles {
                config: Arc::new(config),
                registry,
                translations: Arc::new(TranslationResolver::new()),
                request_cache: Arc::new(RequestCache::new()),
                store: None,
                executor,
            },
            observers: ObserverRegistry::new(),
        })
    }

    /// Use `store` as the external cache tier
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.handles.store = Some(store);
        self
    }

    /// Notify `observer` of model events after this optimizer's caches are invalidated
    pub fn with_observer(mut self, observer: Arc<dyn ModelObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    /// Share a translation memo with other optimizers
    pub fn with_translations(mut self, translations: Arc<TranslationResolver>) -> Self {
        self.handles.translations = translations;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.handles.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.handles.registry
    }

    pub fn translations(&self) -> &TranslationResolver {
        &self.handles.translations
    }

    pub fn request_cache(&self) -> &RequestCache {
        &self.handles.request_cache
    }

    /// Start a query against the registered entity `type_name`
    pub fn query(&self, type_name: &str) -> QueryResult<OptimizedQuery> {
        let entity = self.handles.registry.resolve(type_name)?;
        Ok(OptimizedQuery {
            plan: QueryPlan::new(entity),
            handles: self.handles.clone(),
        })
    }

    /// Observer that invalidates this optimizer's caches on model events
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator::new(Arc::clone(&self.handles.request_cache), self.handles.store.clone())
    }

    /// Invalidate caches for a model event, then forward it to registered observers
    pub async fn notify(&self, event: &ModelEvent) -> QueryResult<()> {
        let invalidator = self.invalidator();
        match event {
            ModelEvent::Saved { table } => invalidator.saved(table).await?,
            ModelEvent::Deleted { table } => invalidator.deleted(table).await?,
            ModelEvent::Restored { table } => invalidator.restored(table).await?,
        }
        self.observers.dispatch(event).await;
        Ok(())
    }

    /// Drop every cached result in both tiers
    pub async fn clear_cache(&self) -> QueryResult<()> {
        self.handles.request_cache.clear();
        if let Some(store) = &self.handles.store {
            store.flush().await?;
        }
        Ok(())
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginator {
    pub data: Vec<Record>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

impl Paginator {
    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    /// 1-based index of the first record on this page
    pub fn from(&self) -> Option<u64> {
        if self.data.is_empty() {
            None
        } else {
            Some(
                (self.current_page - 1)
                    .saturating_mul(self.per_page)
                    .saturating_add(1),
            )
        }
    }

    pub fn to(&self) -> Option<u64> {
        self.from()
            .map(|from| from.saturating_add(self.data.len() as u64 - 1))
    }
}

/// A query being built against one entity
#[derive(Clone)]
pub struct OptimizedQuery {
    plan: QueryPlan,
    handles: ExecutionHandles,
}

impl std::fmt::Debug for OptimizedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizedQuery").field("plan", &self.plan).finish()
    }
}

impl OptimizedQuery {
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn into_plan(self) -> QueryPlan {
        self.plan
    }

    // Columns and relations

    /// Base columns to select (`*` or empty selects everything)
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.columns = ColumnSelection::from_list(columns);
        self
    }

    /// Eager load a relation, classifying it from the entity's metadata.
    ///
    /// A dotted path such as `author.name` joins the first hop and projects
    /// the named column.
    pub fn with(mut self, relation: &str) -> Self {
        let kind = classify(self.plan.entity.as_ref(), relation);
        self.plan.add_relation(RelationSpec::new(relation, kind));
        self
    }

    pub fn with_many<I, S>(self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        relations
            .into_iter()
            .fold(self, |query, relation| query.with(relation.as_ref()))
    }

    pub fn with_when(self, condition: bool, relation: &str) -> Self {
        if condition {
            self.with(relation)
        } else {
            self
        }
    }

    /// Eager load a relation restricted to `columns`
    pub fn with_columns<I, S>(mut self, relation: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = classify(self.plan.entity.as_ref(), relation);
        self.plan
            .add_relation(RelationSpec::new(relation, kind).with_columns(ColumnSelection::from_list(columns)));
        self
    }

    /// Eager load a relation with a constraint on the related rows
    pub fn with_where<F>(mut self, relation: &str, constraint: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        let kind = classify(self.plan.entity.as_ref(), relation);
        self.plan
            .add_relation(RelationSpec::new(relation, kind).with_filter(constraint(Filter::new())));
        self
    }

    /// Add a fully specified relation request
    pub fn with_relation(mut self, spec: RelationSpec) -> Self {
        self.plan.add_relation(spec);
        self
    }

    pub fn with_single<I, S>(self, relation: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_kind(relation, RelationKind::Single, columns, None)
    }

    pub fn with_collection<I, S>(self, relation: &str, columns: I, filter: Option<Filter>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_kind(relation, RelationKind::Collection, columns, filter)
    }

    pub fn with_many_to_many<I, S>(self, relation: &str, columns: I, filter: Option<Filter>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_kind(relation, RelationKind::ManyToMany, columns, filter)
    }

    pub fn with_polymorphic<I, S>(self, relation: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_kind(relation, RelationKind::Polymorphic, columns, None)
    }

    /// `path` is `relation.column`
    pub fn with_nested(mut self, path: &str) -> Self {
        self.plan.add_relation(RelationSpec::new(path, RelationKind::Nested));
        self
    }

    fn with_kind<I, S>(mut self, relation: &str, kind: RelationKind, columns: I, filter: Option<Filter>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = RelationSpec::new(relation, kind).with_columns(ColumnSelection::from_list(columns));
        spec.filter = filter;
        self.plan.add_relation(spec);
        self
    }

    // Counts and aggregates

    /// Load `<relation>_count` without loading the relation
    pub fn with_count(mut self, relation: &str) -> Self {
        self.plan.add_count(CountSpec::new(relation));
        self
    }

    /// Count related rows matching `constraint` under `alias`
    pub fn with_count_where<F>(mut self, alias: &str, relation: &str, constraint: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        self.plan.add_count(
            CountSpec::new(relation)
                .with_alias(alias)
                .with_filter(constraint(Filter::new())),
        );
        self
    }

    pub fn with_sum(self, relation: &str, column: &str) -> Self {
        self.with_aggregate(AggregateSpec::new(relation, column, AggregateFunction::Sum))
    }

    pub fn with_avg(self, relation: &str, column: &str) -> Self {
        self.with_aggregate(AggregateSpec::new(relation, column, AggregateFunction::Avg))
    }

    pub fn with_min(self, relation: &str, column: &str) -> Self {
        self.with_aggregate(AggregateSpec::new(relation, column, AggregateFunction::Min))
    }

    pub fn with_max(self, relation: &str, column: &str) -> Self {
        self.with_aggregate(AggregateSpec::new(relation, column, AggregateFunction::Max))
    }

    pub fn with_aggregate(mut self, spec: AggregateSpec) -> Self {
        self.plan.add_aggregate(spec);
        self
    }

    // Base predicates

    pub fn where_eq<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.map_filter(|f| f.where_eq(column, value))
    }

    pub fn where_not<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.map_filter(|f| f.where_not(column, value))
    }

    pub fn where_op<V: Into<DatabaseValue>>(self, column: &str, operator: Operator, value: V) -> Self {
        self.map_filter(|f| f.where_op(column, operator, value))
    }

    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.map_filter(|f| f.where_like(column, pattern))
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.map_filter(|f| f.where_in(column, values))
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        self.map_filter(|f| f.where_not_in(column, values))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.map_filter(|f| f.where_null(column))
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.map_filter(|f| f.where_not_null(column))
    }

    pub fn where_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.map_filter(|f| f.where_between(column, low, high))
    }

    pub fn where_raw(self, sql: &str, bindings: Vec<DatabaseValue>) -> Self {
        self.map_filter(|f| f.where_raw(sql, bindings))
    }

    pub fn or_where_eq<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.map_filter(|f| f.or_where_eq(column, value))
    }

    /// Parenthesized group of conditions joined with AND
    pub fn where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        self.map_filter(|f| f.where_group(build))
    }

    /// AND every condition of `filter` onto the base predicates
    pub fn filter(self, filter: Filter) -> Self {
        self.map_filter(|f| f.merge(filter))
    }

    fn map_filter<F>(mut self, update: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        let filter = std::mem::take(&mut self.plan.filter);
        self.plan.filter = update(filter);
        self
    }

    /// Match `term` against `columns`; `relation.column` searches a relation
    pub fn search<I, S>(mut self, term: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.search = Some(SearchSpec {
            term: term.to_string(),
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    // Ordering, grouping, paging

    pub fn order_by(mut self, column: &str) -> Self {
        self.plan.order.push(OrderBy::new(column, OrderDirection::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.plan.order.push(OrderBy::new(column, OrderDirection::Desc));
        self
    }

    pub fn latest(self, column: &str) -> Self {
        self.order_by_desc(column)
    }

    pub fn oldest(self, column: &str) -> Self {
        self.order_by(column)
    }

    pub fn group_by(mut self, column: &str) -> Self {
        self.plan.group_by.push(column.to_string());
        self
    }

    pub fn having<F>(mut self, build: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        let having = std::mem::take(&mut self.plan.having);
        self.plan.having = build(having);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.plan.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.plan.offset = Some(offset);
        self
    }

    pub fn join(self, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.add_join(JoinType::Inner, table, first, operator, second)
    }

    pub fn left_join(self, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.add_join(JoinType::Left, table, first, operator, second)
    }

    fn add_join(mut self, join_type: JoinType, table: &str, first: &str, operator: Operator, second: &str) -> Self {
        self.plan.joins.push(JoinClause {
            join_type,
            table: table.to_string(),
            first: first.to_string(),
            operator,
            second: second.to_string(),
        });
        self
    }

    // Output, caching, execution options

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.plan.format = Some(format);
        self
    }

    pub fn as_array(self) -> Self {
        self.format(OutputFormat::Array)
    }

    pub fn as_objects(self) -> Self {
        self.format(OutputFormat::Object)
    }

    pub fn as_entities(self) -> Self {
        self.format(OutputFormat::Entity)
    }

    /// Cache results for `ttl`
    pub fn cache(mut self, ttl: Duration) -> Self {
        self.plan.cache.enabled = true;
        self.plan.cache.ttl = Some(ttl);
        self
    }

    /// Tags the external tier files the results under (default: the table)
    pub fn cache_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.cache.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.plan.cache.enabled = false;
        self
    }

    /// Locale for translated columns
    pub fn locale(mut self, locale: &str) -> Self {
        self.plan.locale = Some(locale.to_string());
        self
    }

    pub fn safe_mode(mut self, enabled: bool) -> Self {
        self.plan.safe_mode = Some(enabled);
        self
    }

    /// Split into follow-up batches above `max` relations (0 never splits)
    pub fn max_relations_per_query(mut self, max: usize) -> Self {
        self.plan.max_relations_per_query = Some(max);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.plan.timeout = Some(timeout);
        self
    }

    /// Include soft-deleted base rows
    pub fn with_trashed(mut self) -> Self {
        self.plan.with_trashed = true;
        self
    }

    // Inspection

    pub fn compile(&self) -> QueryResult<CompiledPlan> {
        Ok(self.handles.controller().assembler().compile(&self.plan)?)
    }

    /// SQL of the first statement the query would run
    pub fn to_sql(&self) -> QueryResult<String> {
        Ok(self.compile()?.query.base_statement().sql.clone())
    }

    pub fn get_bindings(&self) -> QueryResult<Vec<DatabaseValue>> {
        Ok(self.compile()?.query.base_statement().bindings.clone())
    }

    /// Every statement of a split plan with its keys still unbound
    pub fn to_sql_batches(&self) -> QueryResult<Vec<String>> {
        Ok(match self.compile()?.query {
            CompiledQuery::Single(statement) => vec![statement.sql],
            CompiledQuery::Split(split) => std::iter::once(split.base.sql)
                .chain(split.follow_ups.into_iter().map(|batch| batch.template.sql))
                .collect(),
        })
    }

    // Terminals

    pub async fn get(self) -> QueryResult<Vec<Record>> {
        Ok(self.get_with_performance().await?.0)
    }

    pub async fn get_with_performance(self) -> QueryResult<(Vec<Record>, PerformanceReport)> {
        let execution = self.handles.controller().run(&self.plan).await?;
        let records = ResultDecoder::new(&execution.layout).decode(execution.rows);
        Ok((records, execution.report))
    }

    pub async fn get_objects(self) -> QueryResult<Vec<ObjectRecord>> {
        let execution = self.handles.controller().run(&self.plan).await?;
        Ok(ResultDecoder::new(&execution.layout).decode_objects(execution.rows))
    }

    pub async fn get_entities<E: DeserializeOwned>(self) -> QueryResult<Vec<Hydrated<E>>> {
        let execution = self.handles.controller().run(&self.plan).await?;
        ResultDecoder::new(&execution.layout).decode_entities(execution.rows)
    }

    /// Results in the query's output format, or the configured default
    pub async fn fetch<E: DeserializeOwned>(self) -> QueryResult<Output<E>> {
        let format = self.plan.format.unwrap_or(self.handles.config.default_format);
        let execution = self.handles.controller().run(&self.plan).await?;
        ResultDecoder::new(&execution.layout).decode_as(execution.rows, format)
    }

    pub async fn first(self) -> QueryResult<Option<Record>> {
        Ok(self.limit(1).get().await?.into_iter().next())
    }

    pub async fn first_or_fail(self) -> QueryResult<Record> {
        let table = self.plan.entity.table().to_string();
        self.first().await?.ok_or(QueryError::NotFound(table))
    }

    /// Record whose primary key is `id`
    pub async fn find<V: Into<DatabaseValue>>(self, id: V) -> QueryResult<Option<Record>> {
        let key = self.plan.entity.primary_key().to_string();
        self.where_eq(&key, id).first().await
    }

    pub async fn find_or_fail<V: Into<DatabaseValue>>(self, id: V) -> QueryResult<Record> {
        let table = self.plan.entity.table().to_string();
        self.find(id).await?.ok_or(QueryError::NotFound(table))
    }

    /// Number of base rows matching the query, ignoring limit and offset
    pub async fn count(&self) -> QueryResult<u64> {
        let controller = self.handles.controller();
        let statement = controller.assembler().compile_count(&self.plan)?;
        let rows = controller.fetch(&statement, &self.plan).await?;

        let value = rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .cloned()
            .unwrap_or(JsonValue::Null);
        Ok(match value {
            JsonValue::Number(n) => n.as_u64().unwrap_or(0),
            JsonValue::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        })
    }

    pub async fn exists(&self) -> QueryResult<bool> {
        let controller = self.handles.controller();
        let statement = controller.assembler().compile_exists(&self.plan)?;
        Ok(!controller.fetch(&statement, &self.plan).await?.is_empty())
    }

    /// `page` is 1-based; `per_page` of 0 is treated as 1
    pub async fn paginate(self, per_page: u64, page: u64) -> QueryResult<Paginator> {
        let per_page = per_page.max(1);
        let current_page = page.max(1);
        let total = self.count().await?;
        let last_page = total.div_ceil(per_page).max(1);

        let data = self
            .limit(per_page)
            .offset((current_page - 1).saturating_mul(per_page))
            .get()
            .await?;

        Ok(Paginator {
            data,
            total,
            per_page,
            current_page,
            last_page,
        })
    }

    /// Feed results to `callback` in pages of `size` rows until exhausted
    pub async fn chunk<F>(self, size: u64, mut callback: F) -> QueryResult<()>
    where
        F: FnMut(Vec<Record>) -> QueryResult<()>,
    {
        let size = size.max(1);
        let query = self.ordered_for_paging();
        let mut offset = 0;
        loop {
            let chunk = query.clone().limit(size).offset(offset).get().await?;
            let exhausted = (chunk.len() as u64) < size;
            if chunk.is_empty() {
                break;
            }

            callback(chunk)?;
            if exhausted {
                break;
            }
            offset += size;
        }

        Ok(())
    }

    /// Stream records, fetching `size` rows per statement
    pub fn lazy(self, size: u64) -> impl Stream<Item = QueryResult<Record>> {
        let size = size.max(1);
        let query = self.ordered_for_paging();

        stream::try_unfold((query, 0u64, false), move |(query, offset, exhausted)| async move {
            if exhausted {
                return Ok::<_, QueryError>(None);
            }
            let page = query.clone().limit(size).offset(offset).get().await?;
            if page.is_empty() {
                return Ok(None);
            }
            let exhausted = (page.len() as u64) < size;
            let records = stream::iter(page.into_iter().map(Ok::<Record, QueryError>));
            Ok(Some((records, (query, offset + size, exhausted))))
        })
        .try_flatten()
    }

    /// Paging needs a stable order; fall back to the primary key
    fn ordered_for_paging(mut self) -> Self {
        if self.plan.limit.is_some() || self.plan.offset.is_some() {
            warn!(
                entity = self.plan.entity.type_name(),
                "Chunked iteration replaces the query's limit and offset"
            );
        }
        if self.plan.order.is_empty() {
            let key = self.plan.entity.primary_key().to_string();
            debug!(entity = self.plan.entity.type_name(), key = key.as_str(), "Ordering chunks by primary key");
            self.plan.order.push(OrderBy::new(&key, OrderDirection::Asc));
        }
        self
    }
}
