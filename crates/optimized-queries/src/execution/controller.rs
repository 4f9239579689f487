//! Cache and execution controller
//!
//! `run` walks one query through: compile, request cache, external cache,
//! execute (single statement or split batches), populate caches. Execution
//! failures are matched on kind: recoverable ones switch to the fallback
//! loader when safe mode is on, everything else reaches the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, trace, warn};

use super::executor::SqlExecutor;
use super::fallback::FallbackLoader;
use crate::cache::{derive_cache_key, CacheStore, RequestCache};
use crate::config::{OptimizerConfig, SplitFailurePolicy};
use crate::decode::DecodeLayout;
use crate::entity::EntityRegistry;
use crate::error::{QueryError, QueryResult};
use crate::plan::split::{collect_keys, merge_by_key};
use crate::plan::{Assembler, CompiledQuery, CompiledStatement, QueryPlan, SplitPlan};
use crate::relations::ColumnSelection;
use crate::translation::TranslationResolver;
use crate::value::ResultRow;

/// Cache tier that answered a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Request,
    External,
}

/// What one query execution cost.
///
/// All zero with `used_fallback` set when safe mode replaced the optimized
/// statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Statements sent to the database
    pub statements: usize,
    pub duration: Duration,
    pub cache_hit: Option<CacheTier>,
    pub used_fallback: bool,
    /// Follow-up batches of a split plan
    pub split_batches: usize,
    pub failed_batches: usize,
    /// Relations, counts and aggregates compiled as subqueries
    pub subqueries: usize,
    pub rows: usize,
}

impl PerformanceReport {
    fn fallback() -> Self {
        Self {
            used_fallback: true,
            ..Self::default()
        }
    }
}

/// Raw rows plus what is needed to decode them
#[derive(Debug, Clone)]
pub struct Execution {
    pub rows: Vec<ResultRow>,
    pub layout: DecodeLayout,
    pub report: PerformanceReport,
}

pub struct ExecutionController<'a> {
    config: &'a OptimizerConfig,
    registry: &'a EntityRegistry,
    translations: &'a TranslationResolver,
    request_cache: &'a RequestCache,
    store: Option<&'a dyn CacheStore>,
    executor: &'a dyn SqlExecutor,
}

impl<'a> ExecutionController<'a> {
    pub fn new(
        config: &'a OptimizerConfig,
        registry: &'a EntityRegistry,
        translations: &'a TranslationResolver,
        request_cache: &'a RequestCache,
        store: Option<&'a dyn CacheStore>,
        executor: &'a dyn SqlExecutor,
    ) -> Self {
        Self {
            config,
            registry,
            translations,
            request_cache,
            store,
            executor,
        }
    }

    pub fn assembler(&self) -> Assembler<'a> {
        Assembler::new(self.executor.dialect(), self.registry, self.translations, self.config)
    }

    fn timeout(&self, plan: &QueryPlan) -> Option<Duration> {
        plan.timeout.or(self.config.statement_timeout)
    }

    fn safe_mode(&self, plan: &QueryPlan) -> bool {
        plan.safe_mode.unwrap_or(self.config.safe_mode)
    }

    /// Effective TTL when caching applies to this plan
    fn cache_ttl(&self, plan: &QueryPlan) -> Option<Duration> {
        if !self.config.cache_enabled || !plan.cache.enabled {
            return None;
        }
        plan.cache.ttl.or(self.config.default_cache_ttl)
    }

    pub async fn run(&self, plan: &QueryPlan) -> QueryResult<Execution> {
        let started = Instant::now();
        let compiled = self.assembler().compile(plan)?;
        let layout = compiled.layout.clone();

        let ttl = self.cache_ttl(plan);
        let key = match ttl {
            Some(_) => match derive_cache_key(&self.config.cache_prefix, plan, compiled.query.base_statement()) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "Failed to derive cache key; caching disabled for this query");
                    None
                }
            },
            None => None,
        };
        let generation = self.request_cache.generation();

        if let Some(key) = &key {
            if let Some(rows) = self.request_cache.get(key) {
                trace!(key = key.as_str(), "Request cache hit");
                let rows = rows.as_ref().clone();
                return Ok(Execution {
                    report: PerformanceReport {
                        cache_hit: Some(CacheTier::Request),
                        duration: started.elapsed(),
                        subqueries: compiled.subqueries,
                        rows: rows.len(),
                        ..PerformanceReport::default()
                    },
                    rows,
                    layout,
                });
            }

            if let Some(rows) = self.external_get(key).await {
                trace!(key = key.as_str(), "External cache hit");
                self.request_cache.put(key, rows.clone(), generation);
                return Ok(Execution {
                    report: PerformanceReport {
                        cache_hit: Some(CacheTier::External),
                        duration: started.elapsed(),
                        subqueries: compiled.subqueries,
                        rows: rows.len(),
                        ..PerformanceReport::default()
                    },
                    rows,
                    layout,
                });
            }
        }

        let timeout = self.timeout(plan);
        let outcome = match &compiled.query {
            CompiledQuery::Single(statement) => self.execute_single(statement, timeout).await,
            CompiledQuery::Split(split) => self.execute_split(plan, split, timeout).await,
        };

        let (rows, mut report) = match outcome {
            Ok(result) => result,
            Err(e) if e.is_recoverable() && self.safe_mode(plan) => {
                warn!(
                    entity = plan.entity.type_name(),
                    error = %e,
                    "Optimized query failed; falling back to per-relation loading"
                );
                let fallback = FallbackLoader::new(self.registry, self.translations, self.config, self.executor)
                    .load(plan, timeout)
                    .await?;
                return Ok(Execution {
                    rows: fallback.rows,
                    layout,
                    report: PerformanceReport::fallback(),
                });
            }
            Err(e) => {
                error!(
                    entity = plan.entity.type_name(),
                    error = %e,
                    safe_mode = self.safe_mode(plan),
                    "Optimized query failed"
                );
                return Err(e);
            }
        };

        report.duration = started.elapsed();
        report.subqueries = compiled.subqueries;
        report.rows = rows.len();

        if let (Some(key), Some(ttl)) = (&key, ttl) {
            self.request_cache.put(key, rows.clone(), generation);
            self.external_put(plan, key, &rows, ttl).await;
        }

        Ok(Execution { rows, layout, report })
    }

    /// Run a statement outside the cache and fallback paths (counts, exists checks)
    pub async fn fetch(&self, statement: &CompiledStatement, plan: &QueryPlan) -> QueryResult<Vec<ResultRow>> {
        self.log_statement(statement);
        self.executor.fetch_all(statement, self.timeout(plan)).await.map_err(|e| {
            error!(entity = plan.entity.type_name(), error = %e, "Query failed");
            QueryError::from(e)
        })
    }

    async fn execute_single(
        &self,
        statement: &CompiledStatement,
        timeout: Option<Duration>,
    ) -> QueryResult<(Vec<ResultRow>, PerformanceReport)> {
        self.log_statement(statement);
        let rows = self.executor.fetch_all(statement, timeout).await?;
        Ok((
            rows,
            PerformanceReport {
                statements: 1,
                ..PerformanceReport::default()
            },
        ))
    }

    /// Base batch first, then each follow-up batch in order
    async fn execute_split(
        &self,
        plan: &QueryPlan,
        split: &SplitPlan,
        timeout: Option<Duration>,
    ) -> QueryResult<(Vec<ResultRow>, PerformanceReport)> {
        self.log_statement(&split.base);
        let mut rows = self.executor.fetch_all(&split.base, timeout).await?;
        let mut report = PerformanceReport {
            statements: 1,
            split_batches: split.follow_ups.len(),
            ..PerformanceReport::default()
        };

        let keys = collect_keys(&rows, &split.primary_key);
        if !keys.is_empty() {
            for (batch_index, batch) in split.follow_ups.iter().enumerate() {
                let statement = batch.bind(&keys);
                self.log_statement(&statement);
                report.statements += 1;

                match self.executor.fetch_all(&statement, timeout).await {
                    Ok(batch_rows) => merge_by_key(&mut rows, batch_rows, &split.primary_key, &batch.relations),
                    Err(e) => match self.config.split_failure_policy {
                        SplitFailurePolicy::Skip => {
                            warn!(
                                batch = batch_index + 1,
                                relations = ?batch.relations,
                                error = %e,
                                "Split batch failed; its relations decode as empty"
                            );
                            report.failed_batches += 1;
                        }
                        SplitFailurePolicy::Fail => return Err(QueryError::from(e)),
                    },
                }
            }
        }

        // The key was only forced in for merging
        let key_requested = match &plan.columns {
            ColumnSelection::All => true,
            ColumnSelection::Columns(columns) => columns.contains(&split.primary_key),
        };
        if !key_requested {
            for row in rows.iter_mut() {
                row.shift_remove(&split.primary_key);
            }
        }

        Ok((rows, report))
    }

    async fn external_get(&self, key: &str) -> Option<Vec<ResultRow>> {
        let store = self.store?;
        match store.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache store read failed; treating as miss");
                None
            }
        }
    }

    async fn external_put(&self, plan: &QueryPlan, key: &str, rows: &[ResultRow], ttl: Duration) {
        let Some(store) = self.store else {
            return;
        };
        let tags = if plan.cache.tags.is_empty() {
            vec![plan.entity.table().to_string()]
        } else {
            plan.cache.tags.clone()
        };

        let payload = match serde_json::to_vec(rows) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize rows for caching");
                return;
            }
        };
        if let Err(e) = store.put(key, payload, Some(ttl), &tags).await {
            warn!(key, error = %e, "Cache store write failed");
        }
    }

    fn log_statement(&self, statement: &CompiledStatement) {
        if self.config.log_queries {
            debug!(
                sql = statement.sql.as_str(),
                bindings = statement.bindings.len(),
                "Executing optimized query"
            );
        }
    }
}

/// Shared handles the optimizer passes to every controller it creates
#[derive(Clone)]
pub struct ExecutionHandles {
    pub config: Arc<OptimizerConfig>,
    pub registry: Arc<EntityRegistry>,
    pub translations: Arc<TranslationResolver>,
    pub request_cache: Arc<RequestCache>,
    pub store: Option<Arc<dyn CacheStore>>,
    pub executor: Arc<dyn SqlExecutor>,
}

impl ExecutionHandles {
    pub fn controller(&self) -> ExecutionController<'_> {
        ExecutionController::new(
            &self.config,
            &self.registry,
            &self.translations,
            &self.request_cache,
            self.store.as_deref(),
            self.executor.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::entity::EntityMeta;
    use crate::error::ExecutionError;
    use crate::relations::{RelationDescriptor, RelationKind, RelationSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers every statement with canned rows, or fails statements containing a marker
    struct ScriptedExecutor {
        statements: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl ScriptedExecutor {
        fn new(fail_on: Option<&'static str>) -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                fail_on,
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlExecutor for ScriptedExecutor {
        fn dialect(&self) -> Dialect {
            Dialect::SQLite
        }

        async fn fetch_all(
            &self,
            statement: &CompiledStatement,
            _timeout: Option<Duration>,
        ) -> Result<Vec<ResultRow>, ExecutionError> {
            self.statements.lock().unwrap().push(statement.sql.clone());
            if let Some(marker) = self.fail_on {
                if statement.sql.contains(marker) {
                    return Err(ExecutionError::Database(format!("failed on {}", marker)));
                }
            }
            if statement.sql.contains("__owner_key") {
                return Ok(vec![ResultRow::from_iter([
                    ("__owner_key".to_string(), json!(1)),
                    ("id".to_string(), json!(10)),
                ])]);
            }
            Ok(vec![ResultRow::from_iter([("id".to_string(), json!(1))])])
        }
    }

    fn handles(config: OptimizerConfig, executor: Arc<ScriptedExecutor>) -> ExecutionHandles {
        let registry = EntityRegistry::new();
        registry.register(
            EntityMeta::new("Article", "articles")
                .with_relation("comments", RelationDescriptor::has_many("Comment", "article_id", "id")),
        );
        registry.register(EntityMeta::new("Comment", "comments"));
        ExecutionHandles {
            config: Arc::new(config),
            registry: Arc::new(registry),
            translations: Arc::new(TranslationResolver::new()),
            request_cache: Arc::new(RequestCache::new()),
            store: None,
            executor,
        }
    }

    fn plan(handles: &ExecutionHandles) -> QueryPlan {
        let mut plan = QueryPlan::new(handles.registry.resolve("Article").unwrap());
        plan.add_relation(RelationSpec::new("comments", RelationKind::Collection));
        plan
    }

    #[tokio::test]
    async fn test_safe_mode_falls_back_on_execution_error() {
        let executor = Arc::new(ScriptedExecutor::new(Some("json_group_array")));
        let handles = handles(OptimizerConfig::default(), executor.clone());
        let plan = plan(&handles);

        let execution = handles.controller().run(&plan).await.unwrap();

        assert!(execution.report.used_fallback);
        assert_eq!(execution.report.statements, 0);
        assert_eq!(execution.rows[0]["comments"], json!([{"id": 10}]));
        // optimized statement, base rows, keyed comments
        assert_eq!(executor.statements().len(), 3);
    }

    #[tokio::test]
    async fn test_without_safe_mode_the_error_propagates() {
        let executor = Arc::new(ScriptedExecutor::new(Some("json_group_array")));
        let handles = handles(OptimizerConfig::default().with_safe_mode(false), executor.clone());
        let plan = plan(&handles);

        let err = handles.controller().run(&plan).await.unwrap_err();
        assert!(matches!(err, QueryError::Execution(ExecutionError::Database(_))));
        assert_eq!(executor.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_request_cache_serves_repeated_queries() {
        let executor = Arc::new(ScriptedExecutor::new(None));
        let handles = handles(
            OptimizerConfig::default().with_default_cache_ttl(Duration::from_secs(60)),
            executor.clone(),
        );
        let plan = plan(&handles);

        let first = handles.controller().run(&plan).await.unwrap();
        let second = handles.controller().run(&plan).await.unwrap();

        assert_eq!(first.report.cache_hit, None);
        assert_eq!(second.report.cache_hit, Some(CacheTier::Request));
        assert_eq!(first.rows, second.rows);
        assert_eq!(executor.statements().len(), 1);

        handles.request_cache.clear();
        handles.controller().run(&plan).await.unwrap();
        assert_eq!(executor.statements().len(), 2);
    }

    #[tokio::test]
    async fn test_no_ttl_means_no_caching() {
        let executor = Arc::new(ScriptedExecutor::new(None));
        let handles = handles(OptimizerConfig::default(), executor.clone());
        let plan = plan(&handles);

        handles.controller().run(&plan).await.unwrap();
        handles.controller().run(&plan).await.unwrap();
        assert_eq!(executor.statements().len(), 2);
        assert!(handles.request_cache.is_empty());
    }
}
