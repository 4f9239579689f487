//! # elif-optimized-queries
//!
//! Single-statement eager loading for elif.rs entities. Requested relations,
//! counts and aggregates are compiled into correlated subqueries that fold
//! related rows into JSON, so a model and its relations come back from one
//! round trip instead of N+1.
//!
//! ## Features
//!
//! - **Relation kinds**: belongs-to, has-one, has-many, has-many-through,
//!   many-to-many (plain and polymorphic pivots), morph-one, morph-many and
//!   one-hop nested paths
//! - **Dialects**: PostgreSQL, SQLite, MySQL and MariaDB, with a
//!   `group_concat` fallback where JSON array aggregation is missing
//! - **Query splitting**: plans with too many relations run as a base
//!   statement plus id-scoped follow-up batches
//! - **Safe mode**: a failed optimized statement falls back to one keyed
//!   query per relation
//! - **Caching**: request-scoped and tag-aware external tiers with
//!   event-driven invalidation
//! - **Translations**: localized columns joined from translation tables
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use elif_optimized_queries::{
//!     EntityMeta, EntityRegistry, OptimizerConfig, QueryOptimizer, RelationDescriptor, SqliteExecutor,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
//!
//! let registry = EntityRegistry::new();
//! registry.register(
//!     EntityMeta::new("Article", "articles")
//!         .with_columns(["id", "title"])
//!         .with_relation("comments", RelationDescriptor::has_many("Comment", "article_id", "id")),
//! );
//! registry.register(EntityMeta::new("Comment", "comments").with_columns(["id", "body", "article_id"]));
//!
//! let optimizer = QueryOptimizer::new(
//!     OptimizerConfig::default(),
//!     Arc::new(registry),
//!     Arc::new(SqliteExecutor::new(pool)),
//! )?;
//!
//! let articles = optimizer
//!     .query("Article")?
//!     .with("comments")
//!     .with_count("comments")
//!     .order_by_desc("id")
//!     .get()
//!     .await?;
//! println!("{} articles", articles.len());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod decode;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod execution;
pub mod filter;
pub mod plan;
pub mod relations;
pub mod security;
pub mod translation;
pub mod value;

pub use builder::{OptimizedQuery, Paginator, QueryOptimizer};
pub use cache::{
    derive_cache_key, CacheInvalidator, CacheStore, MemoryCacheStore, ModelEvent, ModelObserver,
    ObserverRegistry, RequestCache,
};
pub use config::{OptimizerConfig, OptimizerDefaults, SplitFailurePolicy};
pub use decode::{
    DecodeLayout, Hydrated, LoadedRelations, ObjectRecord, Output, OutputFormat, Record, ResultDecoder,
};
pub use dialect::{Dialect, ServerVersion};
pub use entity::{EntityDescriptor, EntityMeta, EntityRegistry};
pub use error::{
    CacheError, CacheResult, CompileError, ConfigError, ExecutionError, QueryError, QueryResult,
};
pub use execution::{
    CacheTier, ExecutionController, ExecutionHandles, PerformanceReport, PostgresExecutor, SqlExecutor,
    SqliteExecutor,
};
pub use filter::{Filter, Operator, OrderBy, OrderDirection, Qualifier};
pub use plan::{Assembler, CompiledPlan, CompiledQuery, CompiledStatement, QueryPlan, SplitPlan};
pub use relations::{
    classify, AggregateFunction, AggregateSpec, ColumnSelection, CountSpec, MorphConfig, PivotConfig, PivotMorph,
    RelationDescriptor, RelationKind, RelationSpec, ThroughConfig,
};
pub use translation::{TranslationResolver, TranslationSchema};
pub use value::{DatabaseValue, ResultRow};
