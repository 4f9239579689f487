#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use elif_optimized_queries::{
    CompiledStatement, Dialect, EntityMeta, EntityRegistry, ExecutionError, OptimizerConfig, QueryOptimizer,
    RelationDescriptor, ResultRow, SqlExecutor, SqliteExecutor, ThroughConfig, TranslationSchema,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

const SCHEMA: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE articles (id INTEGER PRIMARY KEY, title TEXT NOT NULL, published INTEGER NOT NULL, user_id INTEGER)",
    "CREATE TABLE comments (id INTEGER PRIMARY KEY, body TEXT NOT NULL, article_id INTEGER NOT NULL, votes INTEGER NOT NULL)",
    "CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE article_tag (article_id INTEGER NOT NULL, tag_id INTEGER NOT NULL)",
    "CREATE TABLE tag_translations (tag_id INTEGER NOT NULL, locale TEXT NOT NULL, label TEXT NOT NULL)",
    "CREATE TABLE reactions (id INTEGER PRIMARY KEY, kind TEXT NOT NULL, comment_id INTEGER NOT NULL)",
    "CREATE TABLE images (id INTEGER PRIMARY KEY, url TEXT NOT NULL, imageable_type TEXT NOT NULL, imageable_id INTEGER NOT NULL)",
];

const SEED: &[&str] = &[
    "INSERT INTO users (id, name) VALUES (10, 'John')",
    "INSERT INTO articles (id, title, published, user_id) VALUES (1, 'Hello', 1, 10)",
    "INSERT INTO articles (id, title, published, user_id) VALUES (2, 'Draft', 0, NULL)",
    "INSERT INTO comments (id, body, article_id, votes) VALUES (100, 'A', 1, 3)",
    "INSERT INTO comments (id, body, article_id, votes) VALUES (101, 'B', 1, 5)",
    "INSERT INTO tags (id, name) VALUES (1, 'rust')",
    "INSERT INTO article_tag (article_id, tag_id) VALUES (1, 1)",
    "INSERT INTO tag_translations (tag_id, locale, label) VALUES (1, 'fr', 'rouille')",
    "INSERT INTO users (id, name) VALUES (11, 'Jane')",
    "INSERT INTO reactions (id, kind, comment_id) VALUES (1, 'like', 100)",
    "INSERT INTO reactions (id, kind, comment_id) VALUES (2, 'wow', 101)",
    "INSERT INTO images (id, url, imageable_type, imageable_id) VALUES (1, 'a.png', 'Article', 1)",
    "INSERT INTO images (id, url, imageable_type, imageable_id) VALUES (2, 'john.png', 'User', 10)",
    "INSERT INTO images (id, url, imageable_type, imageable_id) VALUES (3, 'c.png', 'Article', 1)",
    // Same id as article 1, other owner type
    "INSERT INTO images (id, url, imageable_type, imageable_id) VALUES (4, 'other.png', 'User', 1)",
];

/// Route compiler and executor logs to the test output; `RUST_LOG` filters them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Log lines written while a [`CapturedLogs::install`] guard is alive
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Capture events on the current thread until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One in-memory database per test; a single connection keeps it alive
pub async fn seeded_pool() -> SqlitePool {
    init_tracing();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    for statement in SCHEMA.iter().chain(SEED) {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool
}

pub fn registry() -> EntityRegistry {
    let registry = EntityRegistry::new();
    registry.register(
        EntityMeta::new("Article", "articles")
            .with_columns(["id", "title", "published", "user_id"])
            .with_relation("author", RelationDescriptor::belongs_to("User", "user_id", "id"))
            .with_relation("comments", RelationDescriptor::has_many("Comment", "article_id", "id"))
            .with_relation("tags", RelationDescriptor::belongs_to_many("Tag", "article_tag", "article_id", "tag_id"))
            .with_relation(
                "reactions",
                RelationDescriptor::has_many_through("Reaction", ThroughConfig::new("comments", "article_id", "comment_id")),
            )
            .with_relation("images", RelationDescriptor::morph_many("Image", "imageable")),
    );
    registry.register(
        EntityMeta::new("User", "users")
            .with_columns(["id", "name"])
            .with_relation("avatar", RelationDescriptor::morph_one("Image", "imageable")),
    );
    registry.register(EntityMeta::new("Reaction", "reactions").with_columns(["id", "kind", "comment_id"]));
    registry.register(EntityMeta::new("Image", "images").with_columns(["id", "url", "imageable_type", "imageable_id"]));
    registry.register(EntityMeta::new("Comment", "comments").with_columns(["id", "body", "article_id", "votes"]));
    registry.register(
        EntityMeta::new("Tag", "tags")
            .with_columns(["id", "name"])
            .with_translation(TranslationSchema::new(["label"])),
    );
    registry
}

/// Runs statements on SQLite, counting them; statements containing the
/// failure marker are rejected before reaching the database
pub struct RecordingExecutor {
    inner: SqliteExecutor,
    executed: AtomicUsize,
    statements: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl RecordingExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteExecutor::new(pool),
            executed: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, marker: &'static str) -> Self {
        self.fail_on = Some(marker);
        self
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        timeout: Option<Duration>,
    ) -> Result<Vec<ResultRow>, ExecutionError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(statement.sql.clone());
        if let Some(marker) = self.fail_on {
            if statement.sql.contains(marker) {
                return Err(ExecutionError::Database(format!("injected failure on {}", marker)));
            }
        }
        self.inner.fetch_all(statement, timeout).await
    }
}

pub async fn optimizer(config: OptimizerConfig) -> (QueryOptimizer, Arc<RecordingExecutor>) {
    let executor = Arc::new(RecordingExecutor::new(seeded_pool().await));
    optimizer_with(config, executor)
}

pub fn optimizer_with(config: OptimizerConfig, executor: Arc<RecordingExecutor>) -> (QueryOptimizer, Arc<RecordingExecutor>) {
    let optimizer = QueryOptimizer::new(config, Arc::new(registry()), executor.clone()).unwrap();
    (optimizer, executor)
}
