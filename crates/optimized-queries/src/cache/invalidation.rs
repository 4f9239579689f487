//! Event-driven cache invalidation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CacheStore, RequestCache};
use crate::error::CacheResult;

/// A write to one row of `table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    Saved { table: String },
    Deleted { table: String },
    Restored { table: String },
}

impl ModelEvent {
    pub fn saved(table: &str) -> Self {
        ModelEvent::Saved { table: table.to_string() }
    }

    pub fn deleted(table: &str) -> Self {
        ModelEvent::Deleted { table: table.to_string() }
    }

    pub fn restored(table: &str) -> Self {
        ModelEvent::Restored { table: table.to_string() }
    }

    pub fn table(&self) -> &str {
        match self {
            ModelEvent::Saved { table } | ModelEvent::Deleted { table } | ModelEvent::Restored { table } => table,
        }
    }
}

#[async_trait]
pub trait ModelObserver: Send + Sync {
    async fn saved(&self, _table: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn deleted(&self, _table: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn restored(&self, _table: &str) -> CacheResult<()> {
        Ok(())
    }
}

/// Ordered list of observers notified of model events
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn ModelObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn ModelObserver>) {
        self.observers.push(observer);
    }

    /// Notify every observer; failures are logged and do not stop the others
    pub async fn dispatch(&self, event: &ModelEvent) {
        for observer in &self.observers {
            let result = match event {
                ModelEvent::Saved { table } => observer.saved(table).await,
                ModelEvent::Deleted { table } => observer.deleted(table).await,
                ModelEvent::Restored { table } => observer.restored(table).await,
            };
            if let Err(e) = result {
                warn!(table = event.table(), error = %e, "Model observer failed");
            }
        }
    }
}

/// Clears the request tier wholesale and flushes the table's tag in the
/// external tier whenever a row is written
pub struct CacheInvalidator {
    request: Arc<RequestCache>,
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheInvalidator {
    pub fn new(request: Arc<RequestCache>, store: Option<Arc<dyn CacheStore>>) -> Self {
        Self { request, store }
    }

    pub async fn invalidate(&self, table: &str) -> CacheResult<()> {
        self.request.clear();
        if let Some(store) = &self.store {
            let removed = store.flush_tags(&[table.to_string()]).await?;
            debug!(table, removed, "Flushed cached query results");
        }
        Ok(())
    }
}

#[async_trait]
impl ModelObserver for CacheInvalidator {
    async fn saved(&self, table: &str) -> CacheResult<()> {
        self.invalidate(table).await
    }

    async fn deleted(&self, table: &str) -> CacheResult<()> {
        self.invalidate(table).await
    }

    async fn restored(&self, table: &str) -> CacheResult<()> {
        self.invalidate(table).await
    }
}
