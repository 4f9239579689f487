//! Translation resolver
//!
//! Localizable entities keep their translated columns in a satellite table
//! (`<singular>_translations` by default) keyed by the owner's primary key and
//! a locale column. The resolver turns an entity's [`TranslationSchema`] into
//! concrete [`TranslationMetadata`] and memoizes the result per entity type
//! until [`TranslationResolver::clear`] is called. Schema changes made while
//! the process runs are not observed before that.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::entity::EntityDescriptor;

/// Default name of the locale column in satellite tables
pub const DEFAULT_LOCALE_COLUMN: &str = "locale";

/// Translation declaration carried by an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationSchema {
    /// Columns stored in the satellite table
    pub fields: Vec<String>,
    /// Satellite table (derived from the owner table when unset)
    pub table: Option<String>,
    /// Column in the satellite table referencing the owner (derived when unset)
    pub foreign_key: Option<String>,
    pub locale_column: String,
}

impl TranslationSchema {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            table: None,
            foreign_key: None,
            locale_column: DEFAULT_LOCALE_COLUMN.to_string(),
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn with_foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.to_string());
        self
    }

    pub fn with_locale_column(mut self, column: &str) -> Self {
        self.locale_column = column.to_string();
        self
    }
}

/// Resolved translation facts for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationMetadata {
    pub fields: Vec<String>,
    pub satellite_table: String,
    pub foreign_key: String,
    pub locale_column: String,
}

impl TranslationMetadata {
    pub fn is_translatable(&self, column: &str) -> bool {
        self.fields.iter().any(|f| f == column)
    }
}

/// Process-wide memo of translation metadata
#[derive(Debug, Default)]
pub struct TranslationResolver {
    resolved: DashMap<String, Option<Arc<TranslationMetadata>>>,
}

impl TranslationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translation metadata for an entity, or None when it is not localizable
    pub fn resolve(&self, entity: &dyn EntityDescriptor) -> Option<Arc<TranslationMetadata>> {
        if let Some(cached) = self.resolved.get(entity.type_name()) {
            return cached.value().clone();
        }

        let metadata = entity
            .translation()
            .filter(|schema| !schema.fields.is_empty())
            .map(|schema| Arc::new(Self::build(entity, schema)));

        self.resolved
            .entry(entity.type_name().to_string())
            .or_insert(metadata)
            .value()
            .clone()
    }

    /// Whether the entity has localizable columns
    pub fn is_translatable(&self, entity: &dyn EntityDescriptor) -> bool {
        self.resolve(entity).is_some()
    }

    /// Drop every memoized entry
    pub fn clear(&self) {
        self.resolved.clear();
    }

    /// Drop the memoized entry of one entity type
    pub fn forget(&self, type_name: &str) {
        self.resolved.remove(type_name);
    }

    pub fn cached_count(&self) -> usize {
        self.resolved.len()
    }

    fn build(entity: &dyn EntityDescriptor, schema: TranslationSchema) -> TranslationMetadata {
        let singular = singularize(entity.table());
        TranslationMetadata {
            satellite_table: schema
                .table
                .unwrap_or_else(|| format!("{}_translations", singular)),
            foreign_key: schema
                .foreign_key
                .unwrap_or_else(|| format!("{}_{}", singular, entity.primary_key())),
            locale_column: schema.locale_column,
            fields: schema.fields,
        }
    }
}

/// Naive English singular of a table name (`categories` -> `category`)
fn singularize(table: &str) -> String {
    if let Some(stem) = table.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = table.strip_suffix("ses") {
        format!("{}s", stem)
    } else if let Some(stem) = table.strip_suffix('s') {
        stem.to_string()
    } else {
        table.to_string()
    }
}
