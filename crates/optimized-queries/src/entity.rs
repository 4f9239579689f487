//! Entity metadata
//!
//! The optimizer never owns model definitions. It reads them through
//! [`EntityDescriptor`], which a host ORM implements for its models, or
//! through [`EntityMeta`], a plain declarative description for callers
//! without one. Related entities are referenced by type name and resolved
//! through an [`EntityRegistry`].

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::error::CompileError;
use crate::relations::RelationDescriptor;
use crate::translation::TranslationSchema;

/// Column written by timestamped entities on insert
pub const CREATED_AT: &str = "created_at";
/// Column written by timestamped entities on update
pub const UPDATED_AT: &str = "updated_at";
/// Soft-delete marker column
pub const DELETED_AT: &str = "deleted_at";

/// Read-only view of a record type
pub trait EntityDescriptor: Send + Sync + fmt::Debug {
    /// Type name used for registry lookups and cache keys
    fn type_name(&self) -> &str;

    /// Table name
    fn table(&self) -> &str;

    /// Primary key column
    fn primary_key(&self) -> &str {
        "id"
    }

    /// Columns declared by the model (excluding the key and timestamps)
    fn declared_columns(&self) -> Vec<String>;

    fn uses_timestamps(&self) -> bool {
        false
    }

    fn uses_soft_deletes(&self) -> bool {
        false
    }

    /// Relation declared under `name`, if any
    fn relation(&self, name: &str) -> Option<RelationDescriptor>;

    /// Localizable columns and their satellite table, if any
    fn translation(&self) -> Option<TranslationSchema> {
        None
    }

    /// Value stored in morph type columns that point at this entity
    fn morph_class(&self) -> String {
        self.type_name().to_string()
    }
}

/// Declarative entity description
#[derive(Debug, Clone)]
pub struct EntityMeta {
    type_name: String,
    table: String,
    primary_key: String,
    columns: Vec<String>,
    timestamps: bool,
    soft_deletes: bool,
    relations: IndexMap<String, RelationDescriptor>,
    translation: Option<TranslationSchema>,
    morph_class: Option<String>,
}

impl EntityMeta {
    pub fn new(type_name: &str, table: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            timestamps: false,
            soft_deletes: false,
            relations: IndexMap::new(),
            translation: None,
            morph_class: None,
        }
    }

    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn with_soft_deletes(mut self, enabled: bool) -> Self {
        self.soft_deletes = enabled;
        self
    }

    pub fn with_relation(mut self, name: &str, descriptor: RelationDescriptor) -> Self {
        self.relations.insert(name.to_string(), descriptor);
        self
    }

    pub fn with_translation(mut self, schema: TranslationSchema) -> Self {
        self.translation = Some(schema);
        self
    }

    pub fn with_morph_class(mut self, class: &str) -> Self {
        self.morph_class = Some(class.to_string());
        self
    }
}

impl EntityDescriptor for EntityMeta {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn declared_columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    fn uses_soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    fn relation(&self, name: &str) -> Option<RelationDescriptor> {
        self.relations.get(name).cloned()
    }

    fn translation(&self) -> Option<TranslationSchema> {
        self.translation.clone()
    }

    fn morph_class(&self) -> String {
        self.morph_class
            .clone()
            .unwrap_or_else(|| self.type_name.clone())
    }
}

/// Every column a `*` selection expands to: key, declared columns and
/// timestamps, without duplicates, in that order.
pub fn all_columns(entity: &dyn EntityDescriptor) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    let mut push = |column: String| {
        if !columns.contains(&column) {
            columns.push(column);
        }
    };

    push(entity.primary_key().to_string());
    for column in entity.declared_columns() {
        push(column);
    }
    if entity.uses_timestamps() {
        push(CREATED_AT.to_string());
        push(UPDATED_AT.to_string());
    }

    columns
}

/// Whether `column` exists on the entity's table
pub fn has_column(entity: &dyn EntityDescriptor, column: &str) -> bool {
    all_columns(entity).iter().any(|c| c == column)
        || (entity.uses_soft_deletes() && column == DELETED_AT)
}

/// Registry of entity descriptors keyed by type name
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: DashMap<String, Arc<dyn EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity, replacing any previous entry with the same name
    pub fn register<E>(&self, entity: E) -> Arc<dyn EntityDescriptor>
    where
        E: EntityDescriptor + 'static,
    {
        let entity: Arc<dyn EntityDescriptor> = Arc::new(entity);
        self.entities
            .insert(entity.type_name().to_string(), Arc::clone(&entity));
        entity
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn EntityDescriptor>> {
        self.entities.get(type_name).map(|e| Arc::clone(e.value()))
    }

    /// Resolve an entity or fail compilation
    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn EntityDescriptor>, CompileError> {
        self.get(type_name)
            .ok_or_else(|| CompileError::UnknownEntity(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entities.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> EntityMeta {
        EntityMeta::new("Article", "articles")
            .with_columns(["title", "id", "published"])
            .with_timestamps(true)
            .with_relation("author", RelationDescriptor::belongs_to("User", "author_id", "id"))
    }

    #[test]
    fn test_all_columns_expands_key_and_timestamps() {
        let entity = article();
        assert_eq!(
            all_columns(&entity),
            vec!["id", "title", "published", "created_at", "updated_at"]
        );
    }

    #[test]
    fn test_has_column() {
        let entity = article().with_soft_deletes(true);
        assert!(has_column(&entity, "title"));
        assert!(has_column(&entity, "deleted_at"));
        assert!(!has_column(&entity, "missing"));
    }

    #[test]
    fn test_registry_resolution() {
        let registry = EntityRegistry::new();
        registry.register(article());

        assert!(registry.contains("Article"));
        assert_eq!(registry.resolve("Article").unwrap().table(), "articles");
        assert_eq!(
            registry.resolve("Missing").unwrap_err(),
            CompileError::UnknownEntity("Missing".to_string())
        );
    }

    #[test]
    fn test_morph_class_defaults_to_type_name() {
        assert_eq!(article().morph_class(), "Article");
        assert_eq!(article().with_morph_class("post").morph_class(), "post");
    }
}
