//! Relation classification
//!
//! Maps a requested relation name to a [`RelationKind`]. Classification is
//! total: an undeclared relation is reported and treated as single, leaving
//! the compiler to reject it when SQL has to be generated.

use tracing::warn;

use super::descriptor::RelationDescriptor;
use super::spec::RelationKind;
use crate::entity::EntityDescriptor;

/// Kind of the relation `name` declared on `entity`
pub fn classify(entity: &dyn EntityDescriptor, name: &str) -> RelationKind {
    if name.contains('.') {
        return RelationKind::Nested;
    }

    match entity.relation(name) {
        Some(descriptor) => kind_of(&descriptor),
        None => {
            warn!(
                entity = entity.type_name(),
                relation = name,
                "Relation is not declared; classifying as single"
            );
            RelationKind::Single
        }
    }
}

/// Kind implied by a descriptor
pub fn kind_of(descriptor: &RelationDescriptor) -> RelationKind {
    match descriptor {
        RelationDescriptor::BelongsToMany { .. } => RelationKind::ManyToMany,
        RelationDescriptor::HasMany { .. }
        | RelationDescriptor::HasManyThrough { .. }
        | RelationDescriptor::MorphMany { .. } => RelationKind::Collection,
        RelationDescriptor::BelongsTo { .. } | RelationDescriptor::HasOne { .. } => {
            RelationKind::Single
        }
        RelationDescriptor::MorphOne { .. } => RelationKind::Polymorphic,
    }
}
