//! Relation descriptors
//!
//! The closed set of association shapes an entity can declare, with the
//! structural facts (keys, pivot, morph discriminator) the compiler needs.

use serde::{Deserialize, Serialize};

/// Pivot table configuration for many-to-many relations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotConfig {
    pub table: String,
    /// Pivot column pointing at the owning (base) row
    pub foreign_pivot_key: String,
    /// Pivot column pointing at the related row
    pub related_pivot_key: String,
    /// Key on the owning entity (usually its primary key)
    pub parent_key: String,
    /// Key on the related entity (usually its primary key)
    pub related_key: String,
    /// Type discriminator for polymorphic pivots
    pub morph: Option<PivotMorph>,
}

/// Type discriminator on a polymorphic pivot table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotMorph {
    pub type_column: String,
    /// Value to match (defaults to the owning entity's morph class)
    pub type_value: Option<String>,
}

/// Polymorphic columns on the related table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MorphConfig {
    /// e.g. `commentable_type`
    pub type_column: String,
    /// e.g. `commentable_id`
    pub id_column: String,
    pub local_key: String,
}

impl MorphConfig {
    /// Columns named after a morph prefix (`commentable` -> `commentable_type`, `commentable_id`)
    pub fn from_name(name: &str) -> Self {
        Self {
            type_column: format!("{}_type", name),
            id_column: format!("{}_id", name),
            local_key: "id".to_string(),
        }
    }
}

/// Intermediate table of a has-many-through relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughConfig {
    pub table: String,
    /// Column on the intermediate table pointing at the owner
    pub first_key: String,
    /// Column on the related table pointing at the intermediate row
    pub second_key: String,
    /// Key on the owner
    pub local_key: String,
    /// Key on the intermediate table
    pub second_local_key: String,
}

impl ThroughConfig {
    /// `table` keyed to the owner by `first_key` and to the related rows by
    /// `second_key`; both local keys default to `id`
    pub fn new(table: &str, first_key: &str, second_key: &str) -> Self {
        Self {
            table: table.to_string(),
            first_key: first_key.to_string(),
            second_key: second_key.to_string(),
            local_key: "id".to_string(),
            second_local_key: "id".to_string(),
        }
    }
}

/// A declared association
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationDescriptor {
    /// Base row holds the foreign key
    BelongsTo {
        related: String,
        foreign_key: String,
        owner_key: String,
    },
    /// Related row holds the foreign key, at most one match
    HasOne {
        related: String,
        foreign_key: String,
        local_key: String,
    },
    /// Related rows hold the foreign key
    HasMany {
        related: String,
        foreign_key: String,
        local_key: String,
    },
    HasManyThrough {
        related: String,
        through: ThroughConfig,
    },
    BelongsToMany {
        related: String,
        pivot: PivotConfig,
    },
    MorphOne {
        related: String,
        morph: MorphConfig,
    },
    MorphMany {
        related: String,
        morph: MorphConfig,
    },
}

impl RelationDescriptor {
    pub fn belongs_to(related: &str, foreign_key: &str, owner_key: &str) -> Self {
        RelationDescriptor::BelongsTo {
            related: related.to_string(),
            foreign_key: foreign_key.to_string(),
            owner_key: owner_key.to_string(),
        }
    }

    pub fn has_one(related: &str, foreign_key: &str, local_key: &str) -> Self {
        RelationDescriptor::HasOne {
            related: related.to_string(),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
        }
    }

    pub fn has_many(related: &str, foreign_key: &str, local_key: &str) -> Self {
        RelationDescriptor::HasMany {
            related: related.to_string(),
            foreign_key: foreign_key.to_string(),
            local_key: local_key.to_string(),
        }
    }

    pub fn has_many_through(related: &str, through: ThroughConfig) -> Self {
        RelationDescriptor::HasManyThrough {
            related: related.to_string(),
            through,
        }
    }

    /// Many-to-many through `pivot_table`, keyed on both primary keys
    pub fn belongs_to_many(
        related: &str,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        RelationDescriptor::BelongsToMany {
            related: related.to_string(),
            pivot: PivotConfig {
                table: pivot_table.to_string(),
                foreign_pivot_key: foreign_pivot_key.to_string(),
                related_pivot_key: related_pivot_key.to_string(),
                parent_key: "id".to_string(),
                related_key: "id".to_string(),
                morph: None,
            },
        }
    }

    /// Polymorphic many-to-many (`taggables.taggable_type`)
    pub fn morph_to_many(related: &str, pivot_table: &str, name: &str, related_pivot_key: &str) -> Self {
        RelationDescriptor::BelongsToMany {
            related: related.to_string(),
            pivot: PivotConfig {
                table: pivot_table.to_string(),
                foreign_pivot_key: format!("{}_id", name),
                related_pivot_key: related_pivot_key.to_string(),
                parent_key: "id".to_string(),
                related_key: "id".to_string(),
                morph: Some(PivotMorph {
                    type_column: format!("{}_type", name),
                    type_value: None,
                }),
            },
        }
    }

    pub fn morph_one(related: &str, name: &str) -> Self {
        RelationDescriptor::MorphOne {
            related: related.to_string(),
            morph: MorphConfig::from_name(name),
        }
    }

    pub fn morph_many(related: &str, name: &str) -> Self {
        RelationDescriptor::MorphMany {
            related: related.to_string(),
            morph: MorphConfig::from_name(name),
        }
    }

    /// Type name of the related entity
    pub fn related(&self) -> &str {
        match self {
            RelationDescriptor::BelongsTo { related, .. }
            | RelationDescriptor::HasOne { related, .. }
            | RelationDescriptor::HasMany { related, .. }
            | RelationDescriptor::HasManyThrough { related, .. }
            | RelationDescriptor::BelongsToMany { related, .. }
            | RelationDescriptor::MorphOne { related, .. }
            | RelationDescriptor::MorphMany { related, .. } => related,
        }
    }

    /// Column on the base row the relation hangs off
    pub fn base_key(&self) -> &str {
        match self {
            RelationDescriptor::BelongsTo { foreign_key, .. } => foreign_key,
            RelationDescriptor::HasOne { local_key, .. }
            | RelationDescriptor::HasMany { local_key, .. } => local_key,
            RelationDescriptor::HasManyThrough { through, .. } => &through.local_key,
            RelationDescriptor::BelongsToMany { pivot, .. } => &pivot.parent_key,
            RelationDescriptor::MorphOne { morph, .. }
            | RelationDescriptor::MorphMany { morph, .. } => &morph.local_key,
        }
    }

    /// Whether the relation yields a list of related rows
    pub fn is_many(&self) -> bool {
        matches!(
            self,
            RelationDescriptor::HasMany { .. }
                | RelationDescriptor::HasManyThrough { .. }
                | RelationDescriptor::BelongsToMany { .. }
                | RelationDescriptor::MorphMany { .. }
        )
    }

    pub fn is_polymorphic(&self) -> bool {
        match self {
            RelationDescriptor::MorphOne { .. } | RelationDescriptor::MorphMany { .. } => true,
            RelationDescriptor::BelongsToMany { pivot, .. } => pivot.morph.is_some(),
            _ => false,
        }
    }

    /// Override the owning/related keys of a many-to-many pivot
    pub fn with_pivot_keys(mut self, parent_key: &str, related_key: &str) -> Self {
        if let RelationDescriptor::BelongsToMany { pivot, .. } = &mut self {
            pivot.parent_key = parent_key.to_string();
            pivot.related_key = related_key.to_string();
        }
        self
    }

    /// Override the local key of has-one, has-many and morph relations
    pub fn with_local_key(mut self, key: &str) -> Self {
        match &mut self {
            RelationDescriptor::HasOne { local_key, .. }
            | RelationDescriptor::HasMany { local_key, .. } => *local_key = key.to_string(),
            RelationDescriptor::MorphOne { morph, .. }
            | RelationDescriptor::MorphMany { morph, .. } => morph.local_key = key.to_string(),
            RelationDescriptor::HasManyThrough { through, .. } => through.local_key = key.to_string(),
            _ => {}
        }
        self
    }

    /// Pin the value matched against a morph type column
    pub fn with_morph_type(mut self, value: &str) -> Self {
        if let RelationDescriptor::BelongsToMany { pivot, .. } = &mut self {
            if let Some(morph) = pivot.morph.as_mut() {
                morph.type_value = Some(value.to_string());
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_keys() {
        assert_eq!(RelationDescriptor::belongs_to("User", "author_id", "id").base_key(), "author_id");
        assert_eq!(RelationDescriptor::has_many("Comment", "article_id", "id").base_key(), "id");
        assert_eq!(
            RelationDescriptor::belongs_to_many("Tag", "article_tag", "article_id", "tag_id")
                .with_pivot_keys("uuid", "id")
                .base_key(),
            "uuid"
        );
    }

    #[test]
    fn test_morph_helpers() {
        let relation = RelationDescriptor::morph_many("Comment", "commentable");
        match &relation {
            RelationDescriptor::MorphMany { morph, .. } => {
                assert_eq!(morph.type_column, "commentable_type");
                assert_eq!(morph.id_column, "commentable_id");
            }
            other => panic!("unexpected descriptor {:?}", other),
        }
        assert!(relation.is_polymorphic());
        assert!(relation.is_many());

        let tags = RelationDescriptor::morph_to_many("Tag", "taggables", "taggable", "tag_id");
        assert!(tags.is_polymorphic());
        assert_eq!(tags.related(), "Tag");
    }
}
