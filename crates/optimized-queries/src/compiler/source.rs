//! FROM/WHERE scaffolding shared by every relation subquery
//!
//! A [`RelationSource`] knows which tables a relation reads, how they are
//! joined, and which column links the related rows back to their owner.
//! The link is either correlated to the outer row or, for the per-relation
//! fallback, an explicit list of owner keys.

use std::sync::Arc;

use crate::compiler::{CompileContext, SqlBuffer};
use crate::entity::{EntityDescriptor, DELETED_AT};
use crate::error::CompileError;
use crate::relations::RelationDescriptor;
use crate::translation::TranslationMetadata;
use crate::value::DatabaseValue;

/// How related rows are tied to their owners
#[derive(Debug, Clone, Copy)]
pub enum Link<'a> {
    /// Correlated to the outer statement's row
    Correlated { base_alias: &'a str },
    /// `owner IN (...)`
    Keys(&'a [DatabaseValue]),
}

#[derive(Debug, Clone)]
pub struct RelationSource {
    pub name: String,
    pub descriptor: RelationDescriptor,
    pub related: Arc<dyn EntityDescriptor>,
    /// Present only when a locale is set and the related entity is localizable
    pub translation: Option<Arc<TranslationMetadata>>,
}

impl RelationSource {
    /// Resolve relation `name` on `base`
    pub fn resolve(
        ctx: &CompileContext<'_>,
        base: &dyn EntityDescriptor,
        name: &str,
        with_translation: bool,
    ) -> Result<Self, CompileError> {
        let descriptor = base
            .relation(name)
            .ok_or_else(|| CompileError::UnknownRelation {
                entity: base.type_name().to_string(),
                relation: name.to_string(),
            })?;
        let related = ctx.registry.resolve(descriptor.related())?;
        let translation = if with_translation && ctx.locale.is_some() {
            ctx.translations.resolve(related.as_ref())
        } else {
            None
        };

        Ok(Self {
            name: name.to_string(),
            descriptor,
            related,
            translation,
        })
    }

    /// Alias of the related table
    pub fn alias(&self) -> String {
        format!("{}_rel", self.name)
    }

    pub fn pivot_alias(&self) -> String {
        format!("{}_pivot", self.name)
    }

    pub fn through_alias(&self) -> String {
        format!("{}_through", self.name)
    }

    pub fn translation_alias(&self) -> String {
        format!("{}_trans", self.name)
    }

    /// Localized field names; empty without a translation join
    pub fn translated_fields(&self) -> &[String] {
        match &self.translation {
            Some(meta) => &meta.fields,
            None => &[],
        }
    }

    /// `(qualifier, column)` on the relation side matched against the owner key
    pub fn owner_column(&self) -> (String, String) {
        match &self.descriptor {
            RelationDescriptor::BelongsTo { owner_key, .. } => (self.alias(), owner_key.clone()),
            RelationDescriptor::HasOne { foreign_key, .. }
            | RelationDescriptor::HasMany { foreign_key, .. } => (self.alias(), foreign_key.clone()),
            RelationDescriptor::MorphOne { morph, .. }
            | RelationDescriptor::MorphMany { morph, .. } => (self.alias(), morph.id_column.clone()),
            RelationDescriptor::BelongsToMany { pivot, .. } => {
                (self.pivot_alias(), pivot.foreign_pivot_key.clone())
            }
            RelationDescriptor::HasManyThrough { through, .. } => {
                (self.through_alias(), through.first_key.clone())
            }
        }
    }

    /// Write ` FROM ...` with pivot/through and translation joins
    pub fn write_from(&self, buf: &mut SqlBuffer, locale: Option<&str>) -> Result<(), CompileError> {
        let alias = self.alias();

        match &self.descriptor {
            RelationDescriptor::BelongsToMany { pivot, .. } => {
                let pivot_alias = self.pivot_alias();
                buf.push(" FROM ").push_identifier(&pivot.table)?;
                buf.push(" AS ").push_identifier(&pivot_alias)?;
                buf.push(" INNER JOIN ").push_identifier(self.related.table())?;
                buf.push(" AS ").push_identifier(&alias)?;
                buf.push(" ON ").push_qualified(&alias, &pivot.related_key)?;
                buf.push(" = ").push_qualified(&pivot_alias, &pivot.related_pivot_key)?;
            }
            RelationDescriptor::HasManyThrough { through, .. } => {
                let through_alias = self.through_alias();
                buf.push(" FROM ").push_identifier(self.related.table())?;
                buf.push(" AS ").push_identifier(&alias)?;
                buf.push(" INNER JOIN ").push_identifier(&through.table)?;
                buf.push(" AS ").push_identifier(&through_alias)?;
                buf.push(" ON ").push_qualified(&through_alias, &through.second_local_key)?;
                buf.push(" = ").push_qualified(&alias, &through.second_key)?;
            }
            _ => {
                buf.push(" FROM ").push_identifier(self.related.table())?;
                buf.push(" AS ").push_identifier(&alias)?;
            }
        }

        if let (Some(meta), Some(locale)) = (&self.translation, locale) {
            write_translation_join(
                buf,
                &alias,
                self.related.primary_key(),
                meta,
                &self.translation_alias(),
                locale,
            )?;
        }

        Ok(())
    }

    /// Write the owner link, morph discriminator and soft-delete scope
    /// (no leading WHERE)
    pub fn write_scope(
        &self,
        buf: &mut SqlBuffer,
        base: &dyn EntityDescriptor,
        link: Link<'_>,
    ) -> Result<(), CompileError> {
        let (owner_qualifier, owner_column) = self.owner_column();

        match link {
            Link::Correlated { base_alias } => {
                buf.push_qualified(&owner_qualifier, &owner_column)?;
                buf.push(" = ").push_qualified(base_alias, self.descriptor.base_key())?;
            }
            Link::Keys(keys) if keys.is_empty() => {
                buf.push("1 = 0");
            }
            Link::Keys(keys) => {
                buf.push_qualified(&owner_qualifier, &owner_column)?;
                buf.push(" IN (").push_bind_list(keys.iter().cloned()).push(")");
            }
        }

        match &self.descriptor {
            RelationDescriptor::MorphOne { morph, .. } | RelationDescriptor::MorphMany { morph, .. } => {
                buf.push(" AND ").push_qualified(&self.alias(), &morph.type_column)?;
                buf.push(" = ").push_bind(DatabaseValue::String(base.morph_class()));
            }
            RelationDescriptor::BelongsToMany { pivot, .. } => {
                if let Some(morph) = &pivot.morph {
                    let value = morph.type_value.clone().unwrap_or_else(|| base.morph_class());
                    buf.push(" AND ").push_qualified(&self.pivot_alias(), &morph.type_column)?;
                    buf.push(" = ").push_bind(DatabaseValue::String(value));
                }
            }
            _ => {}
        }

        if self.related.uses_soft_deletes() {
            buf.push(" AND ").push_qualified(&self.alias(), DELETED_AT)?;
            buf.push(" IS NULL");
        }

        Ok(())
    }
}

/// ` LEFT JOIN <satellite> AS <alias> ON owner.pk = alias.fk AND alias.locale = ?`
pub fn write_translation_join(
    buf: &mut SqlBuffer,
    owner_alias: &str,
    owner_key: &str,
    meta: &TranslationMetadata,
    alias: &str,
    locale: &str,
) -> Result<(), CompileError> {
    buf.push(" LEFT JOIN ").push_identifier(&meta.satellite_table)?;
    buf.push(" AS ").push_identifier(alias)?;
    buf.push(" ON ").push_qualified(owner_alias, owner_key)?;
    buf.push(" = ").push_qualified(alias, &meta.foreign_key)?;
    buf.push(" AND ").push_qualified(alias, &meta.locale_column)?;
    buf.push(" = ").push_bind(DatabaseValue::String(locale.to_string()));
    Ok(())
}
