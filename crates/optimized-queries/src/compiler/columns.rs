//! Column resolution for projected relations

use crate::compiler::SqlBuffer;
use crate::entity::{all_columns, EntityDescriptor};
use crate::error::CompileError;
use crate::relations::ColumnSelection;
use crate::security::validate_identifier;
use crate::translation::TranslationMetadata;

/// Columns split by the table they are read from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedColumns {
    /// Read from the entity's own table
    pub main: Vec<String>,
    /// Read from the translation join
    pub translated: Vec<String>,
}

impl ResolvedColumns {
    /// All output column names, main columns first
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.main.iter().chain(self.translated.iter()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.translated.is_empty()
    }
}

/// Expand a selection for `entity`.
///
/// `*` means key, declared columns and timestamps (plus translated fields
/// when `translation` is given). Translatable columns never come from the
/// main table: they move to `translated` when a translation join is active
/// and are dropped otherwise.
pub fn resolve_columns(
    entity: &dyn EntityDescriptor,
    selection: &ColumnSelection,
    translation: Option<&TranslationMetadata>,
) -> Result<ResolvedColumns, CompileError> {
    let mut requested = match selection {
        ColumnSelection::All => all_columns(entity),
        ColumnSelection::Columns(columns) => columns.clone(),
    };

    if let (ColumnSelection::All, Some(meta)) = (selection, translation) {
        for field in &meta.fields {
            if !requested.contains(field) {
                requested.push(field.clone());
            }
        }
    }

    let translatable = entity.translation().map(|schema| schema.fields).unwrap_or_default();
    let mut resolved = ResolvedColumns::default();

    for column in requested {
        validate_identifier(&column)?;
        if translatable.contains(&column) {
            if translation.is_some() && !resolved.translated.contains(&column) {
                resolved.translated.push(column);
            }
        } else if !resolved.main.contains(&column) {
            resolved.main.push(column);
        }
    }

    Ok(resolved)
}

/// Write `json_object('col', "alias"."col", ...)` for resolved columns
pub fn write_json_object(
    buf: &mut SqlBuffer,
    alias: &str,
    translation_alias: &str,
    columns: &ResolvedColumns,
) -> Result<(), CompileError> {
    let function = buf.dialect().json_object_fn();
    buf.push(function).push("(");

    let pairs = columns
        .main
        .iter()
        .map(|c| (c, alias))
        .chain(columns.translated.iter().map(|c| (c, translation_alias)));

    for (i, (column, source)) in pairs.enumerate() {
        if i > 0 {
            buf.push(", ");
        }
        // Keys are validated identifiers, safe to inline as literals
        buf.push("'").push(column).push("', ");
        buf.push_qualified(source, column)?;
    }

    buf.push(")");
    Ok(())
}

/// Write `json_object(...)` over a derived table exposing every column by name
pub fn write_json_object_flat(
    buf: &mut SqlBuffer,
    alias: &str,
    columns: &ResolvedColumns,
) -> Result<(), CompileError> {
    let function = buf.dialect().json_object_fn();
    buf.push(function).push("(");
    for (i, column) in columns.names().enumerate() {
        if i > 0 {
            buf.push(", ");
        }
        buf.push("'").push(column).push("', ");
        buf.push_qualified(alias, column)?;
    }
    buf.push(")");
    Ok(())
}

/// Write a plain column list, aliasing translated columns to their own name
pub fn write_select_list(
    buf: &mut SqlBuffer,
    alias: &str,
    translation_alias: &str,
    columns: &ResolvedColumns,
) -> Result<(), CompileError> {
    let mut first = true;
    for column in &columns.main {
        if !first {
            buf.push(", ");
        }
        first = false;
        buf.push_qualified(alias, column)?;
    }
    for column in &columns.translated {
        if !first {
            buf.push(", ");
        }
        first = false;
        buf.push_qualified(translation_alias, column)?;
        buf.push(" AS ").push_identifier(column)?;
    }
    Ok(())
}
