//! Relation-to-subquery compiler

pub mod buffer;
pub mod columns;
pub mod source;
pub mod subquery;

pub use buffer::{CompiledFragment, SqlBuffer};
pub use columns::{resolve_columns, ResolvedColumns};
pub use source::{Link, RelationSource};
pub use subquery::{Shape, SubqueryCompiler, AGGREGATE_ALIAS, OWNER_KEY_ALIAS};

use crate::dialect::Dialect;
use crate::entity::EntityRegistry;
use crate::translation::TranslationResolver;

/// Everything a compilation pass reads
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub dialect: Dialect,
    pub registry: &'a EntityRegistry,
    pub translations: &'a TranslationResolver,
    /// Locale for translation joins
    pub locale: Option<&'a str>,
}
