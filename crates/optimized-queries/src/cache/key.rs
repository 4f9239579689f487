//! Cache key derivation
//!
//! Keys hash every plan facet that changes the row set, in builder order:
//! two plans requesting the same relations in a different order get
//! different keys.

use blake3::Hasher;
use serde::Serialize;

use crate::error::CacheResult;
use crate::filter::OrderBy;
use crate::plan::{CompiledStatement, QueryPlan, SearchSpec};
use crate::relations::{AggregateSpec, ColumnSelection, CountSpec, RelationSpec};
use crate::value::DatabaseValue;

#[derive(Serialize)]
struct KeyMaterial<'a> {
    entity: &'a str,
    relations: &'a [RelationSpec],
    counts: &'a [CountSpec],
    aggregates: &'a [AggregateSpec],
    columns: &'a ColumnSelection,
    order: &'a [OrderBy],
    limit: Option<u64>,
    offset: Option<u64>,
    search: Option<&'a SearchSpec>,
    locale: Option<&'a str>,
    sql: &'a str,
    bindings: &'a [DatabaseValue],
}

/// `<prefix>:<table>:<blake3 hex>` for a plan and its compiled base statement
pub fn derive_cache_key(prefix: &str, plan: &QueryPlan, statement: &CompiledStatement) -> CacheResult<String> {
    let material = KeyMaterial {
        entity: plan.entity.type_name(),
        relations: &plan.relations,
        counts: &plan.counts,
        aggregates: &plan.aggregates,
        columns: &plan.columns,
        order: &plan.order,
        limit: plan.limit,
        offset: plan.offset,
        search: plan.search.as_ref(),
        locale: plan.locale.as_deref(),
        sql: &statement.sql,
        bindings: &statement.bindings,
    };

    let mut hasher = Hasher::new();
    hasher.update(&serde_json::to_vec(&material)?);
    let hash = hasher.finalize();

    Ok(format!("{}:{}:{}", prefix, plan.entity.table(), hex::encode(hash.as_bytes())))
}
