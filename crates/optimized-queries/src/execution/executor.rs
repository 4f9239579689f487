//! Statement executors
//!
//! The only database seam of the crate: run one statement with positional
//! bindings and return raw rows.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Postgres, Row, Sqlite, TypeInfo};
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::error::ExecutionError;
use crate::plan::CompiledStatement;
use crate::value::{DatabaseValue, ResultRow};

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// SQL flavour the executor speaks
    fn dialect(&self) -> Dialect;

    /// Run `statement` and return every row, applying the statement timeout
    /// when the dialect supports one
    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        timeout: Option<Duration>,
    ) -> Result<Vec<ResultRow>, ExecutionError>;
}

/// SQLite executor over a sqlx pool
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        timeout: Option<Duration>,
    ) -> Result<Vec<ResultRow>, ExecutionError> {
        if let Some(timeout) = timeout {
            debug!(timeout_ms = timeout.as_millis() as u64, "SQLite has no statement timeout; ignoring");
        }

        let mut query = sqlx::query::<Sqlite>(&statement.sql);
        for value in &statement.bindings {
            query = bind_sqlite_value(query, value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(sqlite_row_to_result).collect())
    }
}

fn bind_sqlite_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        // SQLite has no native UUID or JSON type
        DatabaseValue::Uuid(u) => query.bind(u.to_string()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.to_string()),
    }
}

/// Convert a SQLite row, trying storage classes in turn
fn sqlite_row_to_result(row: &SqliteRow) -> ResultRow {
    let mut result = ResultRow::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(value) = row.try_get::<Option<i64>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()))
        } else if let Ok(value) = row.try_get::<Option<f64>, _>(i) {
            value.map_or(JsonValue::Null, |v| {
                serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number)
            })
        } else if let Ok(value) = row.try_get::<Option<String>, _>(i) {
            value.map_or(JsonValue::Null, JsonValue::String)
        } else if let Ok(value) = row.try_get::<Option<bool>, _>(i) {
            value.map_or(JsonValue::Null, JsonValue::Bool)
        } else if let Ok(value) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
            value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()))
        } else if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(i) {
            value.map_or(JsonValue::Null, |v| {
                JsonValue::String(String::from_utf8_lossy(&v).into_owned())
            })
        } else {
            warn!(column = column.name(), "Unsupported SQLite column type, reading as null");
            JsonValue::Null
        };

        result.insert(column.name().to_string(), value);
    }

    result
}

/// PostgreSQL executor over a sqlx pool.
///
/// With a timeout, the statement runs on a dedicated connection between
/// `SET statement_timeout` and `RESET statement_timeout`.
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SqlExecutor for PostgresExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSQL
    }

    async fn fetch_all(
        &self,
        statement: &CompiledStatement,
        timeout: Option<Duration>,
    ) -> Result<Vec<ResultRow>, ExecutionError> {
        let mut query = sqlx::query::<Postgres>(&statement.sql);
        for value in &statement.bindings {
            query = bind_postgres_value(query, value);
        }

        let pragma = timeout.and_then(|t| self.dialect().statement_timeout_sql(t));
        let Some(pragma) = pragma else {
            let rows = query.fetch_all(&self.pool).await?;
            return rows.iter().map(postgres_row_to_result).collect();
        };

        let mut conn = self.pool.acquire().await?;
        sqlx::query(&pragma).execute(&mut *conn).await?;
        let result = query.fetch_all(&mut *conn).await;
        if let Err(e) = sqlx::query("RESET statement_timeout").execute(&mut *conn).await {
            warn!(error = %e, "Failed to reset statement timeout");
        }

        result?.iter().map(postgres_row_to_result).collect()
    }
}

fn bind_postgres_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

fn postgres_value<'r, T>(
    row: &'r PgRow,
    index: usize,
    convert: impl FnOnce(T) -> JsonValue,
) -> Result<JsonValue, ExecutionError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    Ok(row.try_get::<Option<T>, _>(index)?.map_or(JsonValue::Null, convert))
}

/// How a PostgreSQL column is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgColumn {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Json,
    Bytes,
    Text,
    Unsupported,
}

fn pg_column(type_name: &str) -> PgColumn {
    match type_name {
        "BOOL" => PgColumn::Bool,
        "INT2" => PgColumn::Int2,
        "INT4" => PgColumn::Int4,
        "INT8" => PgColumn::Int8,
        "FLOAT4" => PgColumn::Float4,
        "FLOAT8" => PgColumn::Float8,
        "UUID" => PgColumn::Uuid,
        "TIMESTAMPTZ" => PgColumn::TimestampTz,
        "TIMESTAMP" => PgColumn::Timestamp,
        "DATE" => PgColumn::Date,
        "JSON" | "JSONB" => PgColumn::Json,
        "BYTEA" => PgColumn::Bytes,
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "CITEXT" => PgColumn::Text,
        _ => PgColumn::Unsupported,
    }
}

/// Convert a PostgreSQL row by column type name
fn postgres_row_to_result(row: &PgRow) -> Result<ResultRow, ExecutionError> {
    let mut result = ResultRow::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let value = match pg_column(type_name) {
            PgColumn::Bool => postgres_value(row, i, JsonValue::Bool)?,
            PgColumn::Int2 => postgres_value(row, i, |v: i16| JsonValue::Number(v.into()))?,
            PgColumn::Int4 => postgres_value(row, i, |v: i32| JsonValue::Number(v.into()))?,
            PgColumn::Int8 => postgres_value(row, i, |v: i64| JsonValue::Number(v.into()))?,
            PgColumn::Float4 => postgres_value(row, i, |v: f32| {
                serde_json::Number::from_f64(v as f64).map_or(JsonValue::Null, JsonValue::Number)
            })?,
            PgColumn::Float8 => postgres_value(row, i, |v: f64| {
                serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number)
            })?,
            PgColumn::Uuid => postgres_value(row, i, |v: uuid::Uuid| JsonValue::String(v.to_string()))?,
            PgColumn::TimestampTz => postgres_value(row, i, |v: chrono::DateTime<chrono::Utc>| {
                JsonValue::String(v.to_rfc3339())
            })?,
            PgColumn::Timestamp => {
                postgres_value(row, i, |v: chrono::NaiveDateTime| JsonValue::String(v.to_string()))?
            }
            PgColumn::Date => postgres_value(row, i, |v: chrono::NaiveDate| JsonValue::String(v.to_string()))?,
            PgColumn::Json => postgres_value(row, i, |v: JsonValue| v)?,
            PgColumn::Bytes => postgres_value(row, i, |v: Vec<u8>| JsonValue::String(hex::encode(v)))?,
            PgColumn::Text => postgres_value(row, i, JsonValue::String)?,
            PgColumn::Unsupported => {
                warn!(
                    column = column.name(),
                    pg_type = type_name,
                    "Unsupported PostgreSQL column type, reading as null; cast it in the select list"
                );
                JsonValue::Null
            }
        };
        result.insert(column.name().to_string(), value);
    }

    Ok(result)
}
