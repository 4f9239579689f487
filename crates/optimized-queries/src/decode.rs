//! Result decoding
//!
//! Relation columns arrive as JSON text produced by the subqueries (or as
//! already structured values from the fallback loader). The decoder parses
//! them into nested values and produces one of three output shapes.
//! Decoding never fails on relation data: malformed or absent JSON becomes
//! the empty value of the relation's shape.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::compiler::Shape;
use crate::error::{QueryError, QueryResult};
use crate::value::ResultRow;

/// Output shape selected on the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Plain mappings
    Array,
    /// Read-only records
    Object,
    /// Typed entities with loaded relations
    Entity,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OutputFormat::Array => write!(f, "array"),
            OutputFormat::Object => write!(f, "object"),
            OutputFormat::Entity => write!(f, "entity"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "array" => Ok(OutputFormat::Array),
            "object" => Ok(OutputFormat::Object),
            "entity" | "model" => Ok(OutputFormat::Entity),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// A relation column and the shape it decodes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSlot {
    pub alias: String,
    pub shape: Shape,
}

/// Relation columns of a compiled plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeLayout {
    relations: Vec<RelationSlot>,
}

impl DecodeLayout {
    pub fn new(relations: Vec<RelationSlot>) -> Self {
        Self { relations }
    }

    pub fn slots(&self) -> &[RelationSlot] {
        &self.relations
    }

    pub fn shape_of(&self, alias: &str) -> Option<Shape> {
        self.relations.iter().find(|slot| slot.alias == alias).map(|slot| slot.shape)
    }

    pub fn is_relation(&self, alias: &str) -> bool {
        self.shape_of(alias).is_some()
    }
}

/// Plain mapping of columns and relation names to values
pub type Record = IndexMap<String, JsonValue>;

/// Read-only record with typed field access
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ObjectRecord {
    fields: Record,
}

impl ObjectRecord {
    pub fn new(fields: Record) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    /// Deserialize one field
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> QueryResult<Option<T>> {
        match self.fields.get(field) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn as_record(&self) -> &Record {
        &self.fields
    }

    pub fn into_record(self) -> Record {
        self.fields
    }
}

/// Relations attached to a hydrated entity, all marked as loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LoadedRelations {
    values: IndexMap<String, JsonValue>,
}

impl LoadedRelations {
    pub fn is_loaded(&self, relation: &str) -> bool {
        self.values.contains_key(relation)
    }

    pub fn get(&self, relation: &str) -> Option<&JsonValue> {
        self.values.get(relation)
    }

    /// Deserialize a loaded relation (a single related entity, `Option<T>`,
    /// or a `Vec<T>` for collections)
    pub fn relation<T: DeserializeOwned>(&self, relation: &str) -> QueryResult<T> {
        let value = self
            .values
            .get(relation)
            .ok_or_else(|| QueryError::Decode(format!("relation '{}' was not loaded", relation)))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A typed entity built from a row, with its eager-loaded relations
#[derive(Debug, Clone, PartialEq)]
pub struct Hydrated<E> {
    pub entity: E,
    pub relations: LoadedRelations,
}

impl<E> Hydrated<E> {
    pub fn relation<T: DeserializeOwned>(&self, relation: &str) -> QueryResult<T> {
        self.relations.relation(relation)
    }

    pub fn is_loaded(&self, relation: &str) -> bool {
        self.relations.is_loaded(relation)
    }

    pub fn into_inner(self) -> E {
        self.entity
    }
}

/// Result of `fetch`, in the shape the query asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Output<E> {
    Array(Vec<Record>),
    Object(Vec<ObjectRecord>),
    Entity(Vec<Hydrated<E>>),
}

impl<E> Output<E> {
    pub fn format(&self) -> OutputFormat {
        match self {
            Output::Array(_) => OutputFormat::Array,
            Output::Object(_) => OutputFormat::Object,
            Output::Entity(_) => OutputFormat::Entity,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Output::Array(rows) => rows.len(),
            Output::Object(rows) => rows.len(),
            Output::Entity(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Empty value of a relation shape
pub fn empty_value(shape: Shape) -> JsonValue {
    match shape {
        Shape::One => JsonValue::Null,
        Shape::Many => JsonValue::Array(Vec::new()),
    }
}

/// Decode one relation value
pub fn decode_value(alias: &str, value: JsonValue, shape: Shape) -> JsonValue {
    let parsed = match value {
        JsonValue::String(text) => match serde_json::from_str::<JsonValue>(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(relation = alias, error = %err, "Malformed relation JSON, using empty value");
                return empty_value(shape);
            }
        },
        other => other,
    };

    match (shape, parsed) {
        (Shape::Many, JsonValue::Array(items)) => JsonValue::Array(items),
        (Shape::One, JsonValue::Object(fields)) => JsonValue::Object(fields),
        // Some drivers aggregate a single row as a one-element array
        (Shape::One, JsonValue::Array(mut items)) if items.len() == 1 => items.remove(0),
        (shape, JsonValue::Null) => empty_value(shape),
        (shape, other) => {
            warn!(relation = alias, value = %other, "Unexpected relation value, using empty value");
            empty_value(shape)
        }
    }
}

/// Turns raw rows into records following a [`DecodeLayout`]
#[derive(Debug, Clone, Copy)]
pub struct ResultDecoder<'a> {
    layout: &'a DecodeLayout,
}

impl<'a> ResultDecoder<'a> {
    pub fn new(layout: &'a DecodeLayout) -> Self {
        Self { layout }
    }

    /// Decode relation columns in place; absent relations get their empty value
    pub fn decode_row(&self, mut row: ResultRow) -> Record {
        for slot in self.layout.slots() {
            let decoded = match row.get_mut(&slot.alias) {
                Some(value) => decode_value(&slot.alias, value.take(), slot.shape),
                None => empty_value(slot.shape),
            };
            row.insert(slot.alias.clone(), decoded);
        }
        row
    }

    pub fn decode(&self, rows: Vec<ResultRow>) -> Vec<Record> {
        rows.into_iter().map(|row| self.decode_row(row)).collect()
    }

    pub fn decode_objects(&self, rows: Vec<ResultRow>) -> Vec<ObjectRecord> {
        rows.into_iter().map(|row| ObjectRecord::new(self.decode_row(row))).collect()
    }

    /// Build typed entities; relation values stay available as loaded relations
    pub fn decode_entities<E: DeserializeOwned>(&self, rows: Vec<ResultRow>) -> QueryResult<Vec<Hydrated<E>>> {
        rows.into_iter().map(|row| self.hydrate(self.decode_row(row))).collect()
    }

    pub fn decode_as<E: DeserializeOwned>(&self, rows: Vec<ResultRow>, format: OutputFormat) -> QueryResult<Output<E>> {
        Ok(match format {
            OutputFormat::Array => Output::Array(self.decode(rows)),
            OutputFormat::Object => Output::Object(self.decode_objects(rows)),
            OutputFormat::Entity => Output::Entity(self.decode_entities(rows)?),
        })
    }

    fn hydrate<E: DeserializeOwned>(&self, record: Record) -> QueryResult<Hydrated<E>> {
        let mut relations = LoadedRelations::default();
        for slot in self.layout.slots() {
            if let Some(value) = record.get(&slot.alias) {
                relations.values.insert(slot.alias.clone(), value.clone());
            }
        }

        let object: serde_json::Map<String, JsonValue> = record.into_iter().collect();
        let entity = serde_json::from_value(JsonValue::Object(object))
            .map_err(|e| QueryError::Decode(format!("Failed to hydrate entity: {}", e)))?;

        Ok(Hydrated { entity, relations })
    }
}
