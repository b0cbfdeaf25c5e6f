//! Ad-hoc query parameters and results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One positional `?` parameter.
///
/// Decoded from plain JSON: `null`, booleans, integers, floats and strings
/// map to the matching SQLite storage class; arrays and objects are bound as
/// their JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(JsonValue),
}

impl QueryParam {
    /// SQLite storage class the value is bound as.
    pub fn storage_class(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) | Self::Int(_) => "INTEGER",
            Self::Float(_) => "REAL",
            Self::String(_) | Self::Json(_) => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type, or the storage class of the first value for expressions
    pub type_name: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Rows returned by one query, capped at the executor's row limit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Map<String, JsonValue>>,
    pub row_count: usize,
    /// More rows were available than the cap allowed
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty(execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
