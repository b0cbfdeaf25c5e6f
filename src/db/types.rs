//! SQLite row to JSON conversion.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's declared type (or storage class)
//! 2. a category-specific decoder extracts the value
//!
//! SQLite is dynamically typed, so every decoder falls back to a looser read
//! instead of failing the whole row.

use crate::models::ColumnMetadata;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Logical category for column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Null,
}

/// Classify a SQLite type name using the column affinity rules.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") {
        return TypeCategory::Integer;
    }

    if lower.contains("char") || lower.contains("clob") || lower.contains("text") {
        return if lower.contains("json") {
            TypeCategory::Json
        } else {
            TypeCategory::Text
        };
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") {
        return TypeCategory::Binary;
    }

    if lower.contains("real")
        || lower.contains("floa")
        || lower.contains("doub")
        || lower.contains("numeric")
        || lower.contains("decimal")
    {
        return TypeCategory::Float;
    }

    // Dates and anything undeclared read back as text
    TypeCategory::Text
}

/// Decode binary data to JSON: UTF-8 text when valid, otherwise base64.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue>;
    fn get_column_metadata(&self) -> Vec<ColumnMetadata>;
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), decode_column(self, idx)))
            .collect()
    }

    fn get_column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| ColumnMetadata::new(col.name(), col.type_info().name()))
            .collect()
    }
}

fn decode_column(row: &SqliteRow, idx: usize) -> JsonValue {
    let Ok(raw) = row.try_get_raw(idx) else {
        return JsonValue::Null;
    };
    if raw.is_null() {
        return JsonValue::Null;
    }
    // The value's own storage class wins over the declared column type,
    // except where the declaration carries meaning SQLite does not store.
    let declared = categorize_type(row.columns()[idx].type_info().name());
    let stored = categorize_type(raw.type_info().name());
    let category = match (declared, stored) {
        (TypeCategory::Boolean, TypeCategory::Integer) => TypeCategory::Boolean,
        (TypeCategory::Json, TypeCategory::Text) => TypeCategory::Json,
        (_, stored) => stored,
    };

    match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary_col(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Text | TypeCategory::Null => decode_text(row, idx),
    }
}

fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get_unchecked::<Option<i64>, _>(idx)
        .ok()
        .flatten()
        .map(|v| JsonValue::Number(v.into()))
        .unwrap_or(JsonValue::Null)
}

fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get_unchecked::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
    match row.try_get_unchecked::<Option<f64>, _>(idx) {
        Ok(Some(v)) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        _ => JsonValue::Null,
    }
}

fn decode_binary_col(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(|v| decode_binary_value(&v))
        .unwrap_or(JsonValue::Null)
}

fn decode_json(row: &SqliteRow, idx: usize) -> JsonValue {
    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(Some(v)) => serde_json::from_str(&v).unwrap_or(JsonValue::String(v)),
        _ => JsonValue::Null,
    }
}

fn decode_text(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get_unchecked::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
