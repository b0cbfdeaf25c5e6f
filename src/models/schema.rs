//! Schema introspection results.
//!
//! Shapes follow what SQLite itself reports: `sqlite_master` rows for the
//! listing and the `PRAGMA table_info` / `foreign_key_list` / `index_list`
//! family for a single table.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// Kind of object found in `sqlite_master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
}

impl ObjectKind {
    pub fn from_master_type(s: &str) -> Self {
        if s.eq_ignore_ascii_case("view") {
            Self::View
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableEntry {
    pub name: String,
    pub kind: ObjectKind,
}

/// Tables of the datastore plus its on-disk size.
#[derive(Debug, Clone, Serialize)]
pub struct TableListing {
    pub tables: Vec<TableEntry>,
    pub database_size_bytes: u64,
    /// Human readable form of `database_size_bytes`
    pub database_size: String,
}

/// Column type affinity, derived from the declared type the way SQLite does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl Affinity {
    /// Apply SQLite's affinity rules to a declared column type, in order.
    pub fn from_declared_type(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            Self::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Self::Blob
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| upper.contains(t)) {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    /// Interpret a `dflt_value` expression as reported by `PRAGMA table_info`.
    ///
    /// Quoted literals become strings; bare numbers become JSON numbers
    /// unless the column has text affinity. Anything else (e.g.
    /// `CURRENT_TIMESTAMP`) is returned as its expression text.
    pub fn decode_default(self, raw: &str) -> JsonValue {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("NULL") {
            return JsonValue::Null;
        }
        if let Some(literal) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            return JsonValue::String(literal.replace("''", "'"));
        }
        if self != Self::Text {
            if let Ok(n) = raw.parse::<i64>() {
                return n.into();
            }
            if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                return JsonValue::Number(n);
            }
        }
        JsonValue::String(raw.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Type as written in the table definition; may be empty
    pub declared_type: String,
    pub affinity: Affinity,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    /// 1-based position within the primary key, if the column is part of it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key_position: Option<u32>,
}

impl ColumnInfo {
    pub fn is_primary_key(&self) -> bool {
        self.primary_key_position.is_some()
    }
}

/// `ON DELETE` / `ON UPDATE` behavior of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn from_pragma(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            "RESTRICT" => Self::Restrict,
            _ => Self::NoAction,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    /// `None` when the parent's primary key is referenced implicitly
    pub references_column: Option<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// How an index came to exist, from the `origin` column of `PRAGMA index_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrigin {
    /// `CREATE INDEX`
    Explicit,
    /// A `UNIQUE` constraint
    UniqueConstraint,
    /// A non-rowid `PRIMARY KEY`
    PrimaryKey,
}

impl IndexOrigin {
    pub fn from_pragma(s: &str) -> Self {
        match s {
            "u" => Self::UniqueConstraint,
            "pk" => Self::PrimaryKey,
            _ => Self::Explicit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub origin: IndexOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    /// Primary key columns in key order
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_affinity_rules() {
        assert_eq!(Affinity::from_declared_type("INTEGER"), Affinity::Integer);
        assert_eq!(Affinity::from_declared_type("bigint"), Affinity::Integer);
        assert_eq!(Affinity::from_declared_type("VARCHAR(30)"), Affinity::Text);
        assert_eq!(Affinity::from_declared_type(""), Affinity::Blob);
        assert_eq!(Affinity::from_declared_type("DOUBLE PRECISION"), Affinity::Real);
        assert_eq!(Affinity::from_declared_type("DECIMAL(10,2)"), Affinity::Numeric);
        // "INT" wins over "CHAR" because it is checked first
        assert_eq!(Affinity::from_declared_type("CHARINT"), Affinity::Integer);
    }

    #[test]
    fn test_decode_default() {
        assert_eq!(Affinity::Integer.decode_default("42"), json!(42));
        assert_eq!(Affinity::Real.decode_default("1.5"), json!(1.5));
        assert_eq!(Affinity::Text.decode_default("'it''s'"), json!("it's"));
        assert_eq!(Affinity::Text.decode_default("7"), json!("7"));
        assert_eq!(Affinity::Numeric.decode_default("NULL"), JsonValue::Null);
        assert_eq!(
            Affinity::Numeric.decode_default("CURRENT_TIMESTAMP"),
            json!("CURRENT_TIMESTAMP")
        );
    }

    #[test]
    fn test_pragma_enums() {
        assert_eq!(ObjectKind::from_master_type("VIEW"), ObjectKind::View);
        assert_eq!(ReferentialAction::from_pragma("set null"), ReferentialAction::SetNull);
        assert_eq!(ReferentialAction::from_pragma("NO ACTION"), ReferentialAction::NoAction);
        assert_eq!(IndexOrigin::from_pragma("u"), IndexOrigin::UniqueConstraint);
        assert_eq!(IndexOrigin::from_pragma("c"), IndexOrigin::Explicit);
    }
}
