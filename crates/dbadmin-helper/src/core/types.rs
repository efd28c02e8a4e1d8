use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use crate::core::dialect::Dialect;

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numerics (DECIMAL/NUMERIC, out-of-range unsigned) kept as their text form.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
    /// A driver type this crate has no decoder for.
    Unsupported { db_type: String },
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) | SqlValue::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Catalog flags arrive as booleans (PostgreSQL) or 0/1 integers (SQLite, MySQL).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Int(i) => Some(*i != 0),
            SqlValue::Text(s) => match s.to_ascii_lowercase().as_str() {
                "1" | "t" | "true" | "yes" => Some(true),
                "0" | "f" | "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(i) => serializer.serialize_i64(*i),
            SqlValue::Float(f) => serializer.serialize_f64(*f),
            SqlValue::Numeric(s) | SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            SqlValue::Timestamp(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            SqlValue::Unsupported { db_type } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("$type", "unsupported")?;
                map.serialize_entry("db_type", db_type)?;
                map.end()
            }
        }
    }
}

/// Column name -> value, in the statement's column order.
pub type DbRow = IndexMap<String, SqlValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// SQL-ready default expression; `None` when the column has no default.
    #[serde(default)]
    pub default_value: Option<String>,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<DbRow>,
    pub columns: Vec<ColumnMetadata>,
    /// Matching rows ignoring limit/offset.
    pub total: u64,
    /// Wall-clock time of the primary statement.
    pub duration: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    pub limit: Option<usize>,
    pub offset: usize,
    pub order: Vec<Ordering>,
    pub filter: Vec<Filter>,
}

/// schema -> table -> column names.
pub type DatabaseMetadata = IndexMap<String, IndexMap<String, Vec<String>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropTableMode {
    #[default]
    DropAndCreate,
    Create,
    CreateIfNotExists,
    DoNothing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub schema_only: bool,
    pub drop_schema: bool,
    pub ignore_constraints: bool,
    pub wrap_in_transaction: bool,
    pub drop_table: DropTableMode,
    /// Dotted `schema.table` / `schema.table.column` paths, grouped by table.
    pub selected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    pub dialect: Dialect,
    pub connection_string: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastQuery {
    pub id: String,
    pub query: String,
    pub last_used: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_values_serialize_as_plain_scalars() {
        let mut row = DbRow::new();
        row.insert("id".into(), SqlValue::Int(1));
        row.insert("name".into(), SqlValue::Text("a".into()));
        row.insert("gone".into(), SqlValue::Null);
        row.insert("ok".into(), SqlValue::Bool(true));
        row.insert("price".into(), SqlValue::Numeric("9.50".into()));

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"{"id":1,"name":"a","gone":null,"ok":true,"price":"9.50"}"#
        );
    }

    #[test]
    fn unsupported_values_are_tagged() {
        let v = SqlValue::Unsupported {
            db_type: "int4[]".into(),
        };
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            serde_json::json!({ "$type": "unsupported", "db_type": "int4[]" })
        );
    }

    #[test]
    fn catalog_flags_read_as_bool() {
        assert_eq!(SqlValue::Int(0).as_bool(), Some(false));
        assert_eq!(SqlValue::Int(1).as_bool(), Some(true));
        assert_eq!(SqlValue::Bool(true).as_bool(), Some(true));
        assert_eq!(SqlValue::Text("YES".into()).as_bool(), Some(true));
        assert_eq!(SqlValue::Null.as_bool(), None);
    }

    #[test]
    fn query_params_accept_partial_payloads() {
        let p: QueryParams = serde_json::from_value(serde_json::json!({
            "limit": 10,
            "order": [{ "column": "id", "direction": "DESC" }]
        }))
        .unwrap();
        assert_eq!(p.limit, Some(10));
        assert_eq!(p.offset, 0);
        assert_eq!(p.order[0].direction, Direction::Desc);
        assert!(p.filter.is_empty());
    }
}
