//! Turns driver cells and cursor descriptions into the shared result model.

use std::time::Duration;

use crate::core::dialect::Dialect;
use crate::core::types::{ColumnMetadata, DbRow, SqlValue};
use crate::error::{AppError, AppResult};

/// Byte buffers become UTF-8 text; every other value passes through.
pub fn normalize_cell(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Bytes(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
        other => other,
    }
}

/// Column description taken from a cursor. None of the drivers report
/// nullability on a result set, so cursor columns are always nullable; use
/// catalog metadata where the real flag matters.
pub fn cursor_column(name: &str, data_type: Option<&str>) -> ColumnMetadata {
    ColumnMetadata {
        name: name.to_string(),
        data_type: data_type.unwrap_or_default().to_string(),
        default_value: None,
        nullable: true,
        primary_key: false,
    }
}

pub fn elapsed(d: Duration) -> String {
    format!("{d:?}")
}

/// Reads the `name` column of a catalog listing.
pub fn names_from_rows(rows: &[DbRow]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| r.get("name").and_then(SqlValue::as_str).map(str::to_string))
        .collect()
}

/// Builds column metadata from the five-column shape every dialect's
/// `columns_query` produces.
pub fn columns_from_rows(dialect: Dialect, rows: &[DbRow]) -> AppResult<Vec<ColumnMetadata>> {
    rows.iter()
        .map(|row| {
            let name = row
                .get("name")
                .and_then(SqlValue::as_str)
                .ok_or_else(|| AppError::Catalog("column row without a name".into()))?;
            let column = ColumnMetadata {
                name: name.to_string(),
                data_type: row
                    .get("type")
                    .and_then(SqlValue::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                default_value: row
                    .get("default_value")
                    .and_then(SqlValue::as_str)
                    .map(str::to_string),
                nullable: row.get("nullable").and_then(SqlValue::as_bool).unwrap_or(true),
                primary_key: row
                    .get("primary_key")
                    .and_then(SqlValue::as_bool)
                    .unwrap_or(false),
            };
            Ok(dialect.adapt_column(column))
        })
        .collect()
}
