//! Per-dialect SQL rules: identifier quoting, placeholder style and the
//! catalog queries each engine answers introspection with.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::core::query::{Source, Statement};
use crate::core::types::ColumnMetadata;
use crate::error::AppError;

/// Serialized by its canonical name; deserialized through [`FromStr`], so
/// every accepted spelling works in both places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Dialect {
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "mysql")]
    Mysql,
    #[serde(rename = "postgresql")]
    Postgres,
}

/// Words that cannot be left unquoted even when they look like plain identifiers.
const RESERVED: &[&str] = &[
    "all", "alter", "and", "as", "asc", "between", "by", "case", "check", "column", "constraint",
    "create", "default", "delete", "desc", "distinct", "drop", "else", "end", "exists", "foreign",
    "from", "group", "having", "in", "index", "insert", "into", "is", "join", "key", "like",
    "limit", "not", "null", "offset", "on", "or", "order", "primary", "references", "select",
    "set", "table", "then", "to", "union", "unique", "update", "user", "using", "values", "when",
    "where", "with",
];

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgresql",
        }
    }

    /// SQLite exposes exactly one schema to this tool.
    pub const SQLITE_SCHEMA: &'static str = "main";

    /// Quotes a column or table name for interpolation into SQL text.
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Dialect::Sqlite => plain_or_double_quoted(name, false),
            Dialect::Mysql => format!("`{}`", name.replace('`', "``")),
            Dialect::Postgres => double_quoted(name),
        }
    }

    /// Table reference used in FROM clauses.
    pub fn qualified_table(self, schema: &str, table: &str) -> String {
        match self {
            Dialect::Sqlite => plain_or_double_quoted(table, false),
            Dialect::Mysql => format!("{}.{}", self.quote_ident(schema), self.quote_ident(table)),
            // Unquoted parts fold to lower case, so anything else keeps its quotes.
            Dialect::Postgres => format!(
                "{}.{}",
                plain_or_double_quoted(schema, true),
                plain_or_double_quoted(table, true)
            ),
        }
    }

    /// 1-based bind placeholder.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite | Dialect::Mysql => "?".to_string(),
            Dialect::Postgres => format!("${index}"),
        }
    }

    /// Left-hand side of a filter comparison. Filter values are bound as text,
    /// which PostgreSQL refuses to compare against non-text columns.
    pub fn filter_operand(self, quoted_column: &str) -> String {
        match self {
            Dialect::Postgres => format!("CAST({quoted_column} AS TEXT)"),
            Dialect::Sqlite | Dialect::Mysql => quoted_column.to_string(),
        }
    }

    pub fn schemas_source(self) -> Source {
        let sql = match self {
            Dialect::Sqlite => format!("SELECT '{}' AS name", Self::SQLITE_SCHEMA),
            Dialect::Mysql => {
                "SELECT CAST(schema_name AS CHAR) AS name FROM information_schema.schemata".into()
            }
            Dialect::Postgres => {
                "SELECT schema_name::text AS name FROM information_schema.schemata".into()
            }
        };
        Source::derived(sql, Vec::new())
    }

    pub fn tables_source(self, schema: &str) -> Source {
        match self {
            Dialect::Sqlite => Source::derived(SQLITE_TABLES.to_string(), Vec::new()),
            Dialect::Mysql => Source::derived(
                "SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables \
                 WHERE table_schema = ?"
                    .into(),
                vec![schema.to_string()],
            ),
            Dialect::Postgres => Source::derived(
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema::text = $1"
                    .into(),
                vec![schema.to_string()],
            ),
        }
    }

    pub fn table_source(self, schema: &str, table: &str) -> Source {
        Source::table(self.qualified_table(schema, table))
    }

    pub fn schema_names_query(self) -> Statement {
        match self {
            Dialect::Sqlite => Statement::new(format!("SELECT '{}' AS name", Self::SQLITE_SCHEMA)),
            Dialect::Mysql => Statement::new(
                "SELECT CAST(schema_name AS CHAR) AS name FROM information_schema.schemata \
                 ORDER BY name",
            ),
            Dialect::Postgres => Statement::new(
                "SELECT schema_name::text AS name FROM information_schema.schemata ORDER BY name",
            ),
        }
    }

    pub fn table_names_query(self, schema: &str) -> Statement {
        match self {
            Dialect::Sqlite => Statement::new(format!("{SQLITE_TABLES} ORDER BY name")),
            Dialect::Mysql => Statement::with_params(
                "SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables \
                 WHERE table_schema = ? ORDER BY name",
                vec![schema.to_string()],
            ),
            Dialect::Postgres => Statement::with_params(
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema::text = $1 ORDER BY name",
                vec![schema.to_string()],
            ),
        }
    }

    pub fn column_names_query(self, schema: &str, table: &str) -> Statement {
        match self {
            Dialect::Sqlite => Statement::with_params(
                "SELECT name FROM pragma_table_info(?) ORDER BY cid",
                vec![table.to_string()],
            ),
            Dialect::Mysql => Statement::with_params(
                "SELECT CAST(column_name AS CHAR) AS name FROM information_schema.columns \
                 WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
                vec![schema.to_string(), table.to_string()],
            ),
            Dialect::Postgres => Statement::with_params(
                "SELECT column_name::text AS name FROM information_schema.columns \
                 WHERE table_schema::text = $1 AND table_name::text = $2 ORDER BY ordinal_position",
                vec![schema.to_string(), table.to_string()],
            ),
        }
    }

    /// Column metadata query. Every dialect projects the same five columns:
    /// `name, type, default_value, nullable, primary_key`.
    pub fn columns_query(self, schema: &str, table: &str, only: &[String]) -> Statement {
        let (base, mut params, name_col) = match self {
            Dialect::Sqlite => (
                SQLITE_COLUMNS.to_string(),
                vec![table.to_string()],
                "name",
            ),
            Dialect::Mysql => (
                MYSQL_COLUMNS.to_string(),
                vec![schema.to_string(), table.to_string()],
                "c.column_name",
            ),
            Dialect::Postgres => (
                POSTGRES_COLUMNS.to_string(),
                vec![schema.to_string(), table.to_string()],
                "c.column_name::text",
            ),
        };

        let mut sql = base;
        if !only.is_empty() {
            let first = params.len() + 1;
            let marks: Vec<String> = (first..first + only.len())
                .map(|i| self.placeholder(i))
                .collect();
            let keyword = if self == Dialect::Sqlite { "WHERE" } else { "AND" };
            sql.push_str(&format!(" {keyword} {name_col} IN ({})", marks.join(", ")));
            params.extend(only.iter().cloned());
        }
        let order = match self {
            Dialect::Sqlite => "cid",
            Dialect::Mysql | Dialect::Postgres => "c.ordinal_position",
        };
        sql.push_str(&format!(" ORDER BY {order}"));
        Statement::with_params(sql, params)
    }

    /// Catalog rows that need rewriting before they are valid DDL again.
    pub fn adapt_column(self, mut column: ColumnMetadata) -> ColumnMetadata {
        if self == Dialect::Postgres {
            // `serial` columns come back as integer + nextval(<sequence>); the
            // sequence does not exist in a fresh database, the pseudo-type does.
            let is_sequence_default = column
                .default_value
                .as_deref()
                .is_some_and(|d| d.starts_with("nextval("));
            let serial = match column.data_type.as_str() {
                "integer" => Some("serial"),
                "bigint" => Some("bigserial"),
                "smallint" => Some("smallserial"),
                _ => None,
            };
            if let (true, Some(serial)) = (is_sequence_default, serial) {
                column.data_type = serial.to_string();
                column.default_value = None;
            }
        }
        column
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            other => Err(AppError::Connection(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

const SQLITE_TABLES: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";

const SQLITE_COLUMNS: &str = "SELECT name, type, dflt_value AS default_value, \
     CASE WHEN \"notnull\" = 1 OR pk > 0 THEN 0 ELSE 1 END AS nullable, \
     CASE WHEN pk > 0 THEN 1 ELSE 0 END AS primary_key \
     FROM pragma_table_info(?)";

// MySQL reports string defaults unquoted; QUOTE() turns them back into literals.
const MYSQL_COLUMNS: &str = "SELECT CAST(c.column_name AS CHAR) AS name, \
     CAST(c.column_type AS CHAR) AS type, \
     CAST(CASE \
         WHEN c.column_default IS NULL THEN NULL \
         WHEN c.extra LIKE '%DEFAULT_GENERATED%' \
           OR c.column_default REGEXP '^-?[0-9]+(\\\\.[0-9]+)?$' \
           OR UPPER(c.column_default) IN ('CURRENT_TIMESTAMP', 'NULL') THEN c.column_default \
         ELSE QUOTE(c.column_default) END AS CHAR) AS default_value, \
     CAST(IF(c.is_nullable = 'YES', 1, 0) AS SIGNED) AS nullable, \
     CAST(EXISTS (SELECT 1 FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
          AND tc.table_name = kcu.table_name \
         WHERE tc.table_schema = c.table_schema AND tc.table_name = c.table_name \
           AND tc.constraint_type = 'PRIMARY KEY' AND kcu.column_name = c.column_name) AS SIGNED) \
       AS primary_key \
     FROM information_schema.columns c \
     WHERE c.table_schema = ? AND c.table_name = ?";

const POSTGRES_COLUMNS: &str = "SELECT c.column_name::text AS name, \
     CASE \
         WHEN c.data_type IN ('USER-DEFINED', 'ARRAY') THEN c.udt_name::text \
         WHEN c.character_maximum_length IS NOT NULL \
           THEN c.data_type::text || '(' || c.character_maximum_length::text || ')' \
         ELSE c.data_type::text END AS type, \
     c.column_default::text AS default_value, \
     c.is_nullable::text = 'YES' AS nullable, \
     EXISTS (SELECT 1 FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
          AND tc.table_name = kcu.table_name \
         WHERE tc.table_schema = c.table_schema AND tc.table_name = c.table_name \
           AND tc.constraint_type = 'PRIMARY KEY' AND kcu.column_name = c.column_name) \
       AS primary_key \
     FROM information_schema.columns c \
     WHERE lower(c.table_schema::text) = lower($1) AND lower(c.table_name::text) = lower($2)";

pub(crate) fn is_safe_identifier(s: &str) -> bool {
    // Minimal safe subset: [A-Za-z_][A-Za-z0-9_]*
    let mut chars = s.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_reserved(s: &str) -> bool {
    RESERVED.contains(&s.to_ascii_lowercase().as_str())
}

fn plain_or_double_quoted(name: &str, require_lowercase: bool) -> String {
    let folds = !require_lowercase || !name.chars().any(|c| c.is_ascii_uppercase());
    if is_safe_identifier(name) && folds && !is_reserved(name) {
        name.to_string()
    } else {
        double_quoted(name)
    }
}

fn double_quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
