//! SQL dump export and import.
//!
//! Export walks the selected `schema.table[.column]` paths in order and emits
//! DDL followed by `INSERT` statements as plain SQL text. Table names are
//! written unqualified, so a dump can be replayed into a different schema or
//! database. Import replays a dump as one batch.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::core::client::DialectClient;
use crate::core::dialect::Dialect;
use crate::core::query::Statement;
use crate::core::types::{ColumnMetadata, DbRow, DropTableMode, ExportOptions, SqlValue};
use crate::error::{AppError, AppResult};

/// One table of the selection and the columns picked for it; no columns
/// means the whole table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
}

/// Groups dotted paths by table, keeping first-seen order. Bare schema
/// paths carry no table and are ignored.
pub fn parse_selection(paths: &[String]) -> AppResult<Vec<TableSelection>> {
    let mut tables: IndexMap<(String, String), Vec<String>> = IndexMap::new();
    for path in paths {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            [_schema] => {}
            [schema, table] => {
                tables
                    .entry((schema.to_string(), table.to_string()))
                    .or_default();
            }
            [schema, table, column] => {
                let columns = tables
                    .entry((schema.to_string(), table.to_string()))
                    .or_default();
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_string());
                }
            }
            _ => return Err(AppError::Export(format!("invalid selected path: {path}"))),
        }
    }
    Ok(tables
        .into_iter()
        .map(|((schema, table), columns)| TableSelection {
            schema,
            table,
            columns,
        })
        .collect())
}

struct PlannedTable {
    selection: TableSelection,
    columns: Vec<ColumnMetadata>,
}

pub async fn export<C>(client: &C, options: &ExportOptions) -> AppResult<String>
where
    C: DialectClient + ?Sized,
{
    let dialect = client.dialect();
    if options.drop_schema {
        warn!("drop_schema has no effect: dumps use unqualified table names");
    }

    let mut planned = Vec::new();
    for selection in parse_selection(&options.selected)? {
        let columns = table_columns(client, &selection).await?;
        planned.push(PlannedTable { selection, columns });
    }

    let mut blocks: Vec<String> = Vec::new();
    if options.wrap_in_transaction {
        blocks.push("BEGIN;".to_string());
    }

    if options.drop_table != DropTableMode::DoNothing {
        for t in &planned {
            blocks.push(render_create(dialect, &t.selection.table, &t.columns, options));
        }
    }

    if !options.schema_only {
        for t in &planned {
            let names: Vec<String> = t.columns.iter().map(|c| c.name.clone()).collect();
            let select = format!(
                "SELECT {} FROM {}",
                column_list(dialect, &names),
                dialect.qualified_table(&t.selection.schema, &t.selection.table)
            );
            let result = client
                .fetch(&Statement::new(select))
                .await
                .map_err(AppError::export)?;
            if result.rows.is_empty() {
                debug!(table = %t.selection.table, "no rows; skipping insert");
                continue;
            }
            blocks.push(render_insert(dialect, &t.selection.table, &names, &result.rows)?);
        }
    }

    if options.wrap_in_transaction {
        blocks.push("COMMIT;".to_string());
    }

    let mut out = blocks.join("\n\n");
    out.push('\n');
    Ok(out)
}

/// Replays a dump as a single batch. A failed dump that opened a
/// transaction gets the usual best-effort rollback.
pub async fn import<C>(client: &C, script: &str) -> AppResult<()>
where
    C: DialectClient + ?Sized,
{
    client
        .run_statement(script)
        .await
        .map_err(AppError::into_import)
}

/// Catalog metadata for the selected columns, in selection order.
async fn table_columns<C>(client: &C, selection: &TableSelection) -> AppResult<Vec<ColumnMetadata>>
where
    C: DialectClient + ?Sized,
{
    let catalog = client
        .describe_columns(&selection.schema, &selection.table, &[])
        .await
        .map_err(AppError::export)?;
    if catalog.is_empty() {
        return Err(AppError::Export(format!(
            "table not found: {}.{}",
            selection.schema, selection.table
        )));
    }
    if selection.columns.is_empty() {
        return Ok(catalog);
    }

    selection
        .columns
        .iter()
        .map(|name| {
            catalog
                .iter()
                .find(|c| &c.name == name)
                .cloned()
                .ok_or_else(|| AppError::Export(format!("invalid column name: {name}")))
        })
        .collect()
}

fn column_list(dialect: Dialect, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_create(dialect: Dialect, table: &str, columns: &[ColumnMetadata], options: &ExportOptions) -> String {
    let name = dialect.quote_ident(table);
    let mut out = String::new();
    match options.drop_table {
        DropTableMode::DropAndCreate => {
            out.push_str(&format!("DROP TABLE IF EXISTS {name};\nCREATE TABLE {name} (\n"));
        }
        DropTableMode::Create => out.push_str(&format!("CREATE TABLE {name} (\n")),
        DropTableMode::CreateIfNotExists => {
            out.push_str(&format!("CREATE TABLE IF NOT EXISTS {name} (\n"))
        }
        DropTableMode::DoNothing => {}
    }

    let keys: Vec<&ColumnMetadata> = columns.iter().filter(|c| c.primary_key).collect();
    let inline_key = keys.len() == 1 && !options.ignore_constraints;

    let mut lines: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut line = format!("    {}", dialect.quote_ident(&c.name));
            if !c.data_type.is_empty() {
                line.push(' ');
                line.push_str(&c.data_type);
            }
            if !c.nullable && !options.ignore_constraints {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = &c.default_value {
                line.push_str(" DEFAULT ");
                line.push_str(&default_clause(dialect, default));
            }
            if c.primary_key && inline_key {
                line.push_str(" PRIMARY KEY");
            }
            line
        })
        .collect();
    if keys.len() > 1 && !options.ignore_constraints {
        let names: Vec<String> = keys.iter().map(|c| c.name.clone()).collect();
        lines.push(format!("    PRIMARY KEY ({})", column_list(dialect, &names)));
    }

    out.push_str(&lines.join(",\n"));
    out.push_str("\n);");
    out
}

/// SQLite reports expression defaults without the parentheses its grammar
/// requires around them; a parenthesized literal is accepted too.
fn default_clause(dialect: Dialect, default: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("({default})"),
        Dialect::Mysql | Dialect::Postgres => default.to_string(),
    }
}

fn render_insert(dialect: Dialect, table: &str, names: &[String], rows: &[DbRow]) -> AppResult<String> {
    let mut out = format!(
        "INSERT INTO {} ({}) VALUES\n",
        dialect.quote_ident(table),
        column_list(dialect, names)
    );
    let tuples = rows
        .iter()
        .map(|row| {
            let values = names
                .iter()
                .map(|n| literal(row.get(n).unwrap_or(&SqlValue::Null)))
                .collect::<AppResult<Vec<_>>>()?;
            Ok(format!("    ({})", values.join(", ")))
        })
        .collect::<AppResult<Vec<_>>>()?;
    out.push_str(&tuples.join(",\n"));
    out.push(';');
    Ok(out)
}

/// SQL literal for one cell.
pub fn literal(value: &SqlValue) -> AppResult<String> {
    let s = match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(true) => "TRUE".to_string(),
        SqlValue::Bool(false) => "FALSE".to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::Float(v) if v.is_finite() => v.to_string(),
        SqlValue::Float(v) => {
            return Err(AppError::Export(format!("non-finite float has no literal: {v}")))
        }
        SqlValue::Numeric(v) => v.clone(),
        SqlValue::Text(v) => quote_text(v),
        SqlValue::Bytes(v) => quote_text(&String::from_utf8_lossy(v)),
        SqlValue::Timestamp(t) => quote_text(&t.to_rfc3339()),
        SqlValue::Unsupported { db_type } => {
            return Err(AppError::Export(format!("unsupported value type: {db_type}")))
        }
    };
    Ok(s)
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::core::client::SqliteClient;
    use crate::core::types::{Direction, Ordering, QueryParams};

    fn paths(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    async fn people() -> SqliteClient {
        let client = SqliteClient::open(":memory:", 2_000).unwrap();
        client
            .execute_batch(
                "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, note TEXT DEFAULT 'n/a');
                 INSERT INTO people VALUES (1, 'O''Brien', NULL), (2, 'Ann', 'likes ''quotes''');
                 CREATE TABLE empty (x INTEGER);",
            )
            .await
            .unwrap();
        client
    }

    fn options(selected: &[&str]) -> ExportOptions {
        ExportOptions {
            selected: paths(selected),
            ..Default::default()
        }
    }

    #[test]
    fn selection_groups_columns_by_table() {
        let sel = parse_selection(&paths(&[
            "main",
            "main.a",
            "main.a.x",
            "main.a.y",
            "main.b",
        ]))
        .unwrap();
        assert_eq!(sel.len(), 2);
        assert_eq!(sel[0].table, "a");
        assert_eq!(sel[0].columns, vec!["x", "y"]);
        assert!(sel[1].columns.is_empty());
    }

    #[test]
    fn deep_paths_are_rejected() {
        let err = parse_selection(&paths(&["main.a.b.c"])).unwrap_err();
        assert_eq!(err.code(), "EXPORT_ERROR");
    }

    #[test]
    fn literals() {
        assert_eq!(literal(&SqlValue::Null).unwrap(), "NULL");
        assert_eq!(literal(&SqlValue::Bool(false)).unwrap(), "FALSE");
        assert_eq!(literal(&SqlValue::Float(2.5)).unwrap(), "2.5");
        assert_eq!(literal(&SqlValue::Text("O'Brien".into())).unwrap(), "'O''Brien'");
        let ts = DateTime::parse_from_rfc3339("2024-01-02T03:04:05+00:00").unwrap();
        assert_eq!(
            literal(&SqlValue::Timestamp(ts)).unwrap(),
            "'2024-01-02T03:04:05+00:00'"
        );
        assert!(literal(&SqlValue::Float(f64::NAN)).is_err());
        assert!(literal(&SqlValue::Unsupported {
            db_type: "GEOMETRY".into()
        })
        .is_err());
    }

    #[tokio::test]
    async fn exports_ddl_and_data() {
        let client = people().await;
        let mut opts = options(&["main.people"]);
        opts.wrap_in_transaction = true;

        let dump = export(&client, &opts).await.unwrap();
        assert_eq!(
            dump,
            "BEGIN;\n\n\
             DROP TABLE IF EXISTS people;\n\
             CREATE TABLE people (\n    \
             id INTEGER NOT NULL PRIMARY KEY,\n    \
             name TEXT NOT NULL,\n    \
             note TEXT DEFAULT ('n/a')\n\
             );\n\n\
             INSERT INTO people (id, name, note) VALUES\n    \
             (1, 'O''Brien', NULL),\n    \
             (2, 'Ann', 'likes ''quotes''');\n\n\
             COMMIT;\n"
        );
    }

    #[tokio::test]
    async fn selected_columns_and_modes() {
        let client = people().await;
        let mut opts = options(&["main.people", "main.people.name"]);
        opts.drop_table = DropTableMode::CreateIfNotExists;
        opts.ignore_constraints = true;

        let dump = export(&client, &opts).await.unwrap();
        assert!(dump.starts_with("CREATE TABLE IF NOT EXISTS people (\n    name TEXT\n);"));
        assert!(dump.contains("INSERT INTO people (name) VALUES\n    ('O''Brien'),\n    ('Ann');"));

        opts.drop_table = DropTableMode::DoNothing;
        let dump = export(&client, &opts).await.unwrap();
        assert!(dump.starts_with("INSERT INTO people"));

        opts.drop_table = DropTableMode::Create;
        opts.schema_only = true;
        let dump = export(&client, &opts).await.unwrap();
        assert_eq!(dump, "CREATE TABLE people (\n    name TEXT\n);\n");
    }

    #[tokio::test]
    async fn empty_tables_get_no_insert() {
        let client = people().await;
        let dump = export(&client, &options(&["main.empty"])).await.unwrap();
        assert!(dump.contains("CREATE TABLE empty ("));
        assert!(!dump.contains("INSERT"));
    }

    #[tokio::test]
    async fn unknown_columns_fail() {
        let client = people().await;
        let err = export(&client, &options(&["main.people", "main.people.nope"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXPORT_ERROR");
    }

    fn by_id() -> QueryParams {
        QueryParams {
            order: vec![Ordering {
                column: "id".into(),
                direction: Direction::Asc,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let source = people().await;
        let dump = export(&source, &options(&["main.people"])).await.unwrap();

        let target = SqliteClient::open(":memory:", 2_000).unwrap();
        import(&target, &dump).await.unwrap();
        // A second import over existing tables is fine too.
        import(&target, &dump).await.unwrap();

        let before = source.list_rows(&by_id(), "main", "people").await.unwrap();
        let after = target.list_rows(&by_id(), "main", "people").await.unwrap();
        assert_eq!(before.total, after.total);
        assert_eq!(before.rows, after.rows);
        assert_eq!(before.columns, after.columns);
        assert_eq!(after.rows[0]["name"], SqlValue::Text("O'Brien".into()));
    }

    #[tokio::test]
    async fn expression_defaults_survive_a_round_trip() {
        let source = SqliteClient::open(":memory:", 2_000).unwrap();
        source
            .execute_batch(
                "CREATE TABLE ev (id INTEGER PRIMARY KEY, at TEXT DEFAULT (datetime('now')), n INTEGER DEFAULT (1+1));
                 INSERT INTO ev (id) VALUES (1);",
            )
            .await
            .unwrap();
        let mut opts = options(&["main.ev"]);
        opts.wrap_in_transaction = true;
        let dump = export(&source, &opts).await.unwrap();
        assert!(dump.contains("    at TEXT DEFAULT (datetime('now')),\n"));
        assert!(dump.contains("    n INTEGER DEFAULT (1+1)\n"));

        let target = SqliteClient::open(":memory:", 2_000).unwrap();
        import(&target, &dump).await.unwrap();
        target
            .execute_batch("INSERT INTO ev (id) VALUES (2);")
            .await
            .unwrap();

        let rows = target.list_rows(&by_id(), "main", "ev").await.unwrap();
        assert_eq!(rows.total, 2);
        assert_eq!(rows.rows[1]["n"], SqlValue::Int(2));
        assert!(matches!(&rows.rows[1]["at"], SqlValue::Text(t) if !t.is_empty()));
        let before = source.list_rows(&by_id(), "main", "ev").await.unwrap();
        assert_eq!(before.rows[0], rows.rows[0]);
    }

    #[tokio::test]
    async fn failed_import_reports_import_error_and_rolls_back() {
        let client = people().await;
        let err = import(
            &client,
            "BEGIN;\nDELETE FROM people;\nINSERT INTO nowhere VALUES (1);\nCOMMIT;\n",
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "IMPORT_ERROR");

        let n = client
            .count(&Statement::new("SELECT COUNT(*) FROM people"))
            .await
            .unwrap();
        assert_eq!(n, 2);
    }
}
