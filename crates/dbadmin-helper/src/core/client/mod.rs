//! Dialect clients.
//!
//! Each engine implements a handful of driver primitives; the browsing,
//! querying and dump operations are default methods built on top of them, so
//! every dialect behaves the same way apart from its SQL.

use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::core::dialect::Dialect;
use crate::core::dump;
use crate::core::normalize::{columns_from_rows, elapsed, names_from_rows};
use crate::core::query::{build_paged, is_mutation, Source, Statement};
use crate::core::types::{ColumnMetadata, DatabaseMetadata, ExportOptions, QueryParams, QueryResult};
use crate::error::{AppError, AppResult};

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MysqlClient;
pub use postgres::PostgresClient;
pub use sqlite::SqliteClient;

/// Page size used when a caller leaves the limit unset and nothing above
/// clamped it.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Driver knobs that come from configuration rather than the connection string.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub busy_timeout_ms: u64,
    pub mysql_max_connections: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 2_000,
            mysql_max_connections: 4,
        }
    }
}

#[async_trait]
pub trait DialectClient: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn ping(&self) -> AppResult<()>;

    /// Runs a row-returning statement. Cells come back normalized, `total`
    /// is the number of rows read and `duration` covers the statement.
    async fn fetch(&self, stmt: &Statement) -> AppResult<QueryResult>;

    /// Runs a single-value `COUNT(*)` statement.
    async fn count(&self, stmt: &Statement) -> AppResult<u64>;

    /// Runs a statement without reading rows; returns the affected row count.
    async fn execute(&self, stmt: &Statement) -> AppResult<u64>;

    /// Runs a multi-statement script on one driver session. A failed script
    /// that opened a transaction is followed by [`crate::core::rollback::attempt`]
    /// on that same session.
    async fn execute_batch(&self, sql: &str) -> AppResult<()>;

    async fn close(&self);

    /// schema -> table -> columns for everything the connection can see.
    async fn get_metadata(&self) -> AppResult<DatabaseMetadata> {
        let dialect = self.dialect();
        let schemas = self
            .fetch(&dialect.schema_names_query())
            .await
            .map_err(|e| AppError::Connection(format!("failed to read catalog: {e}")))?;

        let mut metadata = DatabaseMetadata::new();
        for schema in names_from_rows(&schemas.rows) {
            let tables = match self.fetch(&dialect.table_names_query(&schema)).await {
                Ok(r) => names_from_rows(&r.rows),
                Err(e) => {
                    warn!(schema = %schema, error = %e, "skipping schema in metadata");
                    metadata.insert(schema, IndexMap::new());
                    continue;
                }
            };

            let mut table_map = IndexMap::new();
            for table in tables {
                match self.fetch(&dialect.column_names_query(&schema, &table)).await {
                    Ok(r) => {
                        table_map.insert(table, names_from_rows(&r.rows));
                    }
                    Err(e) => {
                        warn!(schema = %schema, table = %table, error = %e, "skipping table in metadata");
                    }
                }
            }
            metadata.insert(schema, table_map);
        }
        debug!(dialect = %dialect, schemas = metadata.len(), "metadata loaded");
        Ok(metadata)
    }

    async fn list_schemas(&self, params: &QueryParams) -> AppResult<QueryResult> {
        self.paged(&self.dialect().schemas_source(), params)
            .await
            .map_err(AppError::into_catalog)
    }

    async fn list_tables(&self, params: &QueryParams, schema: &str) -> AppResult<QueryResult> {
        self.paged(&self.dialect().tables_source(schema), params)
            .await
            .map_err(AppError::into_catalog)
    }

    /// Table rows, with the cursor's column descriptions replaced by catalog
    /// metadata wherever the catalog knows the column.
    async fn list_rows(&self, params: &QueryParams, schema: &str, table: &str) -> AppResult<QueryResult> {
        let mut result = self
            .paged(&self.dialect().table_source(schema, table), params)
            .await?;

        match self.describe_columns(schema, table, &[]).await {
            Ok(catalog) if result.columns.is_empty() => result.columns = catalog,
            Ok(catalog) => {
                for column in &mut result.columns {
                    if let Some(known) = catalog.iter().find(|c| c.name == column.name) {
                        *column = known.clone();
                    }
                }
            }
            Err(e) => {
                debug!(schema = %schema, table = %table, error = %e, "keeping cursor column metadata");
            }
        }
        Ok(result)
    }

    /// Arbitrary SQL. Statements that look like mutations are executed
    /// without reading rows and yield an empty result carrying only the
    /// duration. Without arguments the whole text runs as a script, so every
    /// statement in it takes effect.
    async fn run_query(&self, sql: &str, args: &[String]) -> AppResult<QueryResult> {
        let stmt = Statement::with_params(sql, args.to_vec());
        if is_mutation(sql) {
            let started = Instant::now();
            if args.is_empty() {
                self.execute_batch(sql).await?;
            } else {
                let affected = self.execute(&stmt).await?;
                debug!(affected, "mutation executed");
            }
            return Ok(QueryResult {
                duration: elapsed(started.elapsed()),
                ..Default::default()
            });
        }
        self.fetch(&stmt).await
    }

    async fn run_statement(&self, sql: &str) -> AppResult<()> {
        self.execute_batch(sql).await
    }

    /// Column metadata in table order, optionally restricted to `only`.
    async fn describe_columns(&self, schema: &str, table: &str, only: &[String]) -> AppResult<Vec<ColumnMetadata>> {
        let dialect = self.dialect();
        let result = self
            .fetch(&dialect.columns_query(schema, table, only))
            .await
            .map_err(AppError::into_catalog)?;
        columns_from_rows(dialect, &result.rows)
    }

    async fn export(&self, options: &ExportOptions) -> AppResult<String> {
        dump::export(self, options).await
    }

    async fn import(&self, script: &str) -> AppResult<()> {
        dump::import(self, script).await
    }

    /// One page of `source` plus the filtered total.
    async fn paged(&self, source: &Source, params: &QueryParams) -> AppResult<QueryResult> {
        let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let query = build_paged(self.dialect(), source, params, limit);
        let mut result = self.fetch(&query.select).await?;
        result.total = self.count(&query.count).await?;
        Ok(result)
    }
}

/// A live client for one of the supported engines.
pub enum Client {
    Sqlite(SqliteClient),
    Mysql(MysqlClient),
    Postgres(PostgresClient),
}

impl Client {
    /// Opens a driver session. Connection failures surface here or at the
    /// first [`DialectClient::ping`].
    pub async fn open(dialect: Dialect, connection_string: &str, settings: &ClientSettings) -> AppResult<Self> {
        let client = match dialect {
            Dialect::Sqlite => Client::Sqlite(SqliteClient::open(connection_string, settings.busy_timeout_ms)?),
            Dialect::Mysql => {
                Client::Mysql(MysqlClient::connect(connection_string, settings.mysql_max_connections).await?)
            }
            Dialect::Postgres => Client::Postgres(PostgresClient::connect(connection_string).await?),
        };
        Ok(client)
    }

    fn inner(&self) -> &dyn DialectClient {
        match self {
            Client::Sqlite(c) => c,
            Client::Mysql(c) => c,
            Client::Postgres(c) => c,
        }
    }
}

#[async_trait]
impl DialectClient for Client {
    fn dialect(&self) -> Dialect {
        self.inner().dialect()
    }

    async fn ping(&self) -> AppResult<()> {
        self.inner().ping().await
    }

    async fn fetch(&self, stmt: &Statement) -> AppResult<QueryResult> {
        self.inner().fetch(stmt).await
    }

    async fn count(&self, stmt: &Statement) -> AppResult<u64> {
        self.inner().count(stmt).await
    }

    async fn execute(&self, stmt: &Statement) -> AppResult<u64> {
        self.inner().execute(stmt).await
    }

    async fn execute_batch(&self, sql: &str) -> AppResult<()> {
        self.inner().execute_batch(sql).await
    }

    async fn close(&self) {
        self.inner().close().await
    }
}
