//! PostgreSQL client on a single tokio-postgres session.

use std::time::Instant;

use async_trait::async_trait;
use tokio_postgres::types::{FromSql, ToSql};
use tokio::task::JoinHandle;
use tokio_postgres::{Client as PgClient, NoTls, Row};
use tracing::{debug, warn};

use crate::core::client::DialectClient;
use crate::core::dialect::Dialect;
use crate::core::normalize::{cursor_column, elapsed, normalize_cell};
use crate::core::query::Statement;
use crate::core::rollback;
use crate::core::types::{ColumnMetadata, DbRow, QueryResult, SqlValue};
use crate::error::{AppError, AppResult};

pub struct PostgresClient {
    client: PgClient,
    /// Drives the socket; aborting it closes the session.
    connection: JoinHandle<()>,
}

impl PostgresClient {
    /// `connection_string` is a `postgres://` URL or a key/value string.
    /// TLS is not negotiated.
    pub async fn connect(connection_string: &str) -> AppResult<Self> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| AppError::Connection(format!("connecting to PostgreSQL: {e}")))?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        });
        Ok(Self { client, connection })
    }
}

fn bind_params(params: &[String]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl DialectClient for PostgresClient {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> AppResult<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(AppError::connection)?;
        Ok(())
    }

    async fn fetch(&self, stmt: &Statement) -> AppResult<QueryResult> {
        let started = Instant::now();
        let prepared = self.client.prepare(&stmt.sql).await?;
        let rows = self.client.query(&prepared, &bind_params(&stmt.params)).await?;
        let duration = elapsed(started.elapsed());

        let columns: Vec<ColumnMetadata> = prepared
            .columns()
            .iter()
            .map(|c| cursor_column(c.name(), Some(c.type_().name())))
            .collect();
        let rows: Vec<DbRow> = rows.iter().map(|r| decode_row(r, &columns)).collect();

        Ok(QueryResult {
            total: rows.len() as u64,
            rows,
            columns,
            duration,
        })
    }

    async fn count(&self, stmt: &Statement) -> AppResult<u64> {
        let row = self
            .client
            .query_one(stmt.sql.as_str(), &bind_params(&stmt.params))
            .await?;
        let n: i64 = row.try_get(0)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn execute(&self, stmt: &Statement) -> AppResult<u64> {
        Ok(self
            .client
            .execute(stmt.sql.as_str(), &bind_params(&stmt.params))
            .await?)
    }

    async fn execute_batch(&self, sql: &str) -> AppResult<()> {
        let res = self.client.batch_execute(sql).await.map_err(AppError::from);
        if res.is_err() {
            rollback::attempt(sql, async {
                self.client
                    .batch_execute(rollback::ROLLBACK)
                    .await
                    .map_err(AppError::from)
            })
            .await;
        }
        res
    }

    async fn close(&self) {
        self.connection.abort();
        debug!("postgres connection closed");
    }
}

fn decode_row(row: &Row, columns: &[ColumnMetadata]) -> DbRow {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.clone(), normalize_cell(decode_cell(row, i))))
        .collect()
}

/// `Ok(None)` is SQL NULL; `Err` means the Rust type did not fit the column.
fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(idx)
}

fn decode_cell(row: &Row, idx: usize) -> SqlValue {
    let ty = row.columns()[idx].type_();
    let decoded = match ty.name() {
        "bool" => get::<bool>(row, idx).map(|v| v.map(SqlValue::Bool)),
        "int2" => get::<i16>(row, idx).map(|v| v.map(|n| SqlValue::Int(n.into()))),
        "int4" => get::<i32>(row, idx).map(|v| v.map(|n| SqlValue::Int(n.into()))),
        "int8" => get::<i64>(row, idx).map(|v| v.map(SqlValue::Int)),
        "oid" => get::<u32>(row, idx).map(|v| v.map(|n| SqlValue::Int(n.into()))),
        "float4" => get::<f32>(row, idx).map(|v| v.map(|n| SqlValue::Float(n.into()))),
        "float8" => get::<f64>(row, idx).map(|v| v.map(SqlValue::Float)),
        "numeric" => get::<rust_decimal::Decimal>(row, idx)
            .map(|v| v.map(|d| SqlValue::Numeric(d.to_string()))),
        "bytea" => get::<Vec<u8>>(row, idx).map(|v| v.map(SqlValue::Bytes)),
        "timestamp" => get::<chrono::NaiveDateTime>(row, idx)
            .map(|v| v.map(|t| SqlValue::Timestamp(t.and_utc().fixed_offset()))),
        "timestamptz" => get::<chrono::DateTime<chrono::Utc>>(row, idx)
            .map(|v| v.map(|t| SqlValue::Timestamp(t.fixed_offset()))),
        "date" => get::<chrono::NaiveDate>(row, idx).map(|v| v.map(|d| SqlValue::Text(d.to_string()))),
        "time" => get::<chrono::NaiveTime>(row, idx).map(|v| v.map(|t| SqlValue::Text(t.to_string()))),
        "json" | "jsonb" => {
            get::<serde_json::Value>(row, idx).map(|v| v.map(|j| SqlValue::Text(j.to_string())))
        }
        "uuid" => get::<uuid::Uuid>(row, idx).map(|v| v.map(|u| SqlValue::Text(u.to_string()))),
        _ => get::<String>(row, idx).map(|v| v.map(SqlValue::Text)),
    };

    match decoded {
        Ok(Some(value)) => value,
        Ok(None) => SqlValue::Null,
        Err(e) => {
            debug!(column = idx, db_type = %ty.name(), error = %e, "cell not decodable");
            SqlValue::Unsupported {
                db_type: ty.name().to_string(),
            }
        }
    }
}
