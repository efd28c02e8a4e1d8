use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use rusqlite::{params_from_iter, types::ValueRef, Connection, OpenFlags, Row};
use tokio::sync::oneshot;

use crate::{
    core::{
        client::DialectClient,
        dialect::Dialect,
        normalize::{cursor_column, elapsed, normalize_cell},
        query::Statement,
        rollback,
        types::{ColumnMetadata, DbRow, QueryResult, SqlValue},
    },
    error::{AppError, AppResult},
};

/// SQLite session. The connection lives on a dedicated worker thread and is
/// driven by messages, so statements on one database run one at a time.
#[derive(Debug)]
pub struct SqliteClient {
    tx: Sender<DbTask>,
    location: String,
}

impl SqliteClient {
    /// `location` is a file path, `:memory:` or a `file:` URI.
    pub fn open(location: &str, busy_timeout_ms: u64) -> AppResult<Self> {
        let conn = open_conn(location, busy_timeout_ms)?;
        let (tx, rx) = mpsc::channel::<DbTask>();
        let label = location.to_string();
        thread::Builder::new()
            .name("sqlite-worker".into())
            .spawn(move || db_worker_main(label, conn, rx))?;
        tracing::debug!(location, "sqlite worker started");
        Ok(Self {
            tx,
            location: location.to_string(),
        })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<AppResult<T>>) -> DbTask) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| AppError::Internal("db worker unavailable".into()))?;
        rx.await
            .map_err(|_| AppError::Internal("db worker dropped response".into()))?
    }

    async fn batch(&self, sql: String) -> AppResult<()> {
        self.request(|respond_to| DbTask::ExecuteBatch { sql, respond_to })
            .await
    }
}

#[async_trait]
impl DialectClient for SqliteClient {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn ping(&self) -> AppResult<()> {
        self.count(&Statement::new("SELECT 1")).await.map(|_| ())
    }

    async fn fetch(&self, stmt: &Statement) -> AppResult<QueryResult> {
        let stmt = stmt.clone();
        self.request(|respond_to| DbTask::Fetch { stmt, respond_to })
            .await
    }

    async fn count(&self, stmt: &Statement) -> AppResult<u64> {
        let stmt = stmt.clone();
        self.request(|respond_to| DbTask::Count { stmt, respond_to })
            .await
    }

    async fn execute(&self, stmt: &Statement) -> AppResult<u64> {
        let stmt = stmt.clone();
        self.request(|respond_to| DbTask::Execute { stmt, respond_to })
            .await
    }

    async fn execute_batch(&self, sql: &str) -> AppResult<()> {
        let res = self.batch(sql.to_string()).await;
        if res.is_err() {
            rollback::attempt(sql, self.batch(rollback::ROLLBACK.to_string())).await;
        }
        res
    }

    async fn close(&self) {
        if self.tx.send(DbTask::Close).is_err() {
            tracing::debug!(location = %self.location, "sqlite worker already stopped");
        }
    }
}

enum DbTask {
    Fetch {
        stmt: Statement,
        respond_to: oneshot::Sender<AppResult<QueryResult>>,
    },
    Count {
        stmt: Statement,
        respond_to: oneshot::Sender<AppResult<u64>>,
    },
    Execute {
        stmt: Statement,
        respond_to: oneshot::Sender<AppResult<u64>>,
    },
    ExecuteBatch {
        sql: String,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    Close,
}

fn db_worker_main(location: String, conn: Connection, rx: Receiver<DbTask>) {
    while let Ok(task) = rx.recv() {
        match task {
            DbTask::Fetch { stmt, respond_to } => {
                let _ = respond_to.send(run_fetch(&conn, &stmt));
            }
            DbTask::Count { stmt, respond_to } => {
                let _ = respond_to.send(run_count(&conn, &stmt));
            }
            DbTask::Execute { stmt, respond_to } => {
                let res = conn
                    .execute(&stmt.sql, params_from_iter(stmt.params.iter()))
                    .map(|n| n as u64)
                    .map_err(AppError::from);
                let _ = respond_to.send(res);
            }
            DbTask::ExecuteBatch { sql, respond_to } => {
                let _ = respond_to.send(conn.execute_batch(&sql).map_err(AppError::from));
            }
            DbTask::Close => break,
        }
    }
    if let Err((_, e)) = conn.close() {
        tracing::warn!(error = %e, location = %location, "failed to close sqlite connection");
    }
    tracing::debug!(location = %location, "sqlite worker stopped");
}

fn open_conn(location: &str, busy_timeout_ms: u64) -> AppResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(location, flags)
        .map_err(|e| AppError::Connection(format!("failed to open {location}: {e}")))?;
    if let Err(e) = conn.busy_timeout(Duration::from_millis(busy_timeout_ms)) {
        tracing::warn!(error = %e, location, "failed to set sqlite busy timeout");
    }
    Ok(conn)
}

fn run_fetch(conn: &Connection, stmt: &Statement) -> AppResult<QueryResult> {
    let started = Instant::now();
    let mut prepared = conn.prepare(&stmt.sql)?;
    let columns: Vec<ColumnMetadata> = prepared
        .columns()
        .iter()
        .map(|c| cursor_column(c.name(), c.decl_type()))
        .collect();

    let mut rows = Vec::new();
    let mut cursor = prepared.query(params_from_iter(stmt.params.iter()))?;
    while let Some(row) = cursor.next()? {
        rows.push(decode_row(row, &columns)?);
    }

    Ok(QueryResult {
        total: rows.len() as u64,
        rows,
        columns,
        duration: elapsed(started.elapsed()),
    })
}

fn run_count(conn: &Connection, stmt: &Statement) -> AppResult<u64> {
    let n: i64 = conn.query_row(&stmt.sql, params_from_iter(stmt.params.iter()), |r| r.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

fn decode_row(row: &Row<'_>, columns: &[ColumnMetadata]) -> AppResult<DbRow> {
    let mut out = DbRow::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Bytes(b.to_vec()),
        };
        out.insert(column.name.clone(), normalize_cell(value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> SqliteClient {
        SqliteClient::open(":memory:", 2_000).unwrap()
    }

    #[tokio::test]
    async fn fetch_decodes_and_normalizes_cells() {
        let client = memory();
        client
            .execute_batch(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, raw BLOB, gone TEXT);
                 INSERT INTO t VALUES (1, 'a', 1.5, X'6869', NULL);",
            )
            .await
            .unwrap();

        let res = client.fetch(&Statement::new("SELECT * FROM t")).await.unwrap();
        assert_eq!(res.total, 1);
        let names: Vec<&str> = res.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "score", "raw", "gone"]);
        assert_eq!(res.columns[0].data_type, "INTEGER");
        assert!(res.columns.iter().all(|c| c.nullable));

        let row = &res.rows[0];
        assert_eq!(row["id"], SqlValue::Int(1));
        assert_eq!(row["score"], SqlValue::Float(1.5));
        assert_eq!(row["raw"], SqlValue::Text("hi".into()));
        assert_eq!(row["gone"], SqlValue::Null);
    }

    #[tokio::test]
    async fn params_are_bound_as_text() {
        let client = memory();
        client
            .execute_batch("CREATE TABLE t (name TEXT); INSERT INTO t VALUES ('x'), ('y');")
            .await
            .unwrap();
        let n = client
            .count(&Statement::with_params(
                "SELECT COUNT(*) FROM t WHERE name = ?",
                vec!["y".into()],
            ))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn run_query_applies_every_statement_of_a_mutation() {
        let client = memory();
        client.execute_batch("CREATE TABLE t (id INTEGER);").await.unwrap();

        let res = client
            .run_query("INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);", &[])
            .await
            .unwrap();
        assert!(res.rows.is_empty());
        let n = client.count(&Statement::new("SELECT COUNT(*) FROM t")).await.unwrap();
        assert_eq!(n, 2);

        // With arguments the text is a single prepared statement.
        client
            .run_query("INSERT INTO t VALUES (?)", &["3".into()])
            .await
            .unwrap();
        let n = client.count(&Statement::new("SELECT COUNT(*) FROM t")).await.unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn failed_transaction_batch_is_rolled_back() {
        let client = memory();
        client.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);").await.unwrap();

        let err = client
            .execute_batch("BEGIN; INSERT INTO t VALUES (1); INSERT INTO missing VALUES (1); COMMIT;")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXECUTION_ERROR");

        let n = client.count(&Statement::new("SELECT COUNT(*) FROM t")).await.unwrap();
        assert_eq!(n, 0);
        // The session is usable again.
        client.execute_batch("BEGIN; INSERT INTO t VALUES (2); COMMIT;").await.unwrap();
    }

    #[tokio::test]
    async fn closed_client_reports_unavailable_worker() {
        let client = memory();
        client.close().await;
        let err = client.ping().await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
    }

    #[tokio::test]
    async fn busy_timeout_is_applied_on_open() {
        let client = SqliteClient::open(":memory:", 1_234).unwrap();
        let res = client.fetch(&Statement::new("PRAGMA busy_timeout")).await.unwrap();
        assert_eq!(res.rows[0]["timeout"], SqlValue::Int(1_234));
    }

    #[test]
    fn open_failure_is_a_connection_error() {
        let err = SqliteClient::open("/nonexistent-dir/x/y.db", 100).unwrap_err();
        assert_eq!(err.code(), "CONNECTION_ERROR");
    }
}
