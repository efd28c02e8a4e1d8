//! MySQL client on an sqlx pool.

use std::str::FromStr;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::core::client::DialectClient;
use crate::core::dialect::Dialect;
use crate::core::normalize::{cursor_column, elapsed, normalize_cell};
use crate::core::query::Statement;
use crate::core::rollback;
use crate::core::types::{ColumnMetadata, DbRow, QueryResult, SqlValue};
use crate::error::{AppError, AppResult};

const DEFAULT_PORT: u16 = 3306;

pub struct MysqlClient {
    pool: MySqlPool,
}

impl MysqlClient {
    pub async fn connect(connection_string: &str, max_connections: u32) -> AppResult<Self> {
        let options = connect_options(connection_string)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| AppError::Connection(format!("creating MySQL pool: {e}")))?;
        info!(max_connections, "mysql pool ready");
        Ok(Self { pool })
    }

    /// Column descriptions for a statement that returned no rows.
    async fn describe(&self, sql: &str) -> Vec<ColumnMetadata> {
        match (&self.pool).prepare(sql).await {
            Ok(prepared) => sqlx::Statement::columns(&prepared)
                .iter()
                .map(|c| cursor_column(c.name(), Some(c.type_info().name())))
                .collect(),
            Err(e) => {
                debug!(error = %e, "could not describe empty result");
                Vec::new()
            }
        }
    }
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [String],
) -> Query<'q, MySql, MySqlArguments> {
    for p in params {
        query = query.bind(p.as_str());
    }
    query
}

#[async_trait]
impl DialectClient for MysqlClient {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::connection)?;
        Ok(())
    }

    async fn fetch(&self, stmt: &Statement) -> AppResult<QueryResult> {
        let started = Instant::now();
        let rows: Vec<MySqlRow> = bind_all(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_all(&self.pool)
            .await?;
        let duration = elapsed(started.elapsed());

        let columns = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| cursor_column(c.name(), Some(c.type_info().name())))
                .collect(),
            None => self.describe(&stmt.sql).await,
        };
        let rows: Vec<DbRow> = rows.iter().map(|r| decode_row(r, &columns)).collect();

        Ok(QueryResult {
            total: rows.len() as u64,
            rows,
            columns,
            duration,
        })
    }

    async fn count(&self, stmt: &Statement) -> AppResult<u64> {
        let row = bind_all(sqlx::query(&stmt.sql), &stmt.params)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get(0)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn execute(&self, stmt: &Statement) -> AppResult<u64> {
        let done = if stmt.params.is_empty() {
            sqlx::raw_sql(&stmt.sql).execute(&self.pool).await?
        } else {
            bind_all(sqlx::query(&stmt.sql), &stmt.params)
                .execute(&self.pool)
                .await?
        };
        Ok(done.rows_affected())
    }

    async fn execute_batch(&self, sql: &str) -> AppResult<()> {
        // The script and its rollback must share one session.
        let mut pooled = self.pool.acquire().await.map_err(AppError::connection)?;
        let conn: &mut MySqlConnection = &mut pooled;

        let res = conn
            .execute(sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(AppError::from);
        if res.is_err() {
            rollback::attempt(sql, async move {
                conn.execute(sqlx::raw_sql(rollback::ROLLBACK))
                    .await
                    .map(|_| ())
                    .map_err(AppError::from)
            })
            .await;
        }
        res
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_row(row: &MySqlRow, columns: &[ColumnMetadata]) -> DbRow {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.clone(), normalize_cell(decode_cell(row, i))))
        .collect()
}

fn decode_cell(row: &MySqlRow, idx: usize) -> SqlValue {
    let is_null = row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true);
    if is_null {
        return SqlValue::Null;
    }

    let type_name = row.columns()[idx].type_info().name().to_ascii_uppercase();
    let unsigned = type_name.ends_with(" UNSIGNED");
    let decoded = match type_name.trim_end_matches(" UNSIGNED") {
        "BOOLEAN" => row.try_get::<bool, _>(idx).ok().map(SqlValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" if unsigned => {
            row.try_get::<u64, _>(idx).ok().map(|v| match i64::try_from(v) {
                Ok(v) => SqlValue::Int(v),
                Err(_) => SqlValue::Numeric(v.to_string()),
            })
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get::<i64, _>(idx).ok().map(SqlValue::Int)
        }
        "FLOAT" => row.try_get::<f32, _>(idx).ok().map(|v| SqlValue::Float(f64::from(v))),
        "DOUBLE" => row.try_get::<f64, _>(idx).ok().map(SqlValue::Float),
        "DECIMAL" => row
            .try_get::<rust_decimal::Decimal, _>(idx)
            .ok()
            .map(|v| SqlValue::Numeric(v.to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .map(|v| SqlValue::Text(v.to_string())),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .map(|v| SqlValue::Text(v.to_string())),
        "DATETIME" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .map(|v| SqlValue::Timestamp(v.and_utc().fixed_offset())),
        "TIMESTAMP" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .map(|v| SqlValue::Timestamp(v.fixed_offset())),
        _ => None,
    };

    decoded.unwrap_or_else(|| fallback(row, idx, &type_name))
}

fn fallback(row: &MySqlRow, idx: usize, type_name: &str) -> SqlValue {
    if let Ok(s) = row.try_get::<String, _>(idx) {
        return SqlValue::Text(s);
    }
    if let Ok(b) = row.try_get::<Vec<u8>, _>(idx) {
        return SqlValue::Bytes(b);
    }
    SqlValue::Unsupported {
        db_type: type_name.to_string(),
    }
}

/// Accepts either a `mysql://` URL or a Go-driver style DSN.
pub(crate) fn connect_options(connection_string: &str) -> AppResult<MySqlConnectOptions> {
    let s = connection_string.trim();
    if s.starts_with("mysql://") || s.starts_with("mariadb://") {
        return MySqlConnectOptions::from_str(s).map_err(AppError::connection);
    }
    Ok(GoDsn::parse(s)?.into_options())
}

/// `[user[:password]@][net[(addr)]]/dbname[?param=value&...]`
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct GoDsn {
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    socket: Option<String>,
    database: Option<String>,
    params: Vec<(String, String)>,
}

impl GoDsn {
    pub(crate) fn parse(dsn: &str) -> AppResult<Self> {
        let invalid = |why: &str| AppError::Connection(format!("invalid mysql dsn: {why}"));
        let mut out = GoDsn::default();

        // Passwords may contain '@', so split on the last one.
        let (creds, rest) = match dsn.rfind('@') {
            Some(i) => (Some(&dsn[..i]), &dsn[i + 1..]),
            None => (None, dsn),
        };
        if let Some(creds) = creds {
            let (user, password) = match creds.split_once(':') {
                Some((u, p)) => (u, Some(p)),
                None => (creds, None),
            };
            if !user.is_empty() {
                out.user = Some(user.to_string());
            }
            out.password = password.filter(|p| !p.is_empty()).map(str::to_string);
        }

        // A socket path may itself contain '/', so look past the address.
        let search_from = rest.find(')').map(|i| i + 1).unwrap_or(0);
        let slash = rest[search_from..]
            .find('/')
            .map(|i| i + search_from)
            .ok_or_else(|| invalid("missing '/' before the database name"))?;
        let (net_addr, db_part) = (&rest[..slash], &rest[slash + 1..]);

        match net_addr.split_once('(') {
            Some((net, addr)) => {
                let addr = addr
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("unterminated address"))?;
                match net {
                    "tcp" | "" => {
                        let (host, port) = match addr.rsplit_once(':') {
                            Some((h, p)) => {
                                let port = p.parse::<u16>().map_err(|_| invalid("bad port"))?;
                                (h, Some(port))
                            }
                            None => (addr, None),
                        };
                        if !host.is_empty() {
                            out.host = Some(host.to_string());
                        }
                        out.port = port;
                    }
                    "unix" => out.socket = Some(addr.to_string()),
                    other => return Err(invalid(&format!("unsupported network {other:?}"))),
                }
            }
            None if net_addr.is_empty() || net_addr == "tcp" => {}
            None => return Err(invalid("address must be written as net(addr)")),
        }

        let (database, query) = match db_part.split_once('?') {
            Some((d, q)) => (d, Some(q)),
            None => (db_part, None),
        };
        if !database.is_empty() {
            out.database = Some(database.to_string());
        }
        if let Some(query) = query {
            out.params = query
                .split('&')
                .filter(|kv| !kv.is_empty())
                .map(|kv| {
                    let (k, v) = kv.split_once('=').unwrap_or((kv, ""));
                    (k.to_string(), v.to_string())
                })
                .collect();
        }
        Ok(out)
    }

    pub(crate) fn into_options(self) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new();
        if let Some(socket) = &self.socket {
            opts = opts.socket(socket);
        } else {
            opts = opts
                .host(self.host.as_deref().unwrap_or("localhost"))
                .port(self.port.unwrap_or(DEFAULT_PORT));
        }
        if let Some(user) = &self.user {
            opts = opts.username(user);
        }
        if let Some(password) = &self.password {
            opts = opts.password(password);
        }
        if let Some(database) = &self.database {
            opts = opts.database(database);
        }
        for (key, value) in &self.params {
            match key.as_str() {
                "charset" => opts = opts.charset(value),
                // Driver-specific knobs like parseTime have no equivalent here.
                _ => debug!(param = %key, "ignoring mysql dsn parameter"),
            }
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_dsn() {
        let dsn = GoDsn::parse("root:secret@tcp(127.0.0.1:3307)/shop?parseTime=true").unwrap();
        assert_eq!(dsn.user.as_deref(), Some("root"));
        assert_eq!(dsn.password.as_deref(), Some("secret"));
        assert_eq!(dsn.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(dsn.port, Some(3307));
        assert_eq!(dsn.database.as_deref(), Some("shop"));
        assert_eq!(dsn.params, vec![("parseTime".to_string(), "true".to_string())]);
    }

    #[test]
    fn password_may_contain_at_sign() {
        let dsn = GoDsn::parse("app:p@ss@tcp(db:3306)/main").unwrap();
        assert_eq!(dsn.user.as_deref(), Some("app"));
        assert_eq!(dsn.password.as_deref(), Some("p@ss"));
        assert_eq!(dsn.host.as_deref(), Some("db"));
    }

    #[test]
    fn parses_unix_socket_and_bare_dsn() {
        let dsn = GoDsn::parse("u@unix(/var/run/mysqld/mysqld.sock)/app").unwrap();
        assert_eq!(dsn.socket.as_deref(), Some("/var/run/mysqld/mysqld.sock"));
        assert_eq!(dsn.database.as_deref(), Some("app"));

        let dsn = GoDsn::parse("/app").unwrap();
        assert_eq!(dsn.user, None);
        assert_eq!(dsn.host, None);
        assert_eq!(dsn.database.as_deref(), Some("app"));
    }

    #[test]
    fn rejects_malformed_dsn() {
        assert_eq!(GoDsn::parse("root@tcp(localhost:3306)").unwrap_err().code(), "CONNECTION_ERROR");
        assert!(GoDsn::parse("root@tcp(localhost:x)/db").is_err());
        assert!(GoDsn::parse("root@udp(localhost)/db").is_err());
    }

    #[test]
    fn url_form_is_accepted() {
        assert!(connect_options("mysql://root:pw@localhost:3306/shop").is_ok());
        assert!(connect_options("root:pw@tcp(localhost:3306)/shop").is_ok());
    }
}
