//! Saved connection profiles and query history, kept in a local SQLite file.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::dialect::Dialect;
use crate::core::types::{ConnectionProfile, PastQuery};
use crate::error::{AppError, AppResult};

/// What the session registry needs from persistence.
pub trait ProfileStore: Send + Sync {
    fn load_connection_profile(&self, id: &str) -> AppResult<ConnectionProfile>;

    fn record_query(&self, sql: &str) -> AppResult<()>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS connection (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    connection_string TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS past_query (
    id TEXT PRIMARY KEY,
    query TEXT NOT NULL UNIQUE,
    last_used TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    seq INTEGER NOT NULL DEFAULT 0
);
";

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

fn store_err(e: rusqlite::Error) -> AppError {
    AppError::Store(e.to_string())
}

impl MetadataStore {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(store_err)?;
        tracing::debug!(path = %path.display(), "metadata store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::init(Connection::open_in_memory().map_err(store_err)?)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| AppError::Internal("poisoned lock".into()))?;
        f(&guard)
    }

    pub fn list_connections(&self) -> AppResult<Vec<ConnectionProfile>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, created_at, updated_at, name, type, connection_string \
                     FROM connection ORDER BY created_at, name",
                )
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], profile_from_row)
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;
            rows.into_iter().collect()
        })
    }

    pub fn get_connection(&self, id: &str) -> AppResult<Option<ConnectionProfile>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, created_at, updated_at, name, type, connection_string \
                 FROM connection WHERE id = ?1",
                [id],
                profile_from_row,
            )
            .optional()
            .map_err(store_err)?
            .transpose()
        })
    }

    pub fn create_connection(&self, name: &str, dialect: Dialect, connection_string: &str) -> AppResult<ConnectionProfile> {
        let id = uuid::Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO connection (id, name, type, connection_string) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, dialect.as_str(), connection_string],
            )
            .map_err(store_err)?;
            Ok(())
        })?;
        tracing::info!(id = %id, dialect = %dialect, "connection profile created");
        self.get_connection(&id)?
            .ok_or_else(|| AppError::Store(format!("connection vanished after insert: {id}")))
    }

    pub fn update_connection(&self, id: &str, name: &str, dialect: Dialect, connection_string: &str) -> AppResult<ConnectionProfile> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE connection SET name = ?1, type = ?2, connection_string = ?3, \
                 updated_at = CURRENT_TIMESTAMP WHERE id = ?4",
                params![name, dialect.as_str(), connection_string, id],
            )
            .map_err(store_err)
        })?;
        if changed == 0 {
            return Err(AppError::Store(format!("no connection with id: {id}")));
        }
        self.get_connection(id)?
            .ok_or_else(|| AppError::Store(format!("no connection with id: {id}")))
    }

    pub fn delete_connection(&self, id: &str) -> AppResult<()> {
        let changed = self.with_conn(|conn| {
            conn.execute("DELETE FROM connection WHERE id = ?1", [id])
                .map_err(store_err)
        })?;
        if changed == 0 {
            return Err(AppError::Store(format!("no connection with id: {id}")));
        }
        Ok(())
    }

    /// History, most recently used first.
    pub fn past_queries(&self) -> AppResult<Vec<PastQuery>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, query, last_used FROM past_query ORDER BY seq DESC")
                .map_err(store_err)?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(PastQuery {
                        id: r.get(0)?,
                        query: r.get(1)?,
                        last_used: r.get(2)?,
                    })
                })
                .map_err(store_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(store_err)?;
            Ok(rows)
        })
    }

    pub fn delete_past_query(&self, id: &str) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM past_query WHERE id = ?1", [id])
                .map_err(store_err)?;
            Ok(())
        })
    }
}

impl ProfileStore for MetadataStore {
    fn load_connection_profile(&self, id: &str) -> AppResult<ConnectionProfile> {
        self.get_connection(id)?
            .ok_or_else(|| AppError::Connection(format!("no saved connection with id: {id}")))
    }

    fn record_query(&self, sql: &str) -> AppResult<()> {
        let id = uuid::Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO past_query (id, query, seq) \
                 VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM past_query)) \
                 ON CONFLICT(query) DO UPDATE SET last_used = CURRENT_TIMESTAMP, seq = excluded.seq",
                params![id, sql],
            )
            .map_err(store_err)?;
            Ok(())
        })
    }
}

/// An unknown `type` value is reported as an unsupported database type, not
/// as a row decoding failure.
fn profile_from_row(r: &Row<'_>) -> rusqlite::Result<AppResult<ConnectionProfile>> {
    let dialect: String = r.get(4)?;
    let id: String = r.get(0)?;
    let created_at: String = r.get(1)?;
    let updated_at: String = r.get(2)?;
    let name: String = r.get(3)?;
    let connection_string: String = r.get(5)?;
    Ok(dialect.parse::<Dialect>().map(|dialect| ConnectionProfile {
        id,
        name,
        dialect,
        connection_string,
        created_at,
        updated_at,
    }))
}
