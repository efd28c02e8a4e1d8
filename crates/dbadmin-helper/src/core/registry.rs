use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, info, warn};

use crate::{
    core::{
        client::{Client, ClientSettings, DialectClient},
        dialect::Dialect,
        limits::effective_limit,
        store::ProfileStore,
        types::{ColumnMetadata, DatabaseMetadata, ExportOptions, QueryParams, QueryResult},
    },
    error::{AppError, AppResult},
};

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub client: ClientSettings,
    /// Upper bound for paginated reads.
    pub max_rows: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            client: ClientSettings::default(),
            max_rows: 1000,
        }
    }
}

/// A live client plus the catalog snapshot taken when it connected.
pub struct Session {
    pub client: Client,
    pub metadata: DatabaseMetadata,
}

enum SessionState {
    Connecting,
    Connected(Arc<Session>),
}

/// Live sessions keyed by saved-connection id. An id with no entry is
/// disconnected.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionState>>,
    store: Arc<dyn ProfileStore>,
    settings: RegistrySettings,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn ProfileStore>, settings: RegistrySettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            settings,
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<String, SessionState>>> {
        self.sessions
            .lock()
            .map_err(|_| AppError::Internal("poisoned lock".into()))
    }

    /// Opens the saved connection `id`, replacing any existing session for it.
    /// On failure the id is left disconnected.
    pub async fn connect(&self, id: &str) -> AppResult<DatabaseMetadata> {
        let profile = self.store.load_connection_profile(id)?;

        let previous = {
            let mut guard = self.lock()?;
            if matches!(guard.get(id), Some(SessionState::Connecting)) {
                return Err(AppError::Connection(format!(
                    "connection {id} is already being established"
                )));
            }
            guard.insert(id.to_string(), SessionState::Connecting)
        };
        if let Some(SessionState::Connected(old)) = previous {
            debug!(id, "replacing existing session");
            old.client.close().await;
        }

        match open_session(profile.dialect, &profile.connection_string, &self.settings.client).await {
            Ok(session) => {
                let metadata = session.metadata.clone();
                self.lock()?
                    .insert(id.to_string(), SessionState::Connected(Arc::new(session)));
                info!(id, dialect = %profile.dialect, schemas = metadata.len(), "connected");
                Ok(metadata)
            }
            Err(e) => {
                if let Ok(mut guard) = self.lock() {
                    guard.remove(id);
                }
                warn!(id, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    pub async fn disconnect(&self, id: &str) -> AppResult<()> {
        let session = {
            let mut guard = self.lock()?;
            match guard.remove(id) {
                Some(SessionState::Connected(s)) => s,
                Some(SessionState::Connecting) => {
                    guard.insert(id.to_string(), SessionState::Connecting);
                    return Err(AppError::NotConnected(id.to_string()));
                }
                None => return Err(AppError::NotConnected(id.to_string())),
            }
        };
        session.client.close().await;
        info!(id, "disconnected");
        Ok(())
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.session(id).is_ok()
    }

    fn session(&self, id: &str) -> AppResult<Arc<Session>> {
        match self.lock()?.get(id) {
            Some(SessionState::Connected(s)) => Ok(Arc::clone(s)),
            _ => Err(AppError::NotConnected(id.to_string())),
        }
    }

    fn page(&self, params: &QueryParams) -> QueryParams {
        QueryParams {
            limit: Some(effective_limit(params.limit, self.settings.max_rows)),
            ..params.clone()
        }
    }

    /// Catalog snapshot cached at connect time.
    pub fn metadata(&self, id: &str) -> AppResult<DatabaseMetadata> {
        Ok(self.session(id)?.metadata.clone())
    }

    pub async fn list_schemas(&self, id: &str, params: &QueryParams) -> AppResult<QueryResult> {
        let session = self.session(id)?;
        session.client.list_schemas(&self.page(params)).await
    }

    pub async fn list_tables(&self, id: &str, params: &QueryParams, schema: &str) -> AppResult<QueryResult> {
        let session = self.session(id)?;
        session.client.list_tables(&self.page(params), schema).await
    }

    pub async fn list_rows(&self, id: &str, params: &QueryParams, schema: &str, table: &str) -> AppResult<QueryResult> {
        let session = self.session(id)?;
        session.client.list_rows(&self.page(params), schema, table).await
    }

    /// Runs ad-hoc SQL and remembers it in the query history.
    pub async fn run_query(&self, id: &str, sql: &str, args: &[String]) -> AppResult<QueryResult> {
        let session = self.session(id)?;
        self.remember(sql);
        session.client.run_query(sql, args).await
    }

    pub async fn run_statement(&self, id: &str, sql: &str) -> AppResult<()> {
        let session = self.session(id)?;
        session.client.run_statement(sql).await
    }

    pub async fn describe_columns(&self, id: &str, schema: &str, table: &str, only: &[String]) -> AppResult<Vec<ColumnMetadata>> {
        let session = self.session(id)?;
        session.client.describe_columns(schema, table, only).await
    }

    pub async fn export(&self, id: &str, options: &ExportOptions) -> AppResult<String> {
        let session = self.session(id)?;
        session.client.export(options).await
    }

    pub async fn import(&self, id: &str, script: &str) -> AppResult<()> {
        let session = self.session(id)?;
        session.client.import(script).await
    }

    /// Opens, pings and closes a throwaway client.
    pub async fn test_connection(&self, dialect: Dialect, connection_string: &str) -> AppResult<()> {
        let client = Client::open(dialect, connection_string, &self.settings.client)
            .await
            .map_err(AppError::into_connection)?;
        let res = client.ping().await.map_err(AppError::into_connection);
        client.close().await;
        res
    }

    /// Records `sql` in the history on the blocking pool without waiting for it.
    fn remember(&self, sql: &str) {
        let store = Arc::clone(&self.store);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.record_query(&sql) {
                warn!(error = %e, "failed to record query history");
            }
        });
    }
}

async fn open_session(dialect: Dialect, connection_string: &str, settings: &ClientSettings) -> AppResult<Session> {
    let client = Client::open(dialect, connection_string, settings)
        .await
        .map_err(AppError::into_connection)?;

    let metadata = match client.ping().await {
        Ok(()) => client.get_metadata().await,
        Err(e) => Err(e),
    };
    match metadata {
        Ok(metadata) => Ok(Session { client, metadata }),
        Err(e) => {
            client.close().await;
            Err(e.into_connection())
        }
    }
}
