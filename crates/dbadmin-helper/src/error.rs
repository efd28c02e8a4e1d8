use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Open/ping failure, unsupported dialect or missing profile.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("no active connection for id: {0}")]
    NotConnected(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("sql error: {0}")]
    Execution(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("import error: {0}")]
    Import(String),

    #[error("metadata store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Execution(e.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Execution(e.to_string())
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Execution(e.to_string())
    }
}

impl AppError {
    pub fn connection(e: impl Display) -> Self {
        AppError::Connection(e.to_string())
    }

    pub fn export(e: impl Display) -> Self {
        AppError::Export(e.to_string())
    }

    /// Any failure while establishing a session is a connection failure.
    pub fn into_connection(self) -> Self {
        match self {
            AppError::Connection(_) => self,
            other => AppError::Connection(other.to_string()),
        }
    }

    /// Re-labels a statement failure that happened while reading the catalog.
    pub fn into_catalog(self) -> Self {
        match self {
            AppError::Execution(msg) => AppError::Catalog(msg),
            other => other,
        }
    }

    /// Re-labels a statement failure that happened while replaying a dump.
    pub fn into_import(self) -> Self {
        match self {
            AppError::Execution(msg) => AppError::Import(msg),
            other => other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::NotConnected(_) => "NOT_CONNECTED",
            AppError::Catalog(_) => "CATALOG_ERROR",
            AppError::Execution(_) => "EXECUTION_ERROR",
            AppError::Export(_) => "EXPORT_ERROR",
            AppError::Import(_) => "IMPORT_ERROR",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Json(_) => "JSON_ERROR",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
