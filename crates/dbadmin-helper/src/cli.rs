use std::path::PathBuf;

use clap::Parser;

use crate::{
    core::{client::ClientSettings, registry::RegistrySettings},
    error::{AppError, AppResult},
};

#[derive(Parser, Debug, Clone)]
#[command(name = "dbadmin-helper")]
pub struct Args {
    /// Logging level (stderr). Also supports RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Maximum rows returned per page (unless a smaller limit is provided).
    #[arg(long, default_value_t = 1000)]
    pub max_rows: usize,

    /// SQLite file holding saved connections and query history.
    /// Defaults to `<data dir>/dbadmin-helper/metadata.db`.
    #[arg(long)]
    pub metadata_db: Option<PathBuf>,

    /// Pool size for each MySQL session.
    #[arg(long, default_value_t = 4)]
    pub mysql_max_connections: u32,

    /// How long SQLite waits on a locked database.
    #[arg(long, default_value_t = 2_000)]
    pub busy_timeout_ms: u64,

    /// Force protocol version (reserved for future).
    #[arg(long)]
    pub protocol_version: Option<u32>,
}

impl Args {
    pub fn metadata_db_path(&self) -> AppResult<PathBuf> {
        if let Some(p) = &self.metadata_db {
            return Ok(p.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("dbadmin-helper").join("metadata.db"))
            .ok_or_else(|| AppError::Internal("no data directory; pass --metadata-db".into()))
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            client: ClientSettings {
                busy_timeout_ms: self.busy_timeout_ms,
                mysql_max_connections: self.mysql_max_connections,
            },
            max_rows: self.max_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["dbadmin-helper"]).unwrap();
        assert_eq!(args.max_rows, 1000);
        assert_eq!(args.log_level, "info");
        let settings = args.registry_settings();
        assert_eq!(settings.client.mysql_max_connections, 4);
        assert_eq!(settings.client.busy_timeout_ms, 2_000);
    }

    #[test]
    fn explicit_metadata_db_wins() {
        let args = Args::try_parse_from([
            "dbadmin-helper",
            "--metadata-db",
            "/tmp/meta.db",
            "--max-rows",
            "50",
        ])
        .unwrap();
        assert_eq!(args.metadata_db_path().unwrap(), PathBuf::from("/tmp/meta.db"));
        assert_eq!(args.registry_settings().max_rows, 50);
    }
}
