use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    cli::Args,
    core::{
        dialect::Dialect,
        registry::{RegistrySettings, SessionRegistry},
        store::MetadataStore,
    },
    error::{AppError, AppResult},
};

use super::protocol::*;

pub struct BridgeHandler {
    store: Arc<MetadataStore>,
    registry: SessionRegistry,
    version: u32,
}

impl BridgeHandler {
    pub fn new(args: &Args) -> AppResult<Self> {
        let store = Arc::new(MetadataStore::open(&args.metadata_db_path()?)?);
        let mut handler = Self::from_parts(store, args.registry_settings());
        if let Some(v) = args.protocol_version {
            handler.version = v;
        }
        Ok(handler)
    }

    pub fn from_parts(store: Arc<MetadataStore>, settings: RegistrySettings) -> Self {
        Self {
            registry: SessionRegistry::new(store.clone(), settings),
            store,
            version: PROTOCOL_VERSION,
        }
    }

    pub async fn handle(&self, req: BridgeRequest) -> BridgeResponse<Value> {
        if req.v != self.version {
            let e = AppError::InvalidRequest(format!("unsupported protocol version: {}", req.v));
            return BridgeResponse::err(req.v, req.id, &e);
        }

        match self.dispatch(&req.cmd, req.payload).await {
            Ok(data) => BridgeResponse::ok(req.v, req.id, data),
            Err(e) => {
                tracing::debug!(cmd = %req.cmd, code = e.code(), error = %e, "request failed");
                BridgeResponse::err(req.v, req.id, &e)
            }
        }
    }

    async fn dispatch(&self, cmd: &str, payload: Value) -> AppResult<Value> {
        match cmd {
            "connections.list" => json(self.store.list_connections()?),
            "connections.create" => {
                let p: ProfilePayload = parse(payload)?;
                let dialect: Dialect = p.dialect.parse()?;
                json(self.store.create_connection(&p.name, dialect, &p.connection_string)?)
            }
            "connections.update" => {
                let p: UpdateProfilePayload = parse(payload)?;
                let profile = &p.profile;
                let dialect: Dialect = profile.dialect.parse()?;
                json(self.store.update_connection(
                    &p.id,
                    &profile.name,
                    dialect,
                    &profile.connection_string,
                )?)
            }
            "connections.delete" => {
                let p: IdPayload = parse(payload)?;
                if self.registry.is_connected(&p.id) {
                    self.registry.disconnect(&p.id).await?;
                }
                self.store.delete_connection(&p.id)?;
                json(true)
            }
            "connections.test" => {
                let p: TestConnectionPayload = parse(payload)?;
                let dialect: Dialect = p.dialect.parse()?;
                self.registry
                    .test_connection(dialect, &p.connection_string)
                    .await?;
                json(true)
            }
            "connect" => {
                let p: IdPayload = parse(payload)?;
                json(self.registry.connect(&p.id).await?)
            }
            "disconnect" => {
                let p: IdPayload = parse(payload)?;
                self.registry.disconnect(&p.id).await?;
                json(true)
            }
            "metadata" => {
                let p: IdPayload = parse(payload)?;
                json(self.registry.metadata(&p.id)?)
            }
            "schemas" => {
                let p: SchemasPayload = parse(payload)?;
                json(self.registry.list_schemas(&p.id, &p.params).await?)
            }
            "tables" => {
                let p: TablesPayload = parse(payload)?;
                json(self.registry.list_tables(&p.id, &p.params, &p.schema).await?)
            }
            "rows" => {
                let p: RowsPayload = parse(payload)?;
                json(
                    self.registry
                        .list_rows(&p.id, &p.params, &p.schema, &p.table)
                        .await?,
                )
            }
            "query" => {
                let p: QueryPayload = parse(payload)?;
                json(self.registry.run_query(&p.id, &p.sql, &p.args).await?)
            }
            "execute" => {
                let p: SqlPayload = parse(payload)?;
                self.registry.run_statement(&p.id, &p.sql).await?;
                json(true)
            }
            "columns" => {
                let p: ColumnsPayload = parse(payload)?;
                json(
                    self.registry
                        .describe_columns(&p.id, &p.schema, &p.table, &p.columns)
                        .await?,
                )
            }
            "export" => {
                let p: ExportPayload = parse(payload)?;
                json(self.registry.export(&p.id, &p.options).await?)
            }
            "import" => {
                let p: SqlPayload = parse(payload)?;
                self.registry.import(&p.id, &p.sql).await?;
                json(true)
            }
            "history.list" => json(self.store.past_queries()?),
            "history.delete" => {
                let p: IdPayload = parse(payload)?;
                self.store.delete_past_query(&p.id)?;
                json(true)
            }
            other => Err(AppError::InvalidRequest(format!("unknown cmd: {other}"))),
        }
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> AppResult<T> {
    serde_json::from_value(payload).map_err(|e| AppError::InvalidRequest(e.to_string()))
}

fn json<T: Serialize>(v: T) -> AppResult<Value> {
    Ok(serde_json::to_value(v)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(cmd: &str, payload: Value) -> BridgeRequest {
        BridgeRequest {
            v: 1,
            id: "r1".into(),
            cmd: cmd.into(),
            payload,
        }
    }

    async fn call(h: &BridgeHandler, cmd: &str, payload: Value) -> Value {
        let resp = h.handle(request(cmd, payload)).await;
        assert_eq!(resp.status, "ok", "{cmd} failed: {:?}", resp.error);
        resp.data.unwrap()
    }

    fn handler() -> BridgeHandler {
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        BridgeHandler::from_parts(store, RegistrySettings::default())
    }

    #[tokio::test]
    async fn browse_query_and_export_over_the_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("shop.db");
        let h = handler();

        let profile = call(
            &h,
            "connections.create",
            json!({"name": "shop", "type": "sqlite", "connection_string": db.to_str().unwrap()}),
        )
        .await;
        let id = profile["id"].as_str().unwrap().to_string();

        call(&h, "connect", json!({"id": id})).await;
        call(
            &h,
            "execute",
            json!({"id": id, "sql": "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO items (name) VALUES ('pen'), ('ink');"}),
        )
        .await;

        let rows = call(
            &h,
            "rows",
            json!({"id": id, "schema": "main", "table": "items", "params": {"limit": 1, "order": [{"column": "id", "direction": "DESC"}]}}),
        )
        .await;
        assert_eq!(rows["total"], 2);
        assert_eq!(rows["rows"], json!([{"id": 2, "name": "ink"}]));

        let result = call(
            &h,
            "query",
            json!({"id": id, "sql": "SELECT name FROM items WHERE id = ?", "args": ["1"]}),
        )
        .await;
        assert_eq!(result["rows"], json!([{"name": "pen"}]));

        let dump = call(
            &h,
            "export",
            json!({"id": id, "options": {"selected": ["main.items"], "schema_only": true}}),
        )
        .await;
        assert_eq!(
            dump,
            json!("DROP TABLE IF EXISTS items;\nCREATE TABLE items (\n    id INTEGER NOT NULL PRIMARY KEY,\n    name TEXT\n);\n")
        );

        let mut remembered = false;
        for _ in 0..100 {
            let history = call(&h, "history.list", json!({})).await;
            if history[0]["query"] == "SELECT name FROM items WHERE id = ?" {
                remembered = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(remembered);

        call(&h, "disconnect", json!({"id": id})).await;
        let resp = h.handle(request("metadata", json!({"id": id}))).await;
        assert_eq!(resp.code, Some("NOT_CONNECTED"));
    }

    #[tokio::test]
    async fn bad_requests_are_reported_with_codes() {
        let h = handler();

        let resp = h.handle(request("nope", json!({}))).await;
        assert_eq!(resp.status, "error");
        assert_eq!(resp.code, Some("INVALID_REQUEST"));

        let resp = h.handle(request("connect", json!({}))).await;
        assert_eq!(resp.code, Some("INVALID_REQUEST"));

        let mut req = request("connections.list", json!({}));
        req.v = 9;
        let resp = h.handle(req).await;
        assert_eq!(resp.code, Some("INVALID_REQUEST"));

        let resp = h
            .handle(request(
                "connections.create",
                json!({"name": "x", "type": "oracle", "connection_string": "x"}),
            ))
            .await;
        assert_eq!(resp.code, Some("CONNECTION_ERROR"));

        let resp = h
            .handle(request(
                "connections.test",
                json!({"type": "oracle", "connection_string": "x"}),
            ))
            .await;
        assert_eq!(resp.code, Some("CONNECTION_ERROR"));

        // Alternate engine spellings are accepted.
        let profile = call(
            &h,
            "connections.create",
            json!({"name": "m", "type": "mariadb", "connection_string": "root@tcp(localhost:3306)/db"}),
        )
        .await;
        assert_eq!(profile["dialect"], "mysql");
    }
}
