use serde::{Deserialize, Serialize};

use crate::core::types::{ExportOptions, QueryParams};
use crate::error::AppError;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeRequest {
    pub v: u32,
    pub id: String,
    pub cmd: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct BridgeResponse<T> {
    pub v: u32,
    pub id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T> BridgeResponse<T> {
    pub fn ok(v: u32, id: String, data: T) -> Self {
        Self {
            v,
            id,
            status: "ok",
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(v: u32, id: String, e: &AppError) -> Self {
        Self {
            v,
            id,
            status: "error",
            data: None,
            error: Some(e.to_string()),
            code: Some(e.code()),
        }
    }
}

// Payloads

#[derive(Debug, Deserialize)]
pub struct IdPayload {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfilePayload {
    pub name: String,
    /// Parsed by the handler so an unknown engine is a connection error.
    #[serde(rename = "type")]
    pub dialect: String,
    pub connection_string: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfilePayload {
    pub id: String,
    #[serde(flatten)]
    pub profile: ProfilePayload,
}

#[derive(Debug, Deserialize)]
pub struct TestConnectionPayload {
    #[serde(rename = "type")]
    pub dialect: String,
    pub connection_string: String,
}

#[derive(Debug, Deserialize)]
pub struct SchemasPayload {
    pub id: String,
    #[serde(default)]
    pub params: QueryParams,
}

#[derive(Debug, Deserialize)]
pub struct TablesPayload {
    pub id: String,
    #[serde(default)]
    pub params: QueryParams,
    pub schema: String,
}

#[derive(Debug, Deserialize)]
pub struct RowsPayload {
    pub id: String,
    #[serde(default)]
    pub params: QueryParams,
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryPayload {
    pub id: String,
    pub sql: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SqlPayload {
    pub id: String,
    pub sql: String,
}

#[derive(Debug, Deserialize)]
pub struct ColumnsPayload {
    pub id: String,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportPayload {
    pub id: String,
    #[serde(default)]
    pub options: ExportOptions,
}
