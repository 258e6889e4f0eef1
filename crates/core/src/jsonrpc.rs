//! Minimal JSON-RPC 2.0 envelope for talking to upstream MCP servers.
//!
//! Only the client side of `initialize`, `tools/list`, and `tools/call` is
//! needed; transports live with their callers (discovery, executor).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ToolhubError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision sent in `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
            id,
        }
    }

    /// The `initialize` handshake request.
    pub fn initialize(client_name: &str, client_version: &str) -> Self {
        Self::new(
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": client_name, "version": client_version},
            })),
            0,
        )
    }

    pub fn tools_list() -> Self {
        Self::new("tools/list", Some(serde_json::json!({})), 1)
    }

    pub fn tools_call(tool_name: &str, arguments: &Value) -> Self {
        Self::new(
            "tools/call",
            Some(serde_json::json!({"name": tool_name, "arguments": arguments})),
            1,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    /// Collapses the response into its `result`, surfacing the remote error.
    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(ToolhubError::Backend(format!(
                "JSON-RPC error {}: {}",
                err.code, err.message
            )));
        }
        self.result
            .ok_or_else(|| ToolhubError::Backend("JSON-RPC response carried no result".into()))
    }
}
