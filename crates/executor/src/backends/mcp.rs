//! `MCP_SERVER` backend: JSON-RPC `tools/call` against the upstream server
//! the tool was mirrored from.

use serde::Deserialize;
use serde_json::{json, Value};

use toolhub_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use toolhub_core::{Result, Tool, ToolhubError};

#[derive(Debug, Clone, Deserialize)]
pub struct McpToolConfig {
    pub url: String,
    /// The tool's name on the upstream server (without the source prefix).
    #[serde(default)]
    pub tool_name: Option<String>,
}

fn parse_config(tool: &Tool) -> Result<McpToolConfig> {
    let raw = tool.implementation_code.as_deref().ok_or_else(|| {
        ToolhubError::InvalidInput(format!("tool '{}' has no MCP server config", tool.name))
    })?;
    let config: McpToolConfig = serde_json::from_str(raw)
        .map_err(|e| ToolhubError::InvalidInput(format!("MCP server config: {e}")))?;
    if config.url.is_empty() {
        return Err(ToolhubError::InvalidInput("MCP server config has no url".into()));
    }
    Ok(config)
}

/// Derives the remote tool name: explicit config first, else the part after
/// the namespace colon.
fn remote_name<'a>(tool: &'a Tool, config: &'a McpToolConfig) -> &'a str {
    config
        .tool_name
        .as_deref()
        .unwrap_or_else(|| tool.name.rsplit(':').next().unwrap_or(&tool.name))
}

/// Unwraps the MCP result shape `{content: [{type: "text", text}], isError}`
/// into a plain JSON value; passes anything else through.
fn unwrap_content(result: Value) -> Result<Value> {
    if result["isError"].as_bool().unwrap_or(false) {
        return Err(ToolhubError::Backend(format!(
            "upstream tool reported an error: {result}"
        )));
    }
    if let Some(first) = result["content"].as_array().and_then(|c| c.first()) {
        if let Some(text) = first["text"].as_str() {
            // Structured payloads often travel as serialized JSON text.
            return Ok(serde_json::from_str(text).unwrap_or_else(|_| json!({"result": text})));
        }
    }
    Ok(result)
}

pub async fn execute(client: &reqwest::Client, tool: &Tool, arguments: &Value) -> Result<Value> {
    let config = parse_config(tool)?;
    let request = JsonRpcRequest::tools_call(remote_name(tool, &config), arguments);

    let response = client
        .post(&config.url)
        .json(&request)
        .send()
        .await
        .map_err(|e| ToolhubError::BackendUnavailable(format!("MCP server unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ToolhubError::Backend(format!(
            "MCP server returned {status}: {body}"
        )));
    }

    let parsed: JsonRpcResponse = response
        .json()
        .await
        .map_err(|e| ToolhubError::Backend(format!("invalid MCP response: {e}")))?;
    unwrap_content(parsed.into_result()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::OffsetDateTime;
    use toolhub_core::ImplementationType;

    fn mcp_tool(name: &str, code: Option<&str>) -> Tool {
        Tool {
            id: 1,
            name: name.into(),
            description: "remote".into(),
            category: "mcp".into(),
            tags: vec![],
            input_schema: json!({"type": "object"}),
            output_schema: None,
            implementation_type: ImplementationType::McpServer,
            implementation_code: code.map(str::to_string),
            version: "1.0.0".into(),
            embedding: None,
            is_active: true,
            metadata: json!({}),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn remote_name_prefers_config_then_namespace() {
        let tool = mcp_tool("files:read_file", Some(r#"{"url": "http://x/mcp"}"#));
        let config = parse_config(&tool).unwrap();
        assert_eq!(remote_name(&tool, &config), "read_file");

        let tool = mcp_tool(
            "files:read_file",
            Some(r#"{"url": "http://x/mcp", "tool_name": "readFile"}"#),
        );
        let config = parse_config(&tool).unwrap();
        assert_eq!(remote_name(&tool, &config), "readFile");
    }

    #[test]
    fn missing_config_is_invalid_input() {
        let tool = mcp_tool("files:read_file", None);
        assert!(parse_config(&tool).is_err());
    }

    #[test]
    fn unwrap_content_extracts_first_text_item() {
        let unwrapped = unwrap_content(json!({
            "content": [{"type": "text", "text": "{\"rows\": 3}"}],
            "isError": false,
        }))
        .unwrap();
        assert_eq!(unwrapped, json!({"rows": 3}));

        let plain = unwrap_content(json!({
            "content": [{"type": "text", "text": "done"}],
        }))
        .unwrap();
        assert_eq!(plain, json!({"result": "done"}));
    }

    #[test]
    fn unwrap_content_surfaces_upstream_errors() {
        let err = unwrap_content(json!({
            "content": [{"type": "text", "text": "boom"}],
            "isError": true,
        }))
        .unwrap_err();
        assert!(matches!(err, ToolhubError::Backend(_)));
    }
}
