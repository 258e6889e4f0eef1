//! JSON-RPC client used to enumerate tools on upstream MCP servers.

use serde_json::Value;
use std::time::Duration;

use toolhub_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use toolhub_core::{Result, ToolhubError};

/// A tool definition as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub struct McpHttpClient {
    http: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl McpHttpClient {
    pub fn new(http: reqwest::Client, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            http,
            max_retries,
            base_delay,
        }
    }

    async fn post(&self, url: &str, request: &JsonRpcRequest) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| ToolhubError::BackendUnavailable(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("{url} returned {status}: {body}");
            return if status.is_server_error() {
                Err(ToolhubError::BackendUnavailable(detail))
            } else {
                Err(ToolhubError::Backend(detail))
            };
        }
        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ToolhubError::Backend(format!("{url}: invalid JSON-RPC body: {e}")))?;
        parsed.into_result()
    }

    async fn post_with_retries(&self, url: &str, request: &JsonRpcRequest) -> Result<Value> {
        let mut last = None;
        for attempt in 0..self.max_retries {
            match self.post(url, request).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        target: "toolhub::discovery",
                        url,
                        attempt,
                        error = %e,
                        "transient MCP failure, retrying"
                    );
                    last = Some(e);
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.base_delay * 2u32.pow(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| {
            ToolhubError::BackendUnavailable(format!("{url}: no attempts made"))
        }))
    }

    /// Runs the `initialize` handshake (best-effort) and fetches the tool
    /// list. Transient failures of `tools/list` retry with backoff.
    pub async fn list_tools(&self, url: &str, source: &str) -> Result<Vec<RemoteTool>> {
        if let Err(e) = self
            .post(url, &JsonRpcRequest::initialize("toolhub-discovery", env!("CARGO_PKG_VERSION")))
            .await
        {
            // Several servers accept tools/list without a handshake.
            tracing::debug!(
                target: "toolhub::discovery",
                source,
                error = %e,
                "initialize failed, attempting tools/list anyway"
            );
        }
        let result = self
            .post_with_retries(url, &JsonRpcRequest::tools_list())
            .await?;
        Ok(parse_tools(&result))
    }
}

/// Extracts tool definitions from a `tools/list` result (or a bare list),
/// tolerating both `inputSchema` and `input_schema` field names.
pub fn parse_tools(value: &Value) -> Vec<RemoteTool> {
    let items = value["tools"]
        .as_array()
        .or_else(|| value.as_array())
        .cloned()
        .unwrap_or_default();
    items
        .iter()
        .filter_map(|item| {
            let name = item["name"]
                .as_str()
                .or_else(|| item["function"]["name"].as_str())?;
            if name.is_empty() {
                return None;
            }
            let description = item["description"]
                .as_str()
                .or_else(|| item["function"]["description"].as_str())
                .unwrap_or_default();
            let input_schema = [
                &item["inputSchema"],
                &item["input_schema"],
                &item["function"]["parameters"],
            ]
            .into_iter()
            .find(|s| s.is_object())
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
            Some(RemoteTool {
                name: name.to_string(),
                description: description.to_string(),
                input_schema,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_standard_tools_list() {
        let tools = parse_tools(&json!({
            "tools": [
                {"name": "read_file", "description": "Read a file", "inputSchema": {"type": "object"}},
                {"name": "write_file", "input_schema": {"type": "object"}},
            ]
        }));
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[1].description, "");
    }

    #[test]
    fn parses_function_wrapped_tools() {
        let tools = parse_tools(&json!([
            {"function": {"name": "search", "description": "Search", "parameters": {"type": "object"}}}
        ]));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
    }

    #[test]
    fn skips_nameless_entries_and_defaults_schema() {
        let tools = parse_tools(&json!({"tools": [{"description": "no name"}, {"name": "ok"}]}));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].input_schema["type"], "object");
    }
}
