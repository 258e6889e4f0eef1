//! Execution backends, one per implementation kind.

pub mod callable;
pub mod command;
pub mod http;
pub mod mcp;

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use toolhub_core::{ImplementationType, Result, Tool, ToolhubError};

use crate::gateway::{ChatRequest, GatewayClient};
use callable::CallableRegistry;

/// Custom CA bundle consulted when building the shared HTTP client.
pub const CUSTOM_CA_BUNDLE: &str = "/etc/ssl/certs/ca-custom.pem";

/// Builds the process-wide HTTP client used by the HTTP and MCP backends,
/// loading the custom CA bundle when one is installed.
pub fn build_http_client() -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    let bundle = Path::new(CUSTOM_CA_BUNDLE);
    if bundle.exists() {
        let pem = std::fs::read(bundle)
            .map_err(|e| ToolhubError::Config(format!("reading {CUSTOM_CA_BUNDLE}: {e}")))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| ToolhubError::Config(format!("parsing {CUSTOM_CA_BUNDLE}: {e}")))?;
        builder = builder.add_root_certificate(cert);
        tracing::info!(target: "toolhub::executor", path = CUSTOM_CA_BUNDLE, "loaded custom CA bundle");
    }
    builder
        .build()
        .map_err(|e| ToolhubError::Config(format!("building HTTP client: {e}")))
}

/// Everything a dispatch needs beyond the tool row itself.
pub struct BackendContext {
    pub http: reqwest::Client,
    pub gateway: Arc<GatewayClient>,
    pub callables: Arc<CallableRegistry>,
}

/// Dispatches to the backend matching the tool's implementation kind.
/// The caller owns the deadline; this future is cancelled on timeout.
pub async fn execute(tool: &Tool, arguments: &Value, ctx: &BackendContext) -> Result<Value> {
    match tool.implementation_type {
        ImplementationType::PythonCallable => ctx.callables.execute(tool, arguments).await,
        ImplementationType::HttpEndpoint => http::execute(&ctx.http, tool, arguments).await,
        ImplementationType::McpServer => mcp::execute(&ctx.http, tool, arguments).await,
        ImplementationType::LlmGateway => execute_gateway(&ctx.gateway, tool, arguments).await,
        ImplementationType::CommandLine => command::execute(tool, arguments).await,
    }
}

/// `LLM_GATEWAY` backend: the tool's arguments become the user message.
async fn execute_gateway(
    gateway: &GatewayClient,
    tool: &Tool,
    arguments: &Value,
) -> Result<Value> {
    let config: Value = tool
        .implementation_code
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| ToolhubError::InvalidInput(format!("gateway tool config: {e}")))?
        .unwrap_or_else(|| Value::Object(Default::default()));

    let user_message = match arguments.get("input").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => serde_json::to_string(arguments)
            .map_err(|e| ToolhubError::InvalidInput(e.to_string()))?,
    };

    let content = gateway
        .chat(ChatRequest {
            model: config["model"].as_str().map(str::to_string),
            system_prompt: config["system_prompt"].as_str().map(str::to_string),
            user_message,
            max_tokens: config["max_tokens"].as_u64().map(|v| v as u32),
            temperature: config["temperature"].as_f64().map(|v| v as f32),
        })
        .await?;
    Ok(serde_json::json!({"result": content}))
}
