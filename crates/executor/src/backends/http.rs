//! `HTTP_ENDPOINT` backend.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use toolhub_core::{Result, Tool, ToolhubError};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpEndpointConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Per-request timeout in seconds; the router's deadline still applies.
    #[serde(default)]
    pub timeout: Option<f64>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn parse_config(tool: &Tool) -> Result<HttpEndpointConfig> {
    let raw = tool.implementation_code.as_deref().ok_or_else(|| {
        ToolhubError::InvalidInput(format!("tool '{}' has no endpoint config", tool.name))
    })?;
    let config: HttpEndpointConfig = serde_json::from_str(raw)
        .map_err(|e| ToolhubError::InvalidInput(format!("endpoint config: {e}")))?;
    if config.url.is_empty() {
        return Err(ToolhubError::InvalidInput("endpoint config has no url".into()));
    }
    Ok(config)
}

/// Stringifies scalar arguments for use as query parameters.
fn query_params(arguments: &Value) -> Result<Vec<(String, String)>> {
    let Some(object) = arguments.as_object() else {
        return Err(ToolhubError::InvalidInput(
            "GET endpoint arguments must be an object".into(),
        ));
    };
    object
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            Ok((key.clone(), rendered))
        })
        .collect()
}

pub async fn execute(client: &reqwest::Client, tool: &Tool, arguments: &Value) -> Result<Value> {
    let config = parse_config(tool)?;
    let method: reqwest::Method = config
        .method
        .to_uppercase()
        .parse()
        .map_err(|_| ToolhubError::InvalidInput(format!("bad HTTP method '{}'", config.method)))?;

    let mut request = client.request(method.clone(), &config.url);
    if let Some(secs) = config.timeout {
        request = request.timeout(Duration::from_secs_f64(secs));
    }
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    request = match method {
        reqwest::Method::GET => request.query(&query_params(arguments)?),
        _ => request.json(arguments),
    };

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ToolhubError::Timeout(Duration::from_secs_f64(config.timeout.unwrap_or(30.0)))
        } else if e.is_connect() {
            ToolhubError::BackendUnavailable(format!("endpoint unreachable: {e}"))
        } else {
            ToolhubError::Backend(e.to_string())
        }
    })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ToolhubError::Backend(format!(
            "endpoint returned {status}: {body}"
        )));
    }
    Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({"response": body})))
}
