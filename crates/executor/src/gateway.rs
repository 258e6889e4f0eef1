//! Chat-completions client for the LLM gateway.
//!
//! Shared by the `LLM_GATEWAY` execution backend and the output summarizer.

use serde_json::{json, Value};
use std::time::Duration;

use toolhub_core::{Result, ToolhubError};

#[derive(Clone)]
pub struct GatewayConfig {
    /// Base URL without a trailing path, e.g. `http://gateway:4000`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            default_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Parameters of one chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub user_message: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

pub struct GatewayClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(client: reqwest::Client, config: GatewayConfig) -> Self {
        Self { client, config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Sends one chat-completions request and returns the assistant content.
    pub async fn chat(&self, request: ChatRequest) -> Result<String> {
        if !self.is_configured() {
            return Err(ToolhubError::BackendUnavailable(
                "LLM gateway is not configured".into(),
            ));
        }
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user_message}));

        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.default_model),
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }

        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut http = self.client.post(&url).timeout(self.config.timeout).json(&payload);
        if let Some(key) = &self.config.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| {
            ToolhubError::BackendUnavailable(format!("gateway unreachable: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("gateway returned {status}: {body}");
            return if status.is_server_error() {
                Err(ToolhubError::BackendUnavailable(detail))
            } else {
                Err(ToolhubError::Backend(detail))
            };
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolhubError::Backend(format!("invalid gateway response: {e}")))?;
        body["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ToolhubError::Backend("gateway response carried no message content".into())
            })
    }
}
