//! Output summarization for large tool results.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{ChatRequest, GatewayClient};

/// Conservative average for English text and JSON alike.
pub const CHARS_PER_TOKEN: usize = 4;

/// Marker appended when summarization falls back to truncation.
pub const TRUNCATION_MARKER: &str = "\n\n[Output truncated due to length]";

const SYSTEM_PROMPT: &str = "You are a precise summarization assistant. Summarize tool output \
while preserving all important information. Keep key data points, IDs, names, values, and \
actionable details. If the output contains errors, always include the error message. Remove \
redundant content, keep structure where it helps, and never invent information that is not in \
the output.";

/// Estimate tokens for a string (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Canonical string form of a tool output: raw for strings, pretty JSON for
/// everything else.
pub fn serialize_output(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub enabled: bool,
    /// Model override; falls back to the gateway default when `None`.
    pub model: Option<String>,
    pub default_max_tokens: usize,
    pub max_input_chars: usize,
    pub timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            default_max_tokens: 1_000,
            max_input_chars: 50_000,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct OutputSummarizer {
    gateway: Arc<GatewayClient>,
    config: SummarizerConfig,
}

impl OutputSummarizer {
    pub fn new(gateway: Arc<GatewayClient>, config: SummarizerConfig) -> Self {
        Self { gateway, config }
    }

    pub fn default_max_tokens(&self) -> usize {
        self.config.default_max_tokens
    }

    /// Reduces `output` when its token estimate exceeds `max_tokens`.
    ///
    /// Returns the serialized output unchanged (and `false`) when it fits or
    /// summarization is disabled. Otherwise asks the gateway for a summary;
    /// if the gateway fails, truncates instead - either way the second tuple
    /// element reports `true`.
    pub async fn summarize_if_needed(
        &self,
        output: &Value,
        max_tokens: usize,
        hint: Option<&str>,
        tool_name: Option<&str>,
    ) -> (String, bool) {
        let serialized = serialize_output(output);
        if !self.config.enabled {
            return (serialized, false);
        }
        let estimated = estimate_tokens(&serialized);
        if estimated <= max_tokens {
            return (serialized, false);
        }

        tracing::info!(
            target: "toolhub::summarize",
            estimated_tokens = estimated,
            max_tokens,
            tool = tool_name.unwrap_or("unknown"),
            "output over budget, summarizing"
        );

        let summary_max_tokens = std::cmp::max(500, max_tokens / 2);
        match self
            .request_summary(&serialized, summary_max_tokens, hint, tool_name)
            .await
        {
            Ok(summary) => (summary, true),
            Err(e) => {
                tracing::warn!(
                    target: "toolhub::summarize",
                    error = %e,
                    "summarization failed, falling back to truncation"
                );
                (truncate(&serialized, max_tokens), true)
            }
        }
    }

    async fn request_summary(
        &self,
        content: &str,
        summary_max_tokens: usize,
        hint: Option<&str>,
        tool_name: Option<&str>,
    ) -> toolhub_core::Result<String> {
        let mut context = String::new();
        if let Some(name) = tool_name {
            context.push_str(&format!("Tool: {name}\n"));
        }
        if let Some(hint) = hint {
            context.push_str(&format!("User's goal: {hint}\n"));
        }

        let clipped: String = content.chars().take(self.config.max_input_chars).collect();
        let user_message = format!(
            "Summarize the following tool output concisely.\n\n{context}\nTool Output:\n{clipped}\n\n\
             Provide a focused summary that captures the essential information."
        );

        let request = ChatRequest {
            model: self.config.model.clone(),
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            user_message,
            max_tokens: Some(summary_max_tokens as u32),
            temperature: Some(0.1),
        };
        tokio::time::timeout(self.config.timeout, self.gateway.chat(request))
            .await
            .map_err(|_| toolhub_core::ToolhubError::Timeout(self.config.timeout))?
    }
}

fn truncate(content: &str, max_tokens: usize) -> String {
    let budget = max_tokens * CHARS_PER_TOKEN;
    if content.len() <= budget {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(budget).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
