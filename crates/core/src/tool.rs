//! The `Tool` entity and its registration/update shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::ToolhubError;

/// How a registered tool is executed when called.
///
/// The wire values are stable; they are persisted in the database and
/// exchanged with admin clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImplementationType {
    /// A callable registered in the in-process callable table, addressed by a
    /// dotted module path (e.g. `builtins.math.calculator`).
    #[serde(rename = "PYTHON_CALLABLE")]
    PythonCallable,
    /// An arbitrary HTTP endpoint described by a JSON config.
    #[serde(rename = "HTTP_ENDPOINT")]
    HttpEndpoint,
    /// A tool living on an upstream MCP server, invoked via JSON-RPC
    /// `tools/call`.
    #[serde(rename = "MCP_SERVER")]
    McpServer,
    /// A model behind the LLM gateway; the arguments become the user message.
    #[serde(rename = "LLM_GATEWAY")]
    LlmGateway,
    /// A whitelisted command-line program run as a child process.
    #[serde(rename = "COMMAND_LINE")]
    CommandLine,
}

impl ImplementationType {
    /// Stable wire string, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PythonCallable => "PYTHON_CALLABLE",
            Self::HttpEndpoint => "HTTP_ENDPOINT",
            Self::McpServer => "MCP_SERVER",
            Self::LlmGateway => "LLM_GATEWAY",
            Self::CommandLine => "COMMAND_LINE",
        }
    }
}

impl fmt::Display for ImplementationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImplementationType {
    type Err = ToolhubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PYTHON_CALLABLE" => Ok(Self::PythonCallable),
            "HTTP_ENDPOINT" => Ok(Self::HttpEndpoint),
            "MCP_SERVER" => Ok(Self::McpServer),
            "LLM_GATEWAY" => Ok(Self::LlmGateway),
            "COMMAND_LINE" => Ok(Self::CommandLine),
            other => Err(ToolhubError::InvalidInput(format!(
                "unknown implementation type '{other}'"
            ))),
        }
    }
}

/// A registered tool: the registry's primary entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Surrogate key assigned on insert.
    pub id: i64,
    /// Unique, optionally namespaced as `server:tool`.
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// JSON Schema the arguments are validated against before dispatch.
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    pub implementation_type: ImplementationType,
    /// Type-specific routing config: a dotted callable path, a JSON endpoint
    /// config, a command template, or a model spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_code: Option<String>,
    pub version: String,
    /// Dense vector over the embedding text. Omitted from API payloads.
    #[serde(skip_serializing, default)]
    pub embedding: Option<Vec<f32>>,
    pub is_active: bool,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn default_metadata() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Tool {
    /// The exact text fed to the embedding model.
    ///
    /// Any change to a field referenced here must trigger re-embedding.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.name, &self.description, &self.category, &self.tags)
    }
}

/// Builds the canonical embedding text for a tool's descriptive fields.
pub fn embedding_text(name: &str, description: &str, category: &str, tags: &[String]) -> String {
    format!(
        "{name}\n{description}\nCategory: {category}\nTags: {}",
        tags.join(", ")
    )
}

/// Input to `ToolRegistry::register`; everything a caller supplies for a new
/// tool. Validation happens in the registry, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDraft {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub input_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
    pub implementation_type: ImplementationType,
    #[serde(default)]
    pub implementation_code: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Partial update for `ToolRegistry::update`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub implementation_type: Option<ImplementationType>,
    pub implementation_code: Option<String>,
    pub version: Option<String>,
    pub metadata: Option<Value>,
}

impl ToolPatch {
    /// True when the patch touches a field that feeds the embedding text,
    /// which forces a re-embed of the tool.
    pub fn touches_embedding_text(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.category.is_some()
            || self.tags.is_some()
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.input_schema.is_none()
            && self.output_schema.is_none()
            && self.implementation_type.is_none()
            && self.implementation_code.is_none()
            && self.version.is_none()
            && self.metadata.is_none()
    }
}
