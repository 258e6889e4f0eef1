//! Discovery: mirrors upstream MCP catalogs (and the LLM gateway's tool
//! list) into the local registry.
//!
//! Reconciliation is idempotent: a tool is inserted when absent, updated when
//! its change hash differs, left alone when unchanged, and deactivated (never
//! deleted) when it disappears upstream. Per-source failures are isolated and
//! reported, never fatal to other sources.

pub mod mcp_client;
pub mod report;

use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use toolhub_core::{ImplementationType, Result, Tool, ToolDraft, ToolhubError, ToolPatch};
use toolhub_registry::{ToolFilter, ToolRegistry};

pub use mcp_client::{McpHttpClient, RemoteTool};
pub use report::{SourceReport, SyncReport};

/// One upstream MCP server, as configured via `MCP_SOURCES`.
#[derive(Debug, Clone, Deserialize)]
pub struct McpSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Default category for tools mirrored from this source.
    #[serde(default)]
    pub category: Option<String>,
    /// Default tags for tools mirrored from this source.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Source name reserved for the LLM gateway's tool list.
pub const GATEWAY_SOURCE: &str = "gateway";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub sources: Vec<McpSourceConfig>,
    /// Also mirror the LLM gateway's `/v1/mcp/tools` listing.
    pub gateway_sync_enabled: bool,
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    /// Deadline applied to each source independently.
    pub source_timeout: Duration,
    pub max_retries: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            gateway_sync_enabled: false,
            gateway_url: None,
            gateway_api_key: None,
            source_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

pub struct DiscoveryService {
    registry: Arc<ToolRegistry>,
    client: McpHttpClient,
    http: reqwest::Client,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(registry: Arc<ToolRegistry>, http: reqwest::Client, config: DiscoveryConfig) -> Self {
        let client = McpHttpClient::new(http.clone(), config.max_retries, Duration::from_millis(500));
        Self {
            registry,
            client,
            http,
            config,
        }
    }

    /// Reconciles every enabled source. Per-source failures land in that
    /// source's report; the run itself always completes.
    pub async fn sync_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for source in self.config.sources.clone() {
            if !source.enabled {
                tracing::debug!(target: "toolhub::discovery", source = %source.name, "source disabled, skipping");
                continue;
            }
            report.sources.push(self.sync_source_guarded(&source).await);
        }
        if self.config.gateway_sync_enabled {
            report.sources.push(self.sync_gateway_guarded().await);
        }
        tracing::info!(target: "toolhub::discovery", summary = %report.format_summary(), "discovery run finished");
        report
    }

    /// Reconciles a single source by name (admin trigger with `source`).
    pub async fn sync_one(&self, name: &str) -> Result<SourceReport> {
        if name == GATEWAY_SOURCE && self.config.gateway_sync_enabled {
            return Ok(self.sync_gateway_guarded().await);
        }
        let source = self
            .config
            .sources
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| ToolhubError::NotFound {
                name: name.to_string(),
                suggestions: self.config.sources.iter().map(|s| s.name.clone()).collect(),
            })?;
        Ok(self.sync_source_guarded(&source).await)
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.sources.iter().map(|s| s.name.clone()).collect();
        if self.config.gateway_sync_enabled {
            names.push(GATEWAY_SOURCE.to_string());
        }
        names
    }

    async fn sync_source_guarded(&self, source: &McpSourceConfig) -> SourceReport {
        let deadline = self.config.source_timeout;
        match tokio::time::timeout(deadline, self.sync_source(source)).await {
            Ok(report) => report,
            Err(_) => {
                let mut report = SourceReport::new(&source.name);
                report
                    .errors
                    .push(format!("source '{}' timed out after {deadline:?}", source.name));
                report
            }
        }
    }

    async fn sync_source(&self, source: &McpSourceConfig) -> SourceReport {
        let mut report = SourceReport::new(&source.name);
        let remote = match self.client.list_tools(&source.url, &source.name).await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(
                    target: "toolhub::discovery",
                    source = %source.name,
                    error = %e,
                    "failed to fetch upstream tool list"
                );
                report.errors.push(format!("{}: {e}", source.name));
                return report;
            }
        };
        report.fetched = remote.len();

        let normalized: Vec<NormalizedTool> = remote
            .iter()
            .map(|tool| normalize_mcp_tool(source, tool))
            .collect();
        self.reconcile(&source.name, normalized, &mut report).await;
        report
    }

    async fn sync_gateway_guarded(&self) -> SourceReport {
        let deadline = self.config.source_timeout;
        match tokio::time::timeout(deadline, self.sync_gateway()).await {
            Ok(report) => report,
            Err(_) => {
                let mut report = SourceReport::new(GATEWAY_SOURCE);
                report
                    .errors
                    .push(format!("gateway tool sync timed out after {deadline:?}"));
                report
            }
        }
    }

    async fn sync_gateway(&self) -> SourceReport {
        let mut report = SourceReport::new(GATEWAY_SOURCE);
        let Some(base_url) = self.config.gateway_url.as_deref() else {
            report.errors.push("gateway sync enabled but no gateway URL configured".into());
            return report;
        };
        let url = format!("{}/v1/mcp/tools", base_url.trim_end_matches('/'));

        let mut request = self.http.get(&url);
        if let Some(key) = &self.config.gateway_api_key {
            request = request.header("x-api-key", key);
        }
        let body: Value = match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json().await {
                    Ok(body) => body,
                    Err(e) => {
                        report.errors.push(format!("gateway: invalid tool list body: {e}"));
                        return report;
                    }
                }
            }
            Ok(response) => {
                report
                    .errors
                    .push(format!("gateway: tool list returned {}", response.status()));
                return report;
            }
            Err(e) => {
                report.errors.push(format!("gateway: {e}"));
                return report;
            }
        };

        let remote = mcp_client::parse_tools(&body);
        report.fetched = remote.len();
        let normalized: Vec<NormalizedTool> = remote
            .iter()
            .map(|tool| normalize_gateway_tool(base_url, tool))
            .collect();
        self.reconcile(GATEWAY_SOURCE, normalized, &mut report).await;
        report
    }

    /// Shared insert/update/deactivate pass over one source's tools.
    async fn reconcile(
        &self,
        source_name: &str,
        normalized: Vec<NormalizedTool>,
        report: &mut SourceReport,
    ) {
        let prefix = format!("{source_name}:");
        let mut seen: Vec<String> = Vec::with_capacity(normalized.len());

        for tool in normalized {
            seen.push(tool.draft.name.clone());
            match self.reconcile_one(tool).await {
                Ok(ReconcileAction::Created) => report.created += 1,
                Ok(ReconcileAction::Updated) => report.updated += 1,
                Ok(ReconcileAction::Unchanged) => {}
                Err(e) => report.errors.push(e.to_string()),
            }
        }

        // Tools mirrored from this source but missing upstream are soft
        // deleted; their execution history stays intact.
        match self.local_tools_with_prefix(&prefix).await {
            Ok(local) => {
                for tool in local {
                    if tool.is_active && !seen.contains(&tool.name) {
                        match self.registry.deactivate(tool.id).await {
                            Ok(_) => {
                                tracing::info!(
                                    target: "toolhub::discovery",
                                    tool = %tool.name,
                                    "deactivated: no longer present upstream"
                                );
                                report.deactivated += 1;
                            }
                            Err(e) => report.errors.push(format!("{}: {e}", tool.name)),
                        }
                    }
                }
            }
            Err(e) => report.errors.push(format!("{source_name}: listing local tools: {e}")),
        }
    }

    async fn reconcile_one(&self, tool: NormalizedTool) -> Result<ReconcileAction> {
        let existing = self.registry.get_by_name(&tool.draft.name).await?;
        let Some(existing) = existing else {
            // Insert; when the embedder is down the row still lands and is
            // picked up later by reindexing.
            match self.registry.register(tool.draft.clone(), true).await {
                Ok(_) => return Ok(ReconcileAction::Created),
                Err(ToolhubError::EmbeddingFailed(e)) => {
                    tracing::warn!(
                        target: "toolhub::discovery",
                        tool = %tool.draft.name,
                        error = %e,
                        "registered without embedding; reindex later"
                    );
                    self.registry.register(tool.draft, false).await?;
                    return Ok(ReconcileAction::Created);
                }
                Err(e) => return Err(e),
            }
        };

        if change_hash_for_tool(&existing) == tool.change_hash {
            if !existing.is_active {
                // Present upstream again after an earlier disappearance.
                self.registry.activate(existing.id).await?;
                return Ok(ReconcileAction::Updated);
            }
            return Ok(ReconcileAction::Unchanged);
        }

        let patch = ToolPatch {
            description: Some(tool.draft.description),
            category: Some(tool.draft.category),
            tags: Some(tool.draft.tags),
            input_schema: Some(tool.draft.input_schema),
            implementation_code: tool.draft.implementation_code,
            metadata: Some(tool.draft.metadata),
            ..Default::default()
        };
        self.registry.update(existing.id, patch).await?;
        if !existing.is_active {
            self.registry.activate(existing.id).await?;
        }
        Ok(ReconcileAction::Updated)
    }

    async fn local_tools_with_prefix(&self, prefix: &str) -> Result<Vec<Tool>> {
        let filter = ToolFilter {
            category: None,
            active_only: false,
        };
        let (tools, _) = self.registry.list(&filter, 10_000, 0).await?;
        Ok(tools
            .into_iter()
            .filter(|t| t.name.starts_with(prefix))
            .collect())
    }
}

enum ReconcileAction {
    Created,
    Updated,
    Unchanged,
}

struct NormalizedTool {
    draft: ToolDraft,
    change_hash: String,
}

fn normalize_mcp_tool(source: &McpSourceConfig, tool: &RemoteTool) -> NormalizedTool {
    // Category and tags are lowercased here so the change hash compares
    // stably against what the registry persists.
    let category = source
        .category
        .clone()
        .unwrap_or_else(|| "mcp".to_string())
        .to_lowercase();
    let tags: Vec<String> = source
        .tags
        .clone()
        .unwrap_or_else(|| vec!["mcp".to_string(), source.name.clone()])
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    let description = if tool.description.is_empty() {
        format!("Tool from {}", source.name)
    } else {
        tool.description.clone()
    };
    let draft = ToolDraft {
        name: format!("{}:{}", source.name, tool.name),
        description,
        category,
        tags,
        input_schema: tool.input_schema.clone(),
        output_schema: None,
        implementation_type: ImplementationType::McpServer,
        implementation_code: Some(
            json!({
                "url": source.url,
                "tool_name": tool.name,
                "source": source.name,
            })
            .to_string(),
        ),
        version: "1.0.0".to_string(),
        metadata: json!({
            "source": source.name,
            "source_description": source.description,
            "original_name": tool.name,
        }),
    };
    let change_hash = change_hash(&draft.description, &draft.input_schema, &draft.tags, &draft.category);
    NormalizedTool { draft, change_hash }
}

fn normalize_gateway_tool(base_url: &str, tool: &RemoteTool) -> NormalizedTool {
    let draft = ToolDraft {
        name: format!("{GATEWAY_SOURCE}:{}", tool.name),
        description: if tool.description.is_empty() {
            "Tool proxied by the LLM gateway".to_string()
        } else {
            tool.description.clone()
        },
        category: "llm-gateway".to_string(),
        tags: vec!["gateway".to_string(), "mcp".to_string()],
        input_schema: tool.input_schema.clone(),
        output_schema: None,
        implementation_type: ImplementationType::LlmGateway,
        implementation_code: Some(
            json!({
                "url": base_url,
                "tool_name": tool.name,
                "source": GATEWAY_SOURCE,
            })
            .to_string(),
        ),
        version: "1.0.0".to_string(),
        metadata: json!({
            "source": GATEWAY_SOURCE,
            "original_name": tool.name,
        }),
    };
    let change_hash = change_hash(&draft.description, &draft.input_schema, &draft.tags, &draft.category);
    NormalizedTool { draft, change_hash }
}

/// SHA-256 over the fields whose change forces an update and re-embed.
/// `serde_json::Value` objects serialize with sorted keys, which keeps the
/// hash canonical.
pub fn change_hash(description: &str, input_schema: &Value, tags: &[String], category: &str) -> String {
    let mut sorted_tags: Vec<&str> = tags.iter().map(String::as_str).collect();
    sorted_tags.sort_unstable();
    let canonical = json!({
        "category": category,
        "description": description,
        "input_schema": input_schema,
        "tags": sorted_tags,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    format!("{digest:x}")
}

fn change_hash_for_tool(tool: &Tool) -> String {
    change_hash(&tool.description, &tool.input_schema, &tool.tags, &tool.category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_hash_ignores_tag_order_but_not_content() {
        let schema = json!({"type": "object"});
        let a = change_hash("desc", &schema, &["x".into(), "y".into()], "cat");
        let b = change_hash("desc", &schema, &["y".into(), "x".into()], "cat");
        assert_eq!(a, b);

        let c = change_hash("other desc", &schema, &["x".into(), "y".into()], "cat");
        assert_ne!(a, c);
    }

    #[test]
    fn normalization_namespaces_and_routes_back_to_source() {
        let source = McpSourceConfig {
            name: "files".into(),
            url: "http://files:9000/mcp".into(),
            description: Some("file server".into()),
            category: None,
            tags: None,
            enabled: true,
        };
        let remote = RemoteTool {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        };
        let normalized = normalize_mcp_tool(&source, &remote);
        assert_eq!(normalized.draft.name, "files:read_file");
        assert_eq!(normalized.draft.category, "mcp");
        assert_eq!(normalized.draft.tags, vec!["mcp".to_string(), "files".to_string()]);
        let config: Value =
            serde_json::from_str(normalized.draft.implementation_code.as_deref().unwrap()).unwrap();
        assert_eq!(config["url"], "http://files:9000/mcp");
        assert_eq!(config["tool_name"], "read_file");
    }

    #[test]
    fn source_config_defaults_enabled() {
        let source: McpSourceConfig =
            serde_json::from_value(json!({"name": "a", "url": "http://a/mcp"})).unwrap();
        assert!(source.enabled);
    }
}
