//! The execution router: resolve, validate, dispatch, record.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use toolhub_core::{
    validation, ExecutionRecord, ExecutionStatus, Result, Tool, ToolhubError,
};
use toolhub_registry::{FindToolQuery, RetrievalEngine, ToolStore};

use crate::backends::{self, BackendContext};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Applied when a tool carries no timeout of its own.
    pub default_timeout: Duration,
    /// Hard ceiling; per-tool overrides are clamped to it.
    pub timeout_ceiling: Duration,
    /// Arguments/output stored on audit rows are truncated to this many chars.
    pub audit_max_chars: usize,
    /// How many suggestions a not-found error carries.
    pub suggestion_limit: usize,
    /// Similarity floor for suggestions; lower than the retrieval default
    /// because a bare tool name carries far less text than a real query.
    pub suggestion_threshold: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            timeout_ceiling: Duration::from_secs(300),
            audit_max_chars: 8_192,
            suggestion_limit: 3,
            suggestion_threshold: 0.3,
        }
    }
}

/// Terminal result of a dispatch. Execution-phase failures (backend errors,
/// timeouts, policy rejections) come back as an outcome with a non-success
/// status; resolution failures (`NotFound`, `Inactive`, `ValidationFailed`)
/// are returned as errors instead.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub tool_name: String,
    /// Audit row id, when recording succeeded.
    pub execution_id: Option<i64>,
    pub output: Option<Value>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

pub struct ExecutionRouter {
    store: Arc<dyn ToolStore>,
    retrieval: Arc<RetrievalEngine>,
    ctx: BackendContext,
    config: RouterConfig,
}

impl ExecutionRouter {
    pub fn new(
        store: Arc<dyn ToolStore>,
        retrieval: Arc<RetrievalEngine>,
        ctx: BackendContext,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            retrieval,
            ctx,
            config,
        }
    }

    /// Resolves a tool by exact name; a miss carries suggestions drawn from a
    /// semantic search of the requested name.
    pub async fn resolve(&self, name: &str) -> Result<Tool> {
        if let Some(tool) = self.store.get_by_name(name).await? {
            return Ok(tool);
        }
        Err(ToolhubError::NotFound {
            name: name.to_string(),
            suggestions: self.suggest(name).await,
        })
    }

    /// Runs the requested name through the retrieval engine, so related
    /// tools surface even when the spelling shares nothing with a registered
    /// name. Failures here never mask the not-found error itself.
    async fn suggest(&self, name: &str) -> Vec<String> {
        let query = FindToolQuery {
            query: name.to_string(),
            limit: Some(self.config.suggestion_limit),
            threshold: Some(self.config.suggestion_threshold),
            category: None,
            use_hybrid: None,
        };
        match self.retrieval.find_tool(query).await {
            Ok(outcome) => outcome.results.into_iter().map(|r| r.tool.name).collect(),
            Err(e) => {
                tracing::debug!(
                    target: "toolhub::executor",
                    name,
                    error = %e,
                    "suggestion search failed"
                );
                Vec::new()
            }
        }
    }

    /// Executes a tool by name with a per-call deadline, recording an audit
    /// row for every terminal outcome.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ExecutionOutcome> {
        let tool = self.resolve(name).await?;
        if !tool.is_active {
            return Err(ToolhubError::Inactive(tool.name));
        }

        let started_at = OffsetDateTime::now_utc();
        let started = std::time::Instant::now();

        if let Err(e) = validation::validate_against_schema(&tool.input_schema, &arguments) {
            self.record(&tool, &arguments, None, ExecutionStatus::Error, Some(e.to_string()), started_at, elapsed_ms(started))
                .await;
            return Err(e);
        }

        let deadline = self.deadline_for(&tool);
        tracing::debug!(
            target: "toolhub::executor",
            tool = %tool.name,
            kind = %tool.implementation_type,
            deadline_ms = deadline.as_millis() as u64,
            "dispatching tool call"
        );

        let dispatched =
            tokio::time::timeout(deadline, backends::execute(&tool, &arguments, &self.ctx)).await;
        let duration_ms = elapsed_ms(started);

        match dispatched {
            Ok(Ok(output)) => {
                if let Some(schema) = &tool.output_schema {
                    if let Err(e) = validation::validate_against_schema(schema, &output) {
                        let message = format!("output validation failed: {e}");
                        let id = self
                            .record(&tool, &arguments, None, ExecutionStatus::Error, Some(message.clone()), started_at, duration_ms)
                            .await;
                        return Ok(self.outcome(&tool, id, None, ExecutionStatus::Error, Some(message), duration_ms));
                    }
                }
                let id = self
                    .record(&tool, &arguments, Some(&output), ExecutionStatus::Success, None, started_at, duration_ms)
                    .await;
                tracing::info!(
                    target: "toolhub::executor",
                    tool = %tool.name,
                    duration_ms,
                    "tool call succeeded"
                );
                Ok(self.outcome(&tool, id, Some(output), ExecutionStatus::Success, None, duration_ms))
            }
            Ok(Err(e)) => {
                let status = e.execution_status();
                let message = e.to_string();
                let id = self
                    .record(&tool, &arguments, None, status, Some(message.clone()), started_at, duration_ms)
                    .await;
                tracing::warn!(
                    target: "toolhub::executor",
                    tool = %tool.name,
                    duration_ms,
                    error = %message,
                    "tool call failed"
                );
                Ok(self.outcome(&tool, id, None, status, Some(message), duration_ms))
            }
            Err(_) => {
                let message = format!("timed out after {deadline:?}");
                let id = self
                    .record(&tool, &arguments, None, ExecutionStatus::Timeout, Some(message.clone()), started_at, duration_ms)
                    .await;
                tracing::warn!(
                    target: "toolhub::executor",
                    tool = %tool.name,
                    deadline_ms = deadline.as_millis() as u64,
                    "tool call timed out"
                );
                Ok(self.outcome(&tool, id, None, ExecutionStatus::Timeout, Some(message), duration_ms))
            }
        }
    }

    /// Per-tool timeout (implementation config `timeout`, then metadata
    /// `timeout_seconds`), clamped to the ceiling; default otherwise.
    fn deadline_for(&self, tool: &Tool) -> Duration {
        let configured = crate::backends::command::timeout_override(tool)
            .or_else(|| tool.metadata["timeout_seconds"].as_f64());
        match configured {
            Some(secs) if secs > 0.0 => {
                Duration::from_secs_f64(secs).min(self.config.timeout_ceiling)
            }
            _ => self.config.default_timeout.min(self.config.timeout_ceiling),
        }
    }

    fn outcome(
        &self,
        tool: &Tool,
        execution_id: Option<i64>,
        output: Option<Value>,
        status: ExecutionStatus,
        error: Option<String>,
        duration_ms: i64,
    ) -> ExecutionOutcome {
        ExecutionOutcome {
            tool_name: tool.name.clone(),
            execution_id,
            output,
            status,
            error,
            duration_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        tool: &Tool,
        arguments: &Value,
        output: Option<&Value>,
        status: ExecutionStatus,
        error_message: Option<String>,
        started_at: OffsetDateTime,
        duration_ms: i64,
    ) -> Option<i64> {
        let record = ExecutionRecord {
            tool_id: Some(tool.id),
            tool_name: tool.name.clone(),
            arguments: truncate_for_audit(arguments, self.config.audit_max_chars),
            output: output.map(|o| truncate_for_audit(o, self.config.audit_max_chars)),
            status,
            error_message,
            duration_ms,
            started_at,
        };
        match self.store.record_execution(&record).await {
            Ok(execution) => Some(execution.id),
            Err(e) => {
                tracing::warn!(
                    target: "toolhub::executor",
                    tool = %tool.name,
                    error = %e,
                    "failed to record execution"
                );
                None
            }
        }
    }
}

fn elapsed_ms(started: std::time::Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Serialized-size cap for audit columns; oversized values are replaced by a
/// preview wrapper rather than silently dropped.
fn truncate_for_audit(value: &Value, max_chars: usize) -> Value {
    let serialized = value.to_string();
    if serialized.len() <= max_chars {
        return value.clone();
    }
    let preview: String = serialized.chars().take(max_chars).collect();
    serde_json::json!({"truncated": true, "preview": preview})
}
