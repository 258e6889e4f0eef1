//! MCP `ServerHandler` implementation for [`ToolService`].
//!
//! Exposes the protocol surface:
//!
//! - tools: `find_tool`, `call_tool`, `call_tool_summarized`, `list_tools`,
//!   `get_tool_schema`
//! - resources: `tools://categories`, `tools://stats`,
//!   `tools://tools/{category}`
//! - prompts: discovery / execution / workflow-planning templates

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam, GetPromptResult,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, Prompt, PromptArgument, PromptMessage, PromptMessageRole, RawResource,
    ReadResourceRequestParam, ReadResourceResult, Resource, ResourceContents, ServerCapabilities,
    Tool, ToolAnnotations,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData, RoleServer, ServerHandler};
use serde_json::{json, Map as JsonMap, Value};
use std::sync::Arc;

use toolhub_core::{ExecutionStatus, ToolhubError};
use toolhub_registry::{FindToolQuery, ToolFilter};

use crate::app::ToolService;

const CATEGORIES_URI: &str = "tools://categories";
const STATS_URI: &str = "tools://stats";
const CATEGORY_URI_PREFIX: &str = "tools://tools/";

fn object_schema(properties: Value, required: &[&str]) -> Arc<JsonMap<String, Value>> {
    let mut schema = JsonMap::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), properties);
    if !required.is_empty() {
        schema.insert("required".into(), json!(required));
    }
    schema.insert("additionalProperties".into(), json!(false));
    Arc::new(schema)
}

fn facade_tool(name: &str, description: &str, schema: Arc<JsonMap<String, Value>>) -> Tool {
    Tool {
        name: name.to_string().into(),
        title: None,
        description: Some(description.to_string().into()),
        input_schema: schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::default()),
        icons: None,
    }
}

fn arguments_value(arguments: Option<JsonMap<String, Value>>) -> Value {
    Value::Object(arguments.unwrap_or_default())
}

/// Renders a domain failure as a tool-call result rather than a protocol
/// error, so agent clients can read the details.
fn error_result(err: &ToolhubError) -> CallToolResult {
    let structured = match err {
        ToolhubError::NotFound { name, suggestions } => json!({
            "error": format!("tool '{name}' not found"),
            "suggestions": suggestions,
        }),
        ToolhubError::ValidationFailed { path, message } => json!({
            "error": message,
            "schema_path": path,
        }),
        other => json!({"error": other.to_string()}),
    };
    CallToolResult {
        content: vec![Content::text(err.to_string())],
        structured_content: Some(structured),
        is_error: Some(true),
        meta: None,
    }
}

fn ok_result(summary: String, structured: Value) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(summary)],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    }
}

impl ToolService {
    async fn handle_find_tool(&self, args: Value) -> Result<CallToolResult, ErrorData> {
        let query: FindToolQuery = serde_json::from_value(args)
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))?;
        let text = query.query.clone();
        match self.find_tool(query).await {
            Ok(outcome) => {
                let results: Vec<Value> = outcome
                    .results
                    .iter()
                    .map(|r| {
                        json!({
                            "tool": r.tool,
                            "score": (r.score * 10_000.0).round() / 10_000.0,
                        })
                    })
                    .collect();
                let count = results.len();
                let summary = if count == 0 {
                    format!("No tools matched '{text}'")
                } else {
                    format!(
                        "Found {count} tool(s) for '{text}': {}",
                        outcome
                            .results
                            .iter()
                            .map(|r| r.tool.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                };
                Ok(ok_result(
                    summary,
                    json!({
                        "results": results,
                        "count": count,
                        "query": text,
                        "degraded": outcome.degraded,
                    }),
                ))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn handle_call_tool(&self, args: Value) -> Result<CallToolResult, ErrorData> {
        let tool_name = args["tool_name"]
            .as_str()
            .ok_or_else(|| ErrorData::invalid_params("'tool_name' is required", None))?
            .to_string();
        let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.call_tool(&tool_name, arguments).await {
            Ok(outcome) => {
                let structured = json!({
                    "success": outcome.success(),
                    "tool_name": outcome.tool_name,
                    "execution_id": outcome.execution_id,
                    "output": outcome.output,
                    "error": outcome.error,
                    "status": outcome.status,
                    "execution_time_ms": outcome.duration_ms,
                });
                let summary = if outcome.success() {
                    format!("{tool_name} completed in {}ms", outcome.duration_ms)
                } else {
                    format!(
                        "{tool_name} failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    )
                };
                Ok(CallToolResult {
                    content: vec![Content::text(summary)],
                    structured_content: Some(structured),
                    is_error: Some(outcome.status != ExecutionStatus::Success),
                    meta: None,
                })
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn handle_call_tool_summarized(&self, args: Value) -> Result<CallToolResult, ErrorData> {
        let tool_name = args["tool_name"]
            .as_str()
            .ok_or_else(|| ErrorData::invalid_params("'tool_name' is required", None))?
            .to_string();
        let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let max_tokens = args["max_tokens"].as_u64().map(|v| v as usize);
        let hint = args["hint"].as_str().map(str::to_string);

        match self
            .call_tool_summarized(&tool_name, arguments, max_tokens, hint.as_deref())
            .await
        {
            Ok((outcome, rendered, was_summarized)) => Ok(CallToolResult {
                content: vec![Content::text(rendered.clone())],
                structured_content: Some(json!({
                    "success": outcome.success(),
                    "tool_name": outcome.tool_name,
                    "execution_id": outcome.execution_id,
                    "output": rendered,
                    "was_summarized": was_summarized,
                    "error": outcome.error,
                    "status": outcome.status,
                    "execution_time_ms": outcome.duration_ms,
                })),
                is_error: Some(outcome.status != ExecutionStatus::Success),
                meta: None,
            }),
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn handle_list_tools(&self, args: Value) -> Result<CallToolResult, ErrorData> {
        let filter = ToolFilter {
            category: args["category"].as_str().map(str::to_string),
            active_only: args["active_only"].as_bool().unwrap_or(true),
        };
        let limit = args["limit"].as_i64().unwrap_or(100).clamp(1, 500);
        let offset = args["offset"].as_i64().unwrap_or(0).max(0);

        match self.registry.list(&filter, limit, offset).await {
            Ok((tools, total)) => Ok(ok_result(
                format!("{total} tool(s), returning {}", tools.len()),
                json!({"tools": tools, "total": total, "limit": limit, "offset": offset}),
            )),
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn handle_get_tool_schema(&self, args: Value) -> Result<CallToolResult, ErrorData> {
        let tool_name = args["tool_name"]
            .as_str()
            .ok_or_else(|| ErrorData::invalid_params("'tool_name' is required", None))?;
        match self.get_tool_schema(tool_name).await {
            Ok(tool) => Ok(ok_result(
                format!("schema for {}", tool.name),
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                    "output_schema": tool.output_schema,
                }),
            )),
            Err(e) => Ok(error_result(&e)),
        }
    }

    async fn read_resource_payload(&self, uri: &str) -> Result<String, ToolhubError> {
        if uri == CATEGORIES_URI {
            let categories = self.registry.list_categories().await?;
            return serde_json::to_string_pretty(&categories)
                .map_err(|e| ToolhubError::Backend(e.to_string()));
        }
        if uri == STATS_URI {
            let stats = self.registry.stats().await?;
            return serde_json::to_string_pretty(&stats)
                .map_err(|e| ToolhubError::Backend(e.to_string()));
        }
        if let Some(category) = uri.strip_prefix(CATEGORY_URI_PREFIX) {
            let filter = ToolFilter {
                category: Some(category.to_string()),
                active_only: true,
            };
            let (tools, _) = self.registry.list(&filter, 500, 0).await?;
            return serde_json::to_string_pretty(&tools)
                .map_err(|e| ToolhubError::Backend(e.to_string()));
        }
        Err(ToolhubError::NotFound {
            name: uri.to_string(),
            suggestions: vec![CATEGORIES_URI.to_string(), STATS_URI.to_string()],
        })
    }
}

fn prompt_definitions() -> Vec<Prompt> {
    vec![
        Prompt::new(
            "tool_discovery",
            Some("Guide an agent through finding the right tool for a task"),
            Some(vec![PromptArgument {
                name: "task_description".into(),
                title: None,
                description: Some("What the agent is trying to accomplish".into()),
                required: Some(true),
            }]),
        ),
        Prompt::new(
            "tool_execution",
            Some("Guide an agent through executing a specific tool"),
            Some(vec![
                PromptArgument {
                    name: "tool_name".into(),
                    title: None,
                    description: Some("The tool to execute".into()),
                    required: Some(true),
                },
                PromptArgument {
                    name: "task_context".into(),
                    title: None,
                    description: Some("Context for the execution".into()),
                    required: Some(false),
                },
            ]),
        ),
        Prompt::new(
            "workflow_planning",
            Some("Plan a multi-tool workflow toward a goal"),
            Some(vec![
                PromptArgument {
                    name: "goal".into(),
                    title: None,
                    description: Some("The end goal of the workflow".into()),
                    required: Some(true),
                },
                PromptArgument {
                    name: "constraints".into(),
                    title: None,
                    description: Some("Constraints to respect".into()),
                    required: Some(false),
                },
            ]),
        ),
    ]
}

fn render_prompt(name: &str, args: &JsonMap<String, Value>) -> Option<String> {
    let get = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");
    match name {
        "tool_discovery" => Some(format!(
            "I need to accomplish the following task:\n\n{}\n\nUse find_tool to search the \
             registry with a natural-language description of what you need. Review the returned \
             scores, fetch schemas with get_tool_schema for promising candidates, and prefer the \
             highest-scoring tool whose input schema you can satisfy.",
            get("task_description"),
        )),
        "tool_execution" => Some(format!(
            "Execute the tool '{}'.\n\nContext: {}\n\nFirst call get_tool_schema to confirm the \
             required arguments, then call call_tool with arguments that satisfy the schema. If \
             the call fails, read the error and either correct the arguments or look for an \
             alternative tool with find_tool.",
            get("tool_name"),
            get("task_context"),
        )),
        "workflow_planning" => Some(format!(
            "Goal: {}\nConstraints: {}\n\nPlan a sequence of tool calls to reach the goal: \
             discover candidate tools with find_tool or list_tools, check their schemas, then \
             execute them in order with call_tool, feeding each step's output into the next. \
             Use call_tool_summarized for steps that may return large outputs.",
            get("goal"),
            get("constraints"),
        )),
        _ => None,
    }
}

impl ServerHandler for ToolService {
    fn get_info(&self) -> InitializeResult {
        InitializeResult {
            capabilities: ServerCapabilities {
                tools: Some(Default::default()),
                resources: Some(Default::default()),
                prompts: Some(Default::default()),
                ..Default::default()
            },
            instructions: Some(
                "Tool registry gateway: search the catalog with find_tool, inspect schemas with \
                 get_tool_schema, and execute with call_tool or call_tool_summarized."
                    .into(),
            ),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        let tools = vec![
            facade_tool(
                "find_tool",
                "Search for tools by natural-language intent; returns ranked matches with scores",
                object_schema(
                    json!({
                        "query": {"type": "string", "description": "What you want to do"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                        "threshold": {"type": "number", "minimum": 0, "maximum": 1},
                        "category": {"type": "string"},
                        "use_hybrid": {"type": "boolean"},
                    }),
                    &["query"],
                ),
            ),
            facade_tool(
                "call_tool",
                "Execute a registered tool by name with JSON arguments",
                object_schema(
                    json!({
                        "tool_name": {"type": "string"},
                        "arguments": {"type": "object"},
                    }),
                    &["tool_name"],
                ),
            ),
            facade_tool(
                "call_tool_summarized",
                "Execute a tool and summarize large outputs to fit a token budget",
                object_schema(
                    json!({
                        "tool_name": {"type": "string"},
                        "arguments": {"type": "object"},
                        "max_tokens": {"type": "integer", "minimum": 1},
                        "hint": {"type": "string", "description": "What to preserve in the summary"},
                    }),
                    &["tool_name"],
                ),
            ),
            facade_tool(
                "list_tools",
                "List registered tools with optional category filter and pagination",
                object_schema(
                    json!({
                        "category": {"type": "string"},
                        "active_only": {"type": "boolean"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 500},
                        "offset": {"type": "integer", "minimum": 0},
                    }),
                    &[],
                ),
            ),
            facade_tool(
                "get_tool_schema",
                "Fetch a tool's input and output JSON schemas",
                object_schema(json!({"tool_name": {"type": "string"}}), &["tool_name"]),
            ),
        ];
        std::future::ready(Ok(ListToolsResult {
            tools,
            next_cursor: None,
        }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let args = arguments_value(request.arguments);
            match request.name.as_ref() {
                "find_tool" => self.handle_find_tool(args).await,
                "call_tool" => self.handle_call_tool(args).await,
                "call_tool_summarized" => self.handle_call_tool_summarized(args).await,
                "list_tools" => self.handle_list_tools(args).await,
                "get_tool_schema" => self.handle_get_tool_schema(args).await,
                other => Err(ErrorData::invalid_params(
                    format!("unknown tool '{other}'"),
                    None,
                )),
            }
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, ErrorData>> + Send + '_ {
        async move {
            let mut resources = Vec::new();

            let mut categories = RawResource::new(CATEGORIES_URI, "Tool categories");
            categories.description = Some("All categories with at least one active tool".into());
            categories.mime_type = Some("application/json".into());
            resources.push(Resource::new(categories, None));

            let mut stats = RawResource::new(STATS_URI, "Registry statistics");
            stats.description =
                Some("Totals by category and implementation type, index coverage".into());
            stats.mime_type = Some("application/json".into());
            resources.push(Resource::new(stats, None));

            if let Ok(names) = self.registry.list_categories().await {
                for category in names {
                    let uri = format!("{CATEGORY_URI_PREFIX}{category}");
                    let mut raw = RawResource::new(uri, format!("Tools in '{category}'"));
                    raw.mime_type = Some("application/json".into());
                    resources.push(Resource::new(raw, None));
                }
            }

            Ok(ListResourcesResult {
                resources,
                next_cursor: None,
            })
        }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, ErrorData>> + Send + '_ {
        async move {
            let payload = self
                .read_resource_payload(&request.uri)
                .await
                .map_err(|e| match e {
                    ToolhubError::NotFound { .. } => {
                        ErrorData::invalid_params(e.to_string(), None)
                    }
                    other => ErrorData::internal_error(other.to_string(), None),
                })?;
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(payload, request.uri)],
            })
        }
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListPromptsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListPromptsResult {
            prompts: prompt_definitions(),
            next_cursor: None,
        }))
    }

    fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<GetPromptResult, ErrorData>> + Send + '_ {
        let arguments = request.arguments.clone().unwrap_or_default();
        let rendered = render_prompt(&request.name, &arguments);
        std::future::ready(match rendered {
            Some(text) => Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
            }),
            None => Err(ErrorData::invalid_params(
                format!("unknown prompt '{}'", request.name),
                None,
            )),
        })
    }
}
