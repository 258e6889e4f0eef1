//! REST surface: `/mcp/*` protocol endpoints, `/admin/*` management, and the
//! health probes.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use toolhub_core::{ExecutionStatus, ToolDraft, ToolhubError, ToolPatch};
use toolhub_registry::{FindToolQuery, ToolFilter};

use crate::app::ToolService;

/// Domain error → HTTP response. Backend detail stays in the logs; the body
/// carries only a correlation id.
pub struct ApiError(pub ToolhubError);

impl From<ToolhubError> for ApiError {
    fn from(err: ToolhubError) -> Self {
        Self(err)
    }
}

fn correlation_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, body) = match &err {
            ToolhubError::InvalidInput(msg)
            | ToolhubError::InvalidQuery(msg)
            | ToolhubError::SchemaInvalid(msg) => {
                (StatusCode::BAD_REQUEST, json!({"error": msg}))
            }
            ToolhubError::NameConflict(name) => (
                StatusCode::CONFLICT,
                json!({"error": format!("tool '{name}' already exists")}),
            ),
            ToolhubError::NotFound { name, suggestions } => (
                StatusCode::NOT_FOUND,
                json!({"error": format!("'{name}' not found"), "suggestions": suggestions}),
            ),
            ToolhubError::Inactive(name) => (
                StatusCode::BAD_REQUEST,
                json!({"error": format!("tool '{name}' is inactive")}),
            ),
            ToolhubError::ExecutorDisabled(kind) => (
                StatusCode::BAD_REQUEST,
                json!({"error": format!("{kind} executor is disabled")}),
            ),
            ToolhubError::ValidationFailed { path, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": message, "schema_path": path}),
            ),
            ToolhubError::Timeout(after) => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({"error": format!("timed out after {after:?}")}),
            ),
            ToolhubError::Backend(_)
            | ToolhubError::EmbeddingShape(_)
            | ToolhubError::EmbeddingFailed(_) => {
                let id = correlation_id();
                tracing::error!(target: "toolhub::http", correlation_id = %id, error = %err, "backend failure");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({"error": "backend failure", "correlation_id": id}),
                )
            }
            ToolhubError::BackendUnavailable(_) | ToolhubError::Database(_) => {
                let id = correlation_id();
                tracing::error!(target: "toolhub::http", correlation_id = %id, error = %err, "backend unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({"error": "backend unavailable", "correlation_id": id}),
                )
            }
            ToolhubError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Constant-time API-key check for the admin routes. Absent configuration
/// leaves the admin surface open (development mode).
pub async fn admin_auth(
    State(service): State<ToolService>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = &service.settings.api_key else {
        return next.run(request).await;
    };
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let matches = provided.len() == expected.len()
        && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));
    if matches {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid or missing API key"})),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListToolsBody {
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "default_true")]
    active_only: bool,
    #[serde(default = "default_list_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_true() -> bool {
    true
}

fn default_list_limit() -> i64 {
    100
}

async fn mcp_list_tools(
    State(service): State<ToolService>,
    Json(body): Json<ListToolsBody>,
) -> ApiResult<Json<Value>> {
    let filter = ToolFilter {
        category: body.category,
        active_only: body.active_only,
    };
    let limit = body.limit.clamp(1, 500);
    let offset = body.offset.max(0);
    let (tools, total) = service.registry.list(&filter, limit, offset).await?;
    Ok(Json(json!({
        "tools": tools,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

async fn mcp_find_tool(
    State(service): State<ToolService>,
    Json(body): Json<FindToolQuery>,
) -> ApiResult<Json<Value>> {
    let query_text = body.query.clone();
    let outcome = service.find_tool(body).await?;
    let results: Vec<Value> = outcome
        .results
        .iter()
        .map(|r| json!({"tool": r.tool, "score": (r.score * 10_000.0).round() / 10_000.0}))
        .collect();
    Ok(Json(json!({
        "results": results,
        "count": results.len(),
        "query": query_text,
        "degraded": outcome.degraded,
    })))
}

#[derive(Debug, Deserialize)]
struct CallToolBody {
    tool_name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<Value>,
}

async fn mcp_call_tool(
    State(service): State<ToolService>,
    Json(body): Json<CallToolBody>,
) -> ApiResult<Response> {
    let arguments = if body.arguments.is_null() {
        json!({})
    } else {
        body.arguments
    };
    let outcome = service.call_tool(&body.tool_name, arguments).await?;
    let payload = json!({
        "success": outcome.success(),
        "tool_name": outcome.tool_name,
        "execution_id": outcome.execution_id,
        "output": outcome.output,
        "error": outcome.error,
        "status": outcome.status,
        "execution_time_ms": outcome.duration_ms,
    });
    // A deadline miss is a gateway timeout, not a tool failure.
    let status = if outcome.status == ExecutionStatus::Timeout {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(payload)).into_response())
}

#[derive(Debug, Deserialize)]
struct CallToolSummarizedBody {
    tool_name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    max_tokens: Option<usize>,
    #[serde(default)]
    hint: Option<String>,
}

async fn mcp_call_tool_summarized(
    State(service): State<ToolService>,
    Json(body): Json<CallToolSummarizedBody>,
) -> ApiResult<Response> {
    let arguments = if body.arguments.is_null() {
        json!({})
    } else {
        body.arguments
    };
    let (outcome, rendered, was_summarized) = service
        .call_tool_summarized(
            &body.tool_name,
            arguments,
            body.max_tokens,
            body.hint.as_deref(),
        )
        .await?;
    let payload = json!({
        "success": outcome.success(),
        "tool_name": outcome.tool_name,
        "execution_id": outcome.execution_id,
        "output": rendered,
        "was_summarized": was_summarized,
        "error": outcome.error,
        "status": outcome.status,
        "execution_time_ms": outcome.duration_ms,
    });
    let status = if outcome.status == ExecutionStatus::Timeout {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(payload)).into_response())
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    #[serde(flatten)]
    draft: ToolDraft,
    #[serde(default = "default_true")]
    auto_embed: bool,
}

#[derive(Debug, Deserialize)]
struct AdminListQuery {
    #[serde(default)]
    category: Option<String>,
    /// Admin listings default to showing inactive rows too.
    #[serde(default)]
    active_only: bool,
    #[serde(default = "default_list_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

async fn admin_list_tools(
    State(service): State<ToolService>,
    Query(query): Query<AdminListQuery>,
) -> ApiResult<Json<Value>> {
    let filter = ToolFilter {
        category: query.category,
        active_only: query.active_only,
    };
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);
    let (tools, total) = service.registry.list(&filter, limit, offset).await?;
    Ok(Json(json!({
        "tools": tools,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

async fn register_tool(
    State(service): State<ToolService>,
    Json(body): Json<RegisterBody>,
) -> ApiResult<Response> {
    let tool = service.registry.register(body.draft, body.auto_embed).await?;
    Ok((StatusCode::CREATED, Json(tool)).into_response())
}

async fn get_tool(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let tool = service.registry.get(id).await?.ok_or(ToolhubError::NotFound {
        name: format!("id {id}"),
        suggestions: Vec::new(),
    })?;
    Ok(Json(json!(tool)))
}

async fn update_tool(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
    Json(patch): Json<ToolPatch>,
) -> ApiResult<Json<Value>> {
    let tool = service.registry.update(id, patch).await?;
    Ok(Json(json!(tool)))
}

async fn delete_tool(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    service.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reindex_tool(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    service.registry.reindex(id).await?;
    Ok(Json(json!({"id": id, "reindexed": true})))
}

async fn activate_tool(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let tool = service.registry.activate(id).await?;
    Ok(Json(json!(tool)))
}

async fn deactivate_tool(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let tool = service.registry.deactivate(id).await?;
    Ok(Json(json!(tool)))
}

async fn tool_stats(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let stats = service.registry.execution_stats(id).await?;
    Ok(Json(json!(stats)))
}

#[derive(Debug, Deserialize)]
struct SimilarQuery {
    #[serde(default = "default_similar_limit")]
    limit: usize,
}

fn default_similar_limit() -> usize {
    5
}

async fn similar_tools(
    State(service): State<ToolService>,
    Path(id): Path<i64>,
    Query(query): Query<SimilarQuery>,
) -> ApiResult<Json<Value>> {
    let hits = service.registry.find_similar(id, query.limit, true).await?;
    let results: Vec<Value> = hits
        .iter()
        .map(|h| json!({"tool": h.tool, "score": h.score}))
        .collect();
    Ok(Json(json!({"results": results, "count": results.len()})))
}

#[derive(Debug, Deserialize, Default)]
struct SyncBody {
    #[serde(default)]
    source: Option<String>,
}

async fn trigger_sync(
    State(service): State<ToolService>,
    Json(body): Json<SyncBody>,
) -> ApiResult<Json<Value>> {
    match body.source {
        Some(source) => {
            let report = service.discovery.sync_one(&source).await?;
            Ok(Json(json!(report)))
        }
        None => {
            let report = service.discovery.sync_all().await;
            Ok(Json(json!({
                "summary": report.format_summary(),
                "sources": report.sources,
            })))
        }
    }
}

async fn reindex_missing(
    State(service): State<ToolService>,
) -> ApiResult<Json<Value>> {
    let indexed = service.reindex_missing(100).await?;
    Ok(Json(json!({"reindexed": indexed})))
}

async fn embedding_stats(State(service): State<ToolService>) -> Json<Value> {
    let backend_healthy = service.embeddings.health().await;
    match service.embeddings.cache_stats() {
        Some(stats) => Json(json!({
            "cache_enabled": true,
            "cache": stats,
            "backend_healthy": backend_healthy,
        })),
        None => Json(json!({"cache_enabled": false, "backend_healthy": backend_healthy})),
    }
}

async fn registry_stats(State(service): State<ToolService>) -> ApiResult<Json<Value>> {
    Ok(Json(json!(service.registry.stats().await?)))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn live() -> Json<Value> {
    Json(json!({"status": "alive"}))
}

async fn ready(State(service): State<ToolService>) -> Response {
    if service.ready().await {
        (StatusCode::OK, Json(json!({"status": "ready"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "reason": "database unreachable"})),
        )
            .into_response()
    }
}

/// Builds the REST router. Admin routes sit behind the API-key middleware.
pub fn router(service: ToolService) -> Router {
    let admin = Router::new()
        .route("/tools", get(admin_list_tools))
        .route("/tools", post(register_tool))
        .route("/tools/{id}", get(get_tool))
        .route("/tools/{id}", put(update_tool))
        .route("/tools/{id}", delete(delete_tool))
        .route("/tools/{id}/reindex", post(reindex_tool))
        .route("/tools/reindex_missing", post(reindex_missing))
        .route("/tools/{id}/activate", post(activate_tool))
        .route("/tools/{id}/deactivate", post(deactivate_tool))
        .route("/tools/{id}/stats", get(tool_stats))
        .route("/tools/{id}/similar", get(similar_tools))
        .route("/mcp/sync", post(trigger_sync))
        .route("/embeddings/stats", get(embedding_stats))
        .route("/stats", get(registry_stats))
        .layer(axum::middleware::from_fn_with_state(
            service.clone(),
            admin_auth,
        ));

    Router::new()
        .route("/mcp/list_tools", post(mcp_list_tools))
        .route("/mcp/find_tool", post(mcp_find_tool))
        .route("/mcp/call_tool", post(mcp_call_tool))
        .route("/mcp/call_tool_summarized", post(mcp_call_tool_summarized))
        .nest("/admin", admin)
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .with_state(service)
}
