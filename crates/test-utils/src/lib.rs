//! Shared test utilities for toolhub crates.
//!
//! Provides environment-variable guards for config tests and three mock
//! upstreams bound to ephemeral localhost ports: an OpenAI-compatible
//! embedding endpoint, an MCP JSON-RPC server, and an LLM gateway.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, MutexGuard as StdMutexGuard, Mutex as StdMutex};
use tokio::task::JoinHandle;

/// Serialize tests that mutate process-global state (env vars, cwd, etc).
pub fn env_guard() -> StdMutexGuard<'static, ()> {
    static TEST_SERIAL: LazyLock<StdMutex<()>> = LazyLock::new(|| StdMutex::new(()));
    TEST_SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// RAII guard for environment variables - restores the original on drop.
pub struct EnvVarGuard {
    key: &'static str,
    previous: Option<String>,
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        if let Some(v) = &self.previous {
            std::env::set_var(self.key, v);
        } else {
            std::env::remove_var(self.key);
        }
    }
}

/// Set an environment variable and return a guard restoring the original.
pub fn set_env_var(key: &'static str, value: Option<&str>) -> EnvVarGuard {
    let previous = std::env::var(key).ok();
    if let Some(val) = value {
        std::env::set_var(key, val);
    } else {
        std::env::remove_var(key);
    }
    EnvVarGuard { key, previous }
}

async fn bind_ephemeral(router: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, handle)
}

// ---------------------------------------------------------------------------
// Mock embedding endpoint
// ---------------------------------------------------------------------------

/// Which of the three supported response shapes to answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingShape {
    /// `{"data": [{"embedding": [...], "index": n}]}`, returned in reversed
    /// order so clients must sort by `index`.
    Data,
    /// `{"embeddings": [[...]]}` in input order.
    Embeddings,
    /// Bare `[[...]]` in input order.
    Bare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMode {
    Normal,
    /// Reject array input with a 400 mentioning "batch"; single strings work.
    RefuseBatch,
    /// Answer every request with a 500.
    ServerError,
}

struct EmbeddingState {
    dimension: usize,
    shape: Mutex<EmbeddingShape>,
    mode: Mutex<EmbeddingMode>,
    requests: AtomicU64,
}

/// Deterministic bag-of-words embedding server.
///
/// Vectors are L2-normalized token-bucket counts, so texts sharing words have
/// high cosine similarity - enough structure to exercise semantic ranking in
/// tests without a real model.
pub struct MockEmbeddingServer {
    pub addr: SocketAddr,
    state: Arc<EmbeddingState>,
    handle: JoinHandle<()>,
}

/// Builds the deterministic vector the mock answers with for `text`.
pub fn deterministic_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut buckets = vec![0f32; dimension];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash: u32 = 2_166_136_261;
        for byte in token.bytes() {
            hash = hash.wrapping_mul(16_777_619) ^ u32::from(byte);
        }
        buckets[(hash as usize) % dimension] += 1.0;
    }
    let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut buckets {
            *v /= norm;
        }
    }
    buckets
}

async fn embeddings_handler(
    State(state): State<Arc<EmbeddingState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::Relaxed);

    let mode = *state.mode.lock();
    if mode == EmbeddingMode::ServerError {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "boom"})));
    }

    let inputs: Vec<String> = match &body["input"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => {
            if mode == EmbeddingMode::RefuseBatch {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "batch input is not supported by this model"})),
                );
            }
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        }
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "missing input"})),
            )
        }
    };

    let vectors: Vec<Vec<f32>> = inputs
        .iter()
        .map(|t| deterministic_embedding(t, state.dimension))
        .collect();

    let body = match *state.shape.lock() {
        EmbeddingShape::Data => {
            let mut items: Vec<Value> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| json!({"embedding": v, "index": i, "object": "embedding"}))
                .collect();
            items.reverse();
            json!({"object": "list", "data": items})
        }
        EmbeddingShape::Embeddings => json!({"embeddings": vectors}),
        EmbeddingShape::Bare => json!(vectors),
    };
    (StatusCode::OK, Json(body))
}

impl MockEmbeddingServer {
    pub async fn spawn(dimension: usize) -> Self {
        let state = Arc::new(EmbeddingState {
            dimension,
            shape: Mutex::new(EmbeddingShape::Data),
            mode: Mutex::new(EmbeddingMode::Normal),
            requests: AtomicU64::new(0),
        });
        let router = Router::new()
            .route("/v1/embeddings", post(embeddings_handler))
            .with_state(state.clone());
        let (addr, handle) = bind_ephemeral(router).await;
        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/v1/embeddings", self.addr)
    }

    pub fn set_shape(&self, shape: EmbeddingShape) {
        *self.state.shape.lock() = shape;
    }

    pub fn set_mode(&self, mode: EmbeddingMode) {
        *self.state.mode.lock() = mode;
    }

    pub fn request_count(&self) -> u64 {
        self.state.requests.load(Ordering::Relaxed)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        deterministic_embedding(text, self.state.dimension)
    }
}

impl Drop for MockEmbeddingServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Mock upstream MCP server
// ---------------------------------------------------------------------------

struct McpState {
    tools: Mutex<Vec<Value>>,
    calls: Mutex<Vec<(String, Value)>>,
    fail: Mutex<bool>,
}

/// JSON-RPC MCP server answering `initialize`, `tools/list`, and
/// `tools/call`. The tool list can be swapped between requests to simulate
/// upstream catalog changes.
pub struct MockMcpServer {
    pub addr: SocketAddr,
    state: Arc<McpState>,
    handle: JoinHandle<()>,
}

/// Builds an MCP tool definition in the wire shape `tools/list` returns.
pub fn mcp_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": {}},
    })
}

async fn mcp_handler(
    State(state): State<Arc<McpState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if *state.fail.lock() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "upstream down"})),
        );
    }
    let id = body["id"].clone();
    let result = match body["method"].as_str() {
        Some("initialize") => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-mcp", "version": "0.0.1"},
        }),
        Some("tools/list") => json!({"tools": *state.tools.lock()}),
        Some("tools/call") => {
            let name = body["params"]["name"].as_str().unwrap_or_default().to_string();
            let arguments = body["params"]["arguments"].clone();
            state.calls.lock().push((name.clone(), arguments.clone()));
            json!({
                "content": [{
                    "type": "text",
                    "text": format!("ran {name} with {arguments}"),
                }],
                "isError": false,
            })
        }
        other => {
            return (
                StatusCode::OK,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32601, "message": format!("unknown method {other:?}")},
                    "id": id,
                })),
            )
        }
    };
    (
        StatusCode::OK,
        Json(json!({"jsonrpc": "2.0", "result": result, "id": id})),
    )
}

impl MockMcpServer {
    pub async fn spawn(tools: Vec<Value>) -> Self {
        let state = Arc::new(McpState {
            tools: Mutex::new(tools),
            calls: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        });
        let router = Router::new()
            .route("/mcp", post(mcp_handler))
            .with_state(state.clone());
        let (addr, handle) = bind_ephemeral(router).await;
        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn set_tools(&self, tools: Vec<Value>) {
        *self.state.tools.lock() = tools;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.state.fail.lock() = fail;
    }

    /// `(tool_name, arguments)` pairs received via `tools/call`.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.calls.lock().clone()
    }
}

impl Drop for MockMcpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Mock LLM gateway
// ---------------------------------------------------------------------------

struct GatewayState {
    reply: Mutex<String>,
    tools: Mutex<Vec<Value>>,
    fail: Mutex<bool>,
    chat_requests: Mutex<Vec<Value>>,
}

/// Chat-completions endpoint plus the gateway's MCP tool listing.
pub struct MockGateway {
    pub addr: SocketAddr,
    state: Arc<GatewayState>,
    handle: JoinHandle<()>,
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if *state.fail.lock() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "gateway unavailable"})),
        );
    }
    state.chat_requests.lock().push(body);
    let reply = state.reply.lock().clone();
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": reply}}],
            "usage": {"total_tokens": 42},
        })),
    )
}

async fn gateway_tools_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    if *state.fail.lock() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "gateway unavailable"})),
        );
    }
    (StatusCode::OK, Json(json!({"tools": *state.tools.lock()})))
}

impl MockGateway {
    pub async fn spawn() -> Self {
        let state = Arc::new(GatewayState {
            reply: Mutex::new("mock gateway reply".to_string()),
            tools: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
            chat_requests: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .route("/v1/chat/completions", post(chat_handler))
            .route("/v1/mcp/tools", get(gateway_tools_handler))
            .with_state(state.clone());
        let (addr, handle) = bind_ephemeral(router).await;
        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL without a trailing path.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_reply(&self, reply: &str) {
        *self.state.reply.lock() = reply.to_string();
    }

    pub fn set_tools(&self, tools: Vec<Value>) {
        *self.state.tools.lock() = tools;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.state.fail.lock() = fail;
    }

    /// Raw chat-completions request bodies received so far.
    pub fn chat_requests(&self) -> Vec<Value> {
        self.state.chat_requests.lock().clone()
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
