//! REST surface integration tests against the in-memory store and the mock
//! embedding endpoint.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use toolhub_registry::MemoryToolStore;
use toolhub_server::{admin, AppEnv, Settings, ToolService};
use toolhub_test_utils::MockEmbeddingServer;

const DIMENSION: usize = 32;

fn settings(embedding_url: &str, api_key: Option<&str>) -> Settings {
    Settings {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        app_env: AppEnv::Development,
        log_level: "info".into(),
        database_url: None,
        db_pool_size: 5,
        db_max_overflow: 10,
        db_acquire_timeout: Duration::from_secs(5),
        db_recycle: Duration::from_secs(600),
        embedding_endpoint_url: embedding_url.to_string(),
        embedding_api_key: None,
        embedding_model: "mock-embed".into(),
        embedding_dimension: DIMENSION,
        embedding_dimension_rebuild: false,
        embedding_timeout: Duration::from_secs(2),
        embedding_max_retries: 2,
        embedding_cache_enabled: true,
        embedding_cache_size: 64,
        gateway_url: None,
        gateway_api_key: None,
        gateway_default_model: "mock-model".into(),
        mcp_sources: Vec::new(),
        discovery_auto_sync: false,
        discovery_source_timeout: Duration::from_secs(5),
        gateway_sync_enabled: false,
        default_similarity_threshold: 0.7,
        default_search_limit: 5,
        use_hybrid_search: true,
        hybrid_vector_weight: 0.7,
        find_tool_timeout: Duration::from_secs(10),
        call_tool_timeout: Duration::from_secs(5),
        call_tool_timeout_ceiling: Duration::from_secs(30),
        python_executor_enabled: true,
        python_allowed_modules: vec!["tools.".into()],
        summarization_enabled: true,
        summarization_model: None,
        summarization_default_max_tokens: 500,
        summarization_timeout: Duration::from_secs(5),
        summarization_max_input_chars: 50_000,
        api_key: api_key.map(str::to_string),
        cors_origins: Vec::new(),
        max_body_bytes: 1_048_576,
    }
}

struct TestApp {
    addr: SocketAddr,
    client: reqwest::Client,
    _embedding_server: MockEmbeddingServer,
}

impl TestApp {
    async fn spawn(api_key: Option<&str>) -> Self {
        let embedding_server = MockEmbeddingServer::spawn(DIMENSION).await;
        let store = Arc::new(MemoryToolStore::new(DIMENSION));
        let service =
            ToolService::with_store(settings(&embedding_server.url(), api_key), store).unwrap();

        let router = admin::router(service);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            _embedding_server: embedding_server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

fn calculator_body() -> Value {
    json!({
        "name": "calculator",
        "description": "add two numbers",
        "category": "math",
        "tags": ["add", "math"],
        "input_schema": {
            "type": "object",
            "properties": {
                "operation": {"type": "string"},
                "a": {"type": "number"},
                "b": {"type": "number"},
            },
            "required": ["operation", "a", "b"],
        },
        "implementation_type": "PYTHON_CALLABLE",
        "implementation_code": "tools.math.calculator",
    })
}

#[tokio::test]
async fn registered_tool_is_found_by_semantic_query() {
    let app = TestApp::spawn(None).await;

    let created = app.post("/admin/tools", calculator_body()).await;
    assert_eq!(created.status(), 201);
    let tool: Value = created.json().await.unwrap();
    assert_eq!(tool["name"], "calculator");

    let response = app
        .post(
            "/mcp/find_tool",
            json!({"query": "add two numbers", "limit": 3, "threshold": 0.5}),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["count"].as_u64().unwrap() >= 1);
    assert_eq!(body["results"][0]["tool"]["name"], "calculator");
    assert!(body["results"][0]["score"].as_f64().unwrap() >= 0.5);
    assert_eq!(body["degraded"], false);
}

#[tokio::test]
async fn empty_registry_returns_empty_results() {
    let app = TestApp::spawn(None).await;

    let response = app.post("/mcp/find_tool", json!({"query": "anything"})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 0);
    assert_eq!(body["results"], json!([]));
}

#[tokio::test]
async fn call_tool_executes_builtin_calculator() {
    let app = TestApp::spawn(None).await;
    app.post("/admin/tools", calculator_body()).await;

    let response = app
        .post(
            "/mcp/call_tool",
            json!({
                "tool_name": "calculator",
                "arguments": {"operation": "multiply", "a": 6, "b": 7},
            }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["output"]["result"], 42.0);
    assert!(body["execution_id"].is_i64());
}

#[tokio::test]
async fn unknown_tool_returns_404_with_semantic_suggestions() {
    let app = TestApp::spawn(None).await;
    app.post("/admin/tools", calculator_body()).await;

    // No registered name looks like "add_numbers"; the suggestion comes from
    // searching the catalog with the requested name as the query.
    let response = app
        .post(
            "/mcp/call_tool",
            json!({"tool_name": "add_numbers", "arguments": {}}),
        )
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["suggestions"][0], "calculator");
}

#[tokio::test]
async fn invalid_arguments_return_422_with_schema_path() {
    let app = TestApp::spawn(None).await;
    app.post("/admin/tools", calculator_body()).await;

    let response = app
        .post(
            "/mcp/call_tool",
            json!({"tool_name": "calculator", "arguments": {"operation": "add", "a": "x", "b": 1}}),
        )
        .await;
    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["schema_path"], "/a");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::spawn(None).await;
    app.post("/admin/tools", calculator_body()).await;

    let response = app.post("/admin/tools", calculator_body()).await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn deactivated_tool_rejects_calls_and_hides_from_listing() {
    let app = TestApp::spawn(None).await;
    let created: Value = app
        .post("/admin/tools", calculator_body())
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let response = app
        .post(&format!("/admin/tools/{id}/deactivate"), json!({}))
        .await;
    assert_eq!(response.status(), 200);

    let listed: Value = app
        .post("/mcp/list_tools", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 0);

    let call = app
        .post(
            "/mcp/call_tool",
            json!({"tool_name": "calculator", "arguments": {"operation": "add", "a": 1, "b": 2}}),
        )
        .await;
    assert_eq!(call.status(), 400);

    // Admin reads still see the inactive row.
    let fetched = app
        .client
        .get(app.url(&format!("/admin/tools/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);
    let body: Value = fetched.json().await.unwrap();
    assert_eq!(body["is_active"], false);
}

#[tokio::test]
async fn admin_routes_enforce_api_key_in_constant_time_comparison() {
    let app = TestApp::spawn(Some("secret-key")).await;

    // Missing key.
    let response = app.post("/admin/tools", calculator_body()).await;
    assert_eq!(response.status(), 401);

    // Wrong key.
    let response = app
        .client
        .post(app.url("/admin/tools"))
        .header("x-api-key", "wrong")
        .json(&calculator_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // Correct key.
    let response = app
        .client
        .post(app.url("/admin/tools"))
        .header("x-api-key", "secret-key")
        .json(&calculator_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    // Protocol endpoints stay open.
    let response = app.post("/mcp/find_tool", json!({"query": "add"})).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn health_probes_respond() {
    let app = TestApp::spawn(None).await;
    for path in ["/health", "/live", "/ready"] {
        let response = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 200, "{path} must be healthy");
    }
}

#[tokio::test]
async fn update_reembeds_and_find_reflects_new_description() {
    let app = TestApp::spawn(None).await;
    let created: Value = app
        .post("/admin/tools", calculator_body())
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let response = app
        .client
        .put(app.url(&format!("/admin/tools/{id}")))
        .json(&json!({"description": "convert temperatures between celsius and fahrenheit"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let updated: Value = response.json().await.unwrap();
    assert!(updated["updated_at"].as_str().unwrap() >= created["updated_at"].as_str().unwrap());

    let found: Value = app
        .post(
            "/mcp/find_tool",
            json!({"query": "convert temperatures celsius fahrenheit", "threshold": 0.4}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(found["results"][0]["tool"]["name"], "calculator");
}

#[tokio::test]
async fn embedding_cache_stats_exposed() {
    let app = TestApp::spawn(None).await;
    let response = app
        .client
        .get(app.url("/admin/embeddings/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cache_enabled"], true);
}
