//! Router behavior end to end against the in-memory store and mock backends.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use toolhub_core::tool::embedding_text;
use toolhub_core::{ExecutionStatus, ImplementationType, Result, ToolDraft, ToolhubError};
use toolhub_executor::backends::callable::{CallablePolicy, CallableRegistry};
use toolhub_executor::backends::BackendContext;
use toolhub_executor::builtins::{builtin_drafts, register_builtins};
use toolhub_executor::{ExecutionRouter, GatewayClient, GatewayConfig, RouterConfig};
use toolhub_registry::{
    Embedder, EmbeddingService, MemoryToolStore, RetrievalConfig, RetrievalEngine, ToolStore,
};
use toolhub_test_utils::{deterministic_embedding, mcp_tool, MockGateway, MockMcpServer};

const DIMENSION: usize = 32;

/// Same bag-of-words vectors the mock embedding server answers with, without
/// the HTTP round trip.
struct BagOfWordsEmbedder;

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(deterministic_embedding(text, DIMENSION))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| deterministic_embedding(t, DIMENSION))
            .collect())
    }

    async fn health(&self) -> bool {
        true
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

fn router_with(
    store: Arc<MemoryToolStore>,
    gateway_url: &str,
    config: RouterConfig,
) -> ExecutionRouter {
    let embeddings = Arc::new(EmbeddingService::new(Arc::new(BagOfWordsEmbedder), None));
    let retrieval = Arc::new(RetrievalEngine::new(
        store.clone(),
        embeddings,
        RetrievalConfig::default(),
    ));
    let mut callables = CallableRegistry::new(CallablePolicy::default());
    register_builtins(&mut callables);
    let ctx = BackendContext {
        http: reqwest::Client::new(),
        gateway: Arc::new(GatewayClient::new(
            reqwest::Client::new(),
            GatewayConfig {
                base_url: gateway_url.to_string(),
                ..Default::default()
            },
        )),
        callables: Arc::new(callables),
    };
    ExecutionRouter::new(store, retrieval, ctx, config)
}

/// Embedding a draft the way the registry would, for seeding indexed tools.
fn draft_vector(draft: &ToolDraft) -> Vec<f32> {
    deterministic_embedding(
        &embedding_text(&draft.name, &draft.description, &draft.category, &draft.tags),
        DIMENSION,
    )
}

async fn seed(store: &MemoryToolStore, draft: ToolDraft) -> i64 {
    store.insert(&draft, None).await.unwrap().id
}

fn calculator_draft() -> ToolDraft {
    builtin_drafts()
        .into_iter()
        .find(|d| d.name == "calculator")
        .unwrap()
}

fn http_draft(name: &str, config: Value) -> ToolDraft {
    ToolDraft {
        name: name.into(),
        description: "http tool".into(),
        category: "web".into(),
        tags: vec![],
        input_schema: json!({"type": "object"}),
        output_schema: None,
        implementation_type: ImplementationType::HttpEndpoint,
        implementation_code: Some(config.to_string()),
        version: "1.0.0".into(),
        metadata: json!({}),
    }
}

#[tokio::test]
async fn calculator_runs_and_records_success() {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    seed(&store, calculator_draft()).await;
    let router = router_with(store.clone(), "", RouterConfig::default());

    let outcome = router
        .call_tool("calculator", json!({"operation": "add", "a": 2, "b": 3}))
        .await
        .unwrap();
    assert!(outcome.success());
    assert_eq!(outcome.output.as_ref().unwrap()["result"], 5.0);
    assert!(outcome.execution_id.is_some());

    let rows = store.executions_for("calculator");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn unknown_tool_fails_with_semantic_suggestions() {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    let calculator = calculator_draft();
    let vector = draft_vector(&calculator);
    store.insert(&calculator, Some(vector)).await.unwrap();
    // Indexed but semantically unrelated to the missing name.
    let weather = ToolDraft {
        name: "weather_lookup".into(),
        description: "fetch the weather forecast for a city".into(),
        category: "web".into(),
        tags: vec!["weather".into(), "forecast".into()],
        ..calculator_draft()
    };
    let weather_vector = draft_vector(&weather);
    store.insert(&weather, Some(weather_vector)).await.unwrap();
    let router = router_with(store, "", RouterConfig::default());

    // The missing name shares no spelling with "calculator"; only a semantic
    // search over the catalog text can relate the two.
    let err = router.call_tool("add_numbers", json!({})).await.unwrap_err();
    match err {
        ToolhubError::NotFound { name, suggestions } => {
            assert_eq!(name, "add_numbers");
            assert_eq!(suggestions.first().map(String::as_str), Some("calculator"));
            assert!(!suggestions.contains(&"weather_lookup".to_string()));
        }
        other => panic!("expected NotFound, got {other}"),
    }
}

#[tokio::test]
async fn inactive_tool_is_rejected_without_audit_row() {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    let id = seed(&store, calculator_draft()).await;
    store.set_active(id, false).await.unwrap();
    let router = router_with(store.clone(), "", RouterConfig::default());

    let err = router
        .call_tool("calculator", json!({"operation": "add", "a": 1, "b": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolhubError::Inactive(_)));
    assert!(store.executions_for("calculator").is_empty());
}

#[tokio::test]
async fn invalid_arguments_record_error_and_point_into_schema() {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    seed(&store, calculator_draft()).await;
    let router = router_with(store.clone(), "", RouterConfig::default());

    let err = router
        .call_tool("calculator", json!({"operation": "add", "a": "two", "b": 3}))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolhubError::ValidationFailed { .. }));

    let rows = store.executions_for("calculator");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.status, ExecutionStatus::Error);
}

#[tokio::test]
async fn disallowed_callable_module_fails_without_success_row() {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    seed(
        &store,
        ToolDraft {
            implementation_code: Some("calc.run".into()),
            ..calculator_draft()
        },
    )
    .await;
    let router = router_with(store.clone(), "", RouterConfig::default());

    let outcome = router
        .call_tool("calculator", json!({"operation": "add", "a": 1, "b": 2}))
        .await
        .unwrap();
    assert!(!outcome.success());
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("not in the allowed module list"));

    let rows = store.executions_for("calculator");
    assert!(rows.iter().all(|r| r.record.status != ExecutionStatus::Success));
}

#[tokio::test]
async fn slow_http_backend_times_out_and_leaves_loop_responsive() {
    // Backend that never answers within the deadline.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let slow = axum::Router::new().route(
        "/hang",
        axum::routing::post(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "too late"
        }),
    );
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, slow).await;
    });

    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    seed(
        &store,
        http_draft(
            "sluggish",
            json!({"url": format!("http://{addr}/hang"), "method": "POST", "timeout": 1.0}),
        ),
    )
    .await;
    let router = router_with(store.clone(), "", RouterConfig::default());

    let started = std::time::Instant::now();
    let (outcome, heartbeat) = tokio::join!(
        router.call_tool("sluggish", json!({})),
        // Other work keeps running while the dispatch waits on its deadline.
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        }
    );
    let outcome = outcome.unwrap();

    assert_eq!(heartbeat, 42);
    assert_eq!(outcome.status, ExecutionStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));

    let rows = store.executions_for("sluggish");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.status, ExecutionStatus::Timeout);

    server.abort();
}

#[tokio::test]
async fn mcp_backend_calls_upstream_tool() {
    let upstream = MockMcpServer::spawn(vec![mcp_tool("echo", "echoes input")]).await;
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    seed(
        &store,
        ToolDraft {
            name: "mock:echo".into(),
            description: "remote echo".into(),
            category: "mcp".into(),
            tags: vec![],
            input_schema: json!({"type": "object"}),
            output_schema: None,
            implementation_type: ImplementationType::McpServer,
            implementation_code: Some(
                json!({"url": upstream.url(), "tool_name": "echo"}).to_string(),
            ),
            version: "1.0.0".into(),
            metadata: json!({}),
        },
    )
    .await;
    let router = router_with(store, "", RouterConfig::default());

    let outcome = router
        .call_tool("mock:echo", json!({"text": "hi"}))
        .await
        .unwrap();
    assert!(outcome.success());
    assert_eq!(upstream.calls().len(), 1);
    assert_eq!(upstream.calls()[0].0, "echo");
}

#[tokio::test]
async fn gateway_backend_sends_arguments_as_user_message() {
    let gateway = MockGateway::spawn().await;
    gateway.set_reply("42 is the answer");

    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    seed(
        &store,
        ToolDraft {
            name: "ask_model".into(),
            description: "ask the default model".into(),
            category: "llm".into(),
            tags: vec![],
            input_schema: json!({"type": "object"}),
            output_schema: None,
            implementation_type: ImplementationType::LlmGateway,
            implementation_code: Some(
                json!({"model": "mock-model", "system_prompt": "be terse"}).to_string(),
            ),
            version: "1.0.0".into(),
            metadata: json!({}),
        },
    )
    .await;
    let router = router_with(store, &gateway.url(), RouterConfig::default());

    let outcome = router
        .call_tool("ask_model", json!({"input": "what is six times seven?"}))
        .await
        .unwrap();
    assert!(outcome.success());
    assert_eq!(outcome.output.unwrap()["result"], "42 is the answer");

    let requests = gateway.chat_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["model"], "mock-model");
    assert_eq!(requests[0]["messages"][0]["role"], "system");
    assert_eq!(
        requests[0]["messages"][1]["content"],
        "what is six times seven?"
    );
}

#[tokio::test]
async fn metadata_timeout_override_is_clamped_to_ceiling() {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let slow = axum::Router::new().route(
        "/hang",
        axum::routing::post(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "too late"
        }),
    );
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, slow).await;
    });

    seed(
        &store,
        ToolDraft {
            metadata: json!({"timeout_seconds": 3600.0}),
            ..http_draft("patient", json!({"url": format!("http://{addr}/hang")}))
        },
    )
    .await;

    let router = router_with(
        store,
        "",
        RouterConfig {
            timeout_ceiling: Duration::from_secs(1),
            ..Default::default()
        },
    );

    let started = std::time::Instant::now();
    let outcome = router.call_tool("patient", json!({})).await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    server.abort();
}
