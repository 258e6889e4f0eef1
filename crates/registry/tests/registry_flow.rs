//! End-to-end registry behavior against the in-memory store.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use toolhub_core::{ImplementationType, Result, ToolDraft, ToolhubError, ToolPatch};
use toolhub_registry::{
    Embedder, EmbeddingCache, EmbeddingService, MemoryToolStore, ToolRegistry, ToolStore,
};

const DIMENSION: usize = 4;

/// Deterministic embedder: the vector is derived from the input bytes, so
/// different texts produce different vectors and equal texts equal ones.
struct HashEmbedder {
    fail: bool,
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut state: u32 = 2_166_136_261;
    let mut out = Vec::with_capacity(DIMENSION);
    for chunk in 0..DIMENSION {
        for byte in text.bytes() {
            state = state.wrapping_mul(16_777_619) ^ u32::from(byte) ^ chunk as u32;
        }
        out.push((state % 1_000) as f32 / 1_000.0);
    }
    out
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(ToolhubError::BackendUnavailable("embedder offline".into()));
        }
        Ok(hash_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::new();
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    async fn health(&self) -> bool {
        !self.fail
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

fn registry(fail: bool) -> (ToolRegistry, Arc<MemoryToolStore>) {
    let store = Arc::new(MemoryToolStore::new(DIMENSION));
    let embeddings = Arc::new(EmbeddingService::new(
        Arc::new(HashEmbedder { fail }),
        Some(EmbeddingCache::new(64)),
    ));
    (
        ToolRegistry::new(store.clone(), embeddings),
        store,
    )
}

fn calculator_draft() -> ToolDraft {
    ToolDraft {
        name: "calculator".into(),
        description: "basic arithmetic".into(),
        category: "math".into(),
        tags: vec!["add".into(), "math".into()],
        input_schema: json!({"type": "object", "properties": {"a": {"type": "number"}}}),
        output_schema: None,
        implementation_type: ImplementationType::PythonCallable,
        implementation_code: Some("builtins.math.calculator".into()),
        version: "1.0.0".into(),
        metadata: json!({}),
    }
}

#[tokio::test]
async fn register_embeds_at_configured_dimension() {
    let (registry, _) = registry(false);
    let tool = registry.register(calculator_draft(), true).await.unwrap();
    let embedding = tool.embedding.expect("auto_embed must index the tool");
    assert_eq!(embedding.len(), DIMENSION);
    assert!(tool.is_active);
}

#[tokio::test]
async fn register_without_auto_embed_defers_indexing() {
    let (registry, _) = registry(false);
    let tool = registry.register(calculator_draft(), false).await.unwrap();
    assert!(tool.embedding.is_none());

    registry.reindex(tool.id).await.unwrap();
    let reloaded = registry.get(tool.id).await.unwrap().unwrap();
    assert_eq!(reloaded.embedding.unwrap().len(), DIMENSION);
}

#[tokio::test]
async fn duplicate_names_conflict() {
    let (registry, _) = registry(false);
    registry.register(calculator_draft(), true).await.unwrap();
    let err = registry.register(calculator_draft(), true).await.unwrap_err();
    assert!(matches!(err, ToolhubError::NameConflict(name) if name == "calculator"));
}

#[tokio::test]
async fn embedding_failure_rolls_back_registration() {
    let (registry, store) = registry(true);
    let err = registry.register(calculator_draft(), true).await.unwrap_err();
    assert!(matches!(err, ToolhubError::EmbeddingFailed(_)));
    assert!(store.get_by_name("calculator").await.unwrap().is_none());
}

#[tokio::test]
async fn embedding_failure_is_nonfatal_without_auto_embed() {
    let (registry, _) = registry(true);
    let tool = registry.register(calculator_draft(), false).await.unwrap();
    assert!(tool.embedding.is_none());
}

#[tokio::test]
async fn description_update_regenerates_embedding_and_bumps_updated_at() {
    let (registry, _) = registry(false);
    let tool = registry.register(calculator_draft(), true).await.unwrap();
    let before = tool.embedding.clone().unwrap();

    let updated = registry
        .update(
            tool.id,
            ToolPatch {
                description: Some("precise scientific arithmetic".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let after = updated.embedding.expect("re-embed must run");
    assert_ne!(before, after, "embedding must change with the description");
    assert!(updated.updated_at > tool.updated_at);
}

#[tokio::test]
async fn non_content_update_keeps_embedding() {
    let (registry, _) = registry(false);
    let tool = registry.register(calculator_draft(), true).await.unwrap();
    let before = tool.embedding.clone().unwrap();

    let updated = registry
        .update(
            tool.id,
            ToolPatch {
                version: Some("1.1.0".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.embedding.unwrap(), before);
    assert_eq!(updated.version, "1.1.0");
}

#[tokio::test]
async fn update_of_unknown_tool_is_not_found() {
    let (registry, _) = registry(false);
    let err = registry
        .update(
            404,
            ToolPatch {
                description: Some("nope".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ToolhubError::NotFound { .. }));
}

#[tokio::test]
async fn deactivate_hides_from_listing_but_not_admin_get() {
    let (registry, _) = registry(false);
    let tool = registry.register(calculator_draft(), true).await.unwrap();
    registry.deactivate(tool.id).await.unwrap();

    let (active, total_active) = registry
        .list(
            &toolhub_registry::ToolFilter {
                active_only: true,
                ..Default::default()
            },
            50,
            0,
        )
        .await
        .unwrap();
    assert!(active.is_empty());
    assert_eq!(total_active, 0);

    let fetched = registry.get(tool.id).await.unwrap().unwrap();
    assert!(!fetched.is_active);

    registry.activate(tool.id).await.unwrap();
    assert!(registry.get(tool.id).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn invalid_schema_is_rejected() {
    let (registry, _) = registry(false);
    let draft = ToolDraft {
        input_schema: json!({"type": 13}),
        ..calculator_draft()
    };
    let err = registry.register(draft, true).await.unwrap_err();
    assert!(matches!(err, ToolhubError::SchemaInvalid(_)));
}
