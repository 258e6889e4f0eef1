//! Postgres adapter integration tests.
//!
//! These run only when `TOOLHUB_TEST_DATABASE_URL` points at a Postgres
//! instance with the pgvector extension available; otherwise every test
//! skips. The database is expected to be disposable - tables are created on
//! the fly and rows are cleaned per test via unique name prefixes.

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use toolhub_core::{ExecutionRecord, ExecutionStatus, ImplementationType, ToolDraft, ToolPatch};
use toolhub_registry::{EmbeddingUpdate, PgToolStore, SearchOptions, ToolFilter, ToolStore};

const DIMENSION: usize = 8;

async fn store() -> Option<PgToolStore> {
    let url = std::env::var("TOOLHUB_TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
        .expect("connecting to the test database");
    let store = PgToolStore::new(pool, DIMENSION);
    store.ensure_schema().await.expect("applying schema");
    Some(store)
}

fn unit_vector(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSION];
    v[axis % DIMENSION] = 1.0;
    v
}

fn draft(name: &str, description: &str) -> ToolDraft {
    ToolDraft {
        name: name.into(),
        description: description.into(),
        category: "integration".into(),
        tags: vec!["test".into()],
        input_schema: json!({"type": "object"}),
        output_schema: None,
        implementation_type: ImplementationType::HttpEndpoint,
        implementation_code: Some(json!({"url": "http://example.invalid"}).to_string()),
        version: "1.0.0".into(),
        metadata: json!({}),
    }
}

/// Unique per-test name so parallel runs against a shared database do not
/// collide.
fn unique(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}-{nanos}")
}

#[tokio::test]
async fn roundtrip_insert_get_update_delete() {
    let Some(store) = store().await else { return };
    let name = unique("pg-roundtrip");

    let tool = store
        .insert(&draft(&name, "roundtrip tool"), Some(unit_vector(0)))
        .await
        .unwrap();
    assert_eq!(tool.name, name);
    assert_eq!(tool.embedding.as_ref().map(Vec::len), Some(DIMENSION));
    assert!(tool.is_active);

    let fetched = store.get_by_name(&name).await.unwrap().unwrap();
    assert_eq!(fetched.id, tool.id);
    assert_eq!(fetched.tags, vec!["test".to_string()]);

    let updated = store
        .update(
            tool.id,
            &ToolPatch {
                description: Some("updated description".into()),
                ..Default::default()
            },
            EmbeddingUpdate::Set(unit_vector(1)),
        )
        .await
        .unwrap();
    assert_eq!(updated.description, "updated description");
    assert_ne!(updated.embedding, tool.embedding);
    assert!(updated.updated_at >= tool.updated_at);

    store.delete(tool.id).await.unwrap();
    assert!(store.get(tool.id).await.unwrap().is_none());
}

#[tokio::test]
async fn semantic_scores_order_and_clamp() {
    let Some(store) = store().await else { return };
    let close = store
        .insert(&draft(&unique("pg-close"), "close"), Some(unit_vector(0)))
        .await
        .unwrap();
    let far = store
        .insert(&draft(&unique("pg-far"), "far"), Some(unit_vector(1)))
        .await
        .unwrap();

    let hits = store
        .semantic_search(
            &unit_vector(0),
            &SearchOptions {
                limit: 50,
                min_similarity: 0.0,
                category: Some("integration".into()),
                active_only: true,
            },
        )
        .await
        .unwrap();

    let position_close = hits.iter().position(|h| h.tool.id == close.id);
    let position_far = hits.iter().position(|h| h.tool.id == far.id);
    assert!(position_close.unwrap() < position_far.unwrap());
    for hit in &hits {
        assert!((0.0..=1.0).contains(&hit.score), "score {} out of range", hit.score);
    }
    for window in hits.windows(2) {
        assert!(window[0].score >= window[1].score);
    }

    store.delete(close.id).await.unwrap();
    store.delete(far.id).await.unwrap();
}

#[tokio::test]
async fn min_similarity_excludes_orthogonal_rows() {
    let Some(store) = store().await else { return };
    let kept = store
        .insert(&draft(&unique("pg-kept"), "kept"), Some(unit_vector(0)))
        .await
        .unwrap();
    let dropped = store
        .insert(&draft(&unique("pg-dropped"), "dropped"), Some(unit_vector(1)))
        .await
        .unwrap();

    let hits = store
        .semantic_search(
            &unit_vector(0),
            &SearchOptions {
                limit: 50,
                min_similarity: 0.5,
                category: Some("integration".into()),
                active_only: true,
            },
        )
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.tool.id == kept.id));
    assert!(hits.iter().all(|h| h.tool.id != dropped.id));

    store.delete(kept.id).await.unwrap();
    store.delete(dropped.id).await.unwrap();
}

#[tokio::test]
async fn lexical_search_ranks_matching_text() {
    let Some(store) = store().await else { return };
    let name = unique("pg-lexical");
    let tool = store
        .insert(
            &draft(&name, "performs quantile regression over tabular data"),
            Some(unit_vector(2)),
        )
        .await
        .unwrap();

    let hits = store
        .lexical_search(
            "quantile regression",
            &SearchOptions {
                limit: 10,
                min_similarity: 0.0,
                category: Some("integration".into()),
                active_only: true,
            },
        )
        .await
        .unwrap();
    let hit = hits.iter().find(|h| h.tool.id == tool.id).expect("must match");
    assert!(hit.score > 0.0 && hit.score <= 1.0);

    store.delete(tool.id).await.unwrap();
}

#[tokio::test]
async fn duplicate_name_maps_to_conflict() {
    let Some(store) = store().await else { return };
    let name = unique("pg-conflict");
    let first = store.insert(&draft(&name, "first"), None).await.unwrap();
    let err = store.insert(&draft(&name, "second"), None).await.unwrap_err();
    assert!(matches!(err, toolhub_core::ToolhubError::NameConflict(_)));
    store.delete(first.id).await.unwrap();
}

#[tokio::test]
async fn executions_survive_tool_deletion() {
    let Some(store) = store().await else { return };
    let name = unique("pg-audit");
    let tool = store.insert(&draft(&name, "audited"), None).await.unwrap();

    let execution = store
        .record_execution(&ExecutionRecord {
            tool_id: Some(tool.id),
            tool_name: name.clone(),
            arguments: json!({"n": 1}),
            output: Some(json!({"ok": true})),
            status: ExecutionStatus::Success,
            error_message: None,
            duration_ms: 12,
            started_at: time::OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();
    assert!(execution.id > 0);

    let stats = store.execution_stats(tool.id).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.succeeded, 1);

    // Hard delete; the audit row must remain, detached from the tool.
    store.delete(tool.id).await.unwrap();
    let orphaned: i64 = sqlx::query_scalar(
        "select count(*) from tool_executions where tool_name = $1 and tool_id is null",
    )
    .bind(&name)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(orphaned, 1);
}

#[tokio::test]
async fn listing_filters_inactive_rows() {
    let Some(store) = store().await else { return };
    let name = unique("pg-listing");
    let tool = store.insert(&draft(&name, "listed"), None).await.unwrap();
    store.set_active(tool.id, false).await.unwrap();

    let (active, _) = store
        .list(
            &ToolFilter {
                category: Some("integration".into()),
                active_only: true,
            },
            500,
            0,
        )
        .await
        .unwrap();
    assert!(active.iter().all(|t| t.id != tool.id));

    let (all, _) = store
        .list(
            &ToolFilter {
                category: Some("integration".into()),
                active_only: false,
            },
            500,
            0,
        )
        .await
        .unwrap();
    assert!(all.iter().any(|t| t.id == tool.id));

    store.delete(tool.id).await.unwrap();
}
