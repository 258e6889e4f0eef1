//! Storage port for the tool catalog.
//!
//! Both adapters promise the same observable contract:
//!
//! - similarity scores are `1 − cosine_distance` clamped to `[0, 1]`;
//! - lexical ranks are normalized to `[0, 1]`;
//! - result ordering is score-descending with ties broken by `id` ascending;
//! - `min_similarity` in hybrid search applies to the *semantic* component,
//!   never the blended score.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

use toolhub_core::{
    ExecutionRecord, ExecutionStats, Result, Tool, ToolDraft, ToolExecution, ToolPatch,
};

/// Filters shared by list and search operations.
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub category: Option<String>,
    pub active_only: bool,
}

/// Knobs for a single search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum semantic similarity; rows below are excluded.
    pub min_similarity: f32,
    pub category: Option<String>,
    pub active_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            min_similarity: 0.0,
            category: None,
            active_only: true,
        }
    }
}

/// One search result row with its component scores.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub tool: Tool,
    /// The score the row was ranked by (semantic, lexical, or blended).
    pub score: f32,
    /// Semantic component, when the row has an embedding.
    pub semantic: Option<f32>,
    /// Lexical component, when the row matched the text query.
    pub lexical: Option<f32>,
}

/// What to do with the stored embedding during an update.
#[derive(Debug, Clone)]
pub enum EmbeddingUpdate {
    /// Leave the stored vector untouched.
    Keep,
    /// Null the vector out (e.g. after a dimension change).
    Clear,
    /// Replace the vector.
    Set(Vec<f32>),
}

/// Catalog totals for the `tools://stats` resource.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total: i64,
    pub active: i64,
    pub indexed: i64,
    pub by_category: BTreeMap<String, i64>,
    pub by_implementation: BTreeMap<String, i64>,
}

#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Inserts a new tool, optionally with its embedding, in one transaction.
    /// Fails with `NameConflict` if the name is taken.
    async fn insert(&self, draft: &ToolDraft, embedding: Option<Vec<f32>>) -> Result<Tool>;

    /// Applies a partial update and the embedding action atomically; bumps
    /// `updated_at`. Fails with `NotFound`.
    async fn update(&self, id: i64, patch: &ToolPatch, embedding: EmbeddingUpdate) -> Result<Tool>;

    /// Flips the soft-delete flag. Fails with `NotFound`.
    async fn set_active(&self, id: i64, active: bool) -> Result<Tool>;

    /// Hard delete. Execution rows survive with `tool_id` nulled.
    async fn delete(&self, id: i64) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<Tool>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Tool>>;

    /// Pages tools ordered by name; returns the page and the filtered total.
    async fn list(&self, filter: &ToolFilter, limit: i64, offset: i64)
        -> Result<(Vec<Tool>, i64)>;

    /// Writes the vector column; validates length against the store dimension.
    async fn set_embedding(&self, id: i64, embedding: Option<&[f32]>) -> Result<()>;

    /// Tools with no embedding yet, for batch re-indexing.
    async fn tools_without_embeddings(&self, limit: i64) -> Result<Vec<Tool>>;

    /// Pure vector search over rows with embeddings.
    async fn semantic_search(&self, query: &[f32], opts: &SearchOptions)
        -> Result<Vec<SearchHit>>;

    /// Full-text rank over name, description, category, and tags.
    async fn lexical_search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>>;

    /// Blended search: candidates are the union of the top-K of each leg
    /// (K ≥ limit); final score is `alpha · semantic + (1 − alpha) · lexical`;
    /// `opts.min_similarity` filters the semantic component.
    async fn hybrid_search(
        &self,
        query_text: &str,
        query_vec: &[f32],
        alpha: f32,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>>;

    /// Semantic neighbors of a stored tool, using its own embedding.
    async fn find_similar(
        &self,
        tool_id: i64,
        limit: usize,
        exclude_self: bool,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>>;

    async fn count_indexed(&self, active_only: bool) -> Result<i64>;

    async fn list_categories(&self) -> Result<Vec<String>>;

    async fn stats(&self) -> Result<RegistryStats>;

    /// Appends one execution audit row.
    async fn record_execution(&self, record: &ExecutionRecord) -> Result<ToolExecution>;

    async fn execution_stats(&self, tool_id: i64) -> Result<ExecutionStats>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> Result<()>;
}

/// Clamps a raw `1 − distance` similarity into `[0, 1]`.
pub(crate) fn clamp_score(score: f32) -> f32 {
    score.clamp(0.0, 1.0)
}

/// Sorts hits by score descending, ties by id ascending, then truncates.
pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.tool.id.cmp(&b.tool.id))
    });
    hits.truncate(limit);
    hits
}
