//! `find_tool`: natural-language retrieval over the catalog.

use serde::Deserialize;
use std::sync::Arc;

use toolhub_core::{validation, Result, Tool};

use crate::embedding::EmbeddingService;
use crate::store::{SearchOptions, ToolStore};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub default_threshold: f32,
    pub use_hybrid: bool,
    /// α in `α · semantic + (1 − α) · lexical`.
    pub vector_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            default_threshold: 0.7,
            use_hybrid: true,
            vector_weight: 0.7,
        }
    }
}

/// Caller-facing query; unset knobs fall back to configured defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct FindToolQuery {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub use_hybrid: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RankedTool {
    pub tool: Tool,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FindToolOutcome {
    pub results: Vec<RankedTool>,
    /// True when the embedder was unreachable and the engine served a
    /// lexical-only result set.
    pub degraded: bool,
}

pub struct RetrievalEngine {
    store: Arc<dyn ToolStore>,
    embeddings: Arc<EmbeddingService>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn ToolStore>,
        embeddings: Arc<EmbeddingService>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Finds tools matching a natural-language query.
    ///
    /// Hybrid blends vector similarity with lexical rank but thresholds on
    /// the semantic component only, so a strong keyword match cannot smuggle
    /// in a semantically unrelated tool. With no embedded tools in the
    /// catalog the engine searches lexically; with the embedder down it does
    /// the same and flags the response as degraded.
    pub async fn find_tool(&self, query: FindToolQuery) -> Result<FindToolOutcome> {
        let normalized = validation::normalize_query(&query.query)?;
        let limit = query
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, 100);
        let threshold = query
            .threshold
            .unwrap_or(self.config.default_threshold)
            .clamp(0.0, 1.0);
        let use_hybrid = query.use_hybrid.unwrap_or(self.config.use_hybrid);

        let opts = SearchOptions {
            limit,
            min_similarity: threshold,
            category: query.category.clone(),
            active_only: true,
        };

        if self.store.count_indexed(true).await? == 0 {
            let hits = self.store.lexical_search(&normalized, &opts).await?;
            return Ok(into_outcome(hits, false));
        }

        let query_vec = match self.embeddings.embed(&normalized).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(
                    target: "toolhub::retrieval",
                    error = %e,
                    "embedding backend unreachable; serving lexical results"
                );
                let hits = self.store.lexical_search(&normalized, &opts).await?;
                return Ok(into_outcome(hits, true));
            }
        };

        let hits = if use_hybrid {
            self.store
                .hybrid_search(&normalized, &query_vec, self.config.vector_weight, &opts)
                .await?
        } else {
            self.store.semantic_search(&query_vec, &opts).await?
        };
        Ok(into_outcome(hits, false))
    }
}

fn into_outcome(hits: Vec<crate::store::SearchHit>, degraded: bool) -> FindToolOutcome {
    FindToolOutcome {
        results: hits
            .into_iter()
            .map(|h| RankedTool {
                tool: h.tool,
                score: h.score,
            })
            .collect(),
        degraded,
    }
}
