//! Embedding generation: HTTP client, bounded cache, and the composed
//! service the registry and retrieval engine talk to.

mod cache;
mod client;

pub use cache::{CacheStats, EmbeddingCache};
pub use client::{HttpEmbedder, HttpEmbedderConfig};

use async_trait::async_trait;
use std::sync::Arc;

use toolhub_core::{Result, ToolhubError};

/// Contract for embedding backends. `embed_batch` preserves input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// True when the backend currently answers embedding requests.
    async fn health(&self) -> bool;

    /// The vector dimension every returned embedding must have.
    fn dimension(&self) -> usize;
}

/// Embedder plus optional cache. Disabling the cache changes no results.
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: Option<EmbeddingCache>,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Option<EmbeddingCache>) -> Self {
        Self { embedder, cache }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(EmbeddingCache::stats)
    }

    pub async fn health(&self) -> bool {
        self.embedder.health().await
    }

    /// Embeds one text, consulting the cache keyed by the exact input string.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ToolhubError::InvalidInput("cannot embed empty text".into()));
        }
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(text).await {
                return Ok(hit.as_ref().clone());
            }
        }
        let vector = self.embedder.embed(text).await?;
        if let Some(cache) = &self.cache {
            cache.insert(text.to_string(), vector.clone()).await;
        }
        Ok(vector)
    }

    /// Embeds many texts, order-preserving; only cache misses reach the
    /// backend, in a single batch call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(ToolhubError::InvalidInput("cannot embed empty text".into()));
        }

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<(usize, String)> = Vec::new();

        if let Some(cache) = &self.cache {
            for (i, text) in texts.iter().enumerate() {
                match cache.get(text).await {
                    Some(hit) => results[i] = Some(hit.as_ref().clone()),
                    None => misses.push((i, text.clone())),
                }
            }
        } else {
            misses = texts.iter().cloned().enumerate().collect();
        }

        if !misses.is_empty() {
            let inputs: Vec<String> = misses.iter().map(|(_, t)| t.clone()).collect();
            let fresh = self.embedder.embed_batch(&inputs).await?;
            for ((slot, text), vector) in misses.into_iter().zip(fresh) {
                if let Some(cache) = &self.cache {
                    cache.insert(text, vector.clone()).await;
                }
                results[slot] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }
}
