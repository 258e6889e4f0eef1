//! Process-local LRU cache of text → embedding vector.

use moka::future::Cache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache performance counters exposed at `/admin/embeddings/stats`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub capacity: u64,
}

/// Bounded cache keyed by the exact input string.
///
/// Single-process only; no cross-process coherence is promised. Atomic swap
/// per key is all the synchronization retrieval needs.
pub struct EmbeddingCache {
    cache: Cache<String, Arc<Vec<f32>>>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        match self.cache.get(key).await {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, key: String, value: Vec<f32>) {
        self.cache.insert(key, Arc::new(value)).await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_hits_and_misses() {
        let cache = EmbeddingCache::new(8);
        assert!(cache.get("a").await.is_none());
        cache.insert("a".into(), vec![1.0]).await;
        assert_eq!(cache.get("a").await.unwrap().as_ref(), &vec![1.0]);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.capacity, 8);
    }

    #[tokio::test]
    async fn capacity_bounds_entries() {
        let cache = EmbeddingCache::new(2);
        for i in 0..20 {
            cache.insert(format!("key-{i}"), vec![i as f32]).await;
        }
        cache.cache.run_pending_tasks().await;
        assert!(cache.cache.entry_count() <= 2);
    }
}
