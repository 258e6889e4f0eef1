//! In-memory `ToolStore` adapter.
//!
//! Used by the test suites and as a database-free development mode. Contract
//! semantics (scoring, ordering, filtering, soft delete) match the Postgres
//! adapter; persistence and cross-process visibility do not.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;

use toolhub_core::{
    validation, ExecutionRecord, ExecutionStats, ExecutionStatus, Result, Tool, ToolDraft,
    ToolExecution, ToolhubError, ToolPatch,
};

use super::{
    clamp_score, rank_hits, EmbeddingUpdate, RegistryStats, SearchHit, SearchOptions, ToolFilter,
    ToolStore,
};

#[derive(Default)]
struct Inner {
    tools: BTreeMap<i64, Tool>,
    executions: Vec<ToolExecution>,
    next_tool_id: i64,
    next_execution_id: i64,
}

/// Process-local tool store.
pub struct MemoryToolStore {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl MemoryToolStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner {
                next_tool_id: 1,
                next_execution_id: 1,
                ..Default::default()
            }),
        }
    }

    fn matches(tool: &Tool, filter: &ToolFilter) -> bool {
        if filter.active_only && !tool.is_active {
            return false;
        }
        if let Some(category) = &filter.category {
            if &tool.category != category {
                return false;
            }
        }
        true
    }

    fn search_filter(opts: &SearchOptions) -> ToolFilter {
        ToolFilter {
            category: opts.category.clone(),
            active_only: opts.active_only,
        }
    }
}

/// Cosine similarity of two equal-length vectors, `0.0` for zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalized lexical rank in `[0, 1]`: the fraction of query tokens present
/// in the tool's searchable text.
fn lexical_score(query: &str, tool: &Tool) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc: HashSet<String> = tokenize(&format!(
        "{} {} {} {}",
        tool.name,
        tool.description,
        tool.category,
        tool.tags.join(" ")
    ))
    .into_iter()
    .collect();
    let matched = query_tokens.iter().filter(|t| doc.contains(*t)).count();
    matched as f32 / query_tokens.len() as f32
}

#[async_trait]
impl ToolStore for MemoryToolStore {
    async fn insert(&self, draft: &ToolDraft, embedding: Option<Vec<f32>>) -> Result<Tool> {
        if let Some(vec) = &embedding {
            validation::validate_embedding(self.dimension, vec)?;
        }
        let mut inner = self.inner.write();
        if inner.tools.values().any(|t| t.name == draft.name) {
            return Err(ToolhubError::NameConflict(draft.name.clone()));
        }
        let id = inner.next_tool_id;
        inner.next_tool_id += 1;
        let now = OffsetDateTime::now_utc();
        let tool = Tool {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            category: draft.category.clone(),
            tags: draft.tags.clone(),
            input_schema: draft.input_schema.clone(),
            output_schema: draft.output_schema.clone(),
            implementation_type: draft.implementation_type,
            implementation_code: draft.implementation_code.clone(),
            version: draft.version.clone(),
            embedding,
            is_active: true,
            metadata: draft.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.tools.insert(id, tool.clone());
        Ok(tool)
    }

    async fn update(&self, id: i64, patch: &ToolPatch, embedding: EmbeddingUpdate) -> Result<Tool> {
        if let EmbeddingUpdate::Set(vec) = &embedding {
            validation::validate_embedding(self.dimension, vec)?;
        }
        let mut inner = self.inner.write();
        if let Some(new_name) = &patch.name {
            if inner.tools.values().any(|t| &t.name == new_name && t.id != id) {
                return Err(ToolhubError::NameConflict(new_name.clone()));
            }
        }
        let tool = inner.tools.get_mut(&id).ok_or_else(|| ToolhubError::NotFound {
            name: format!("id {id}"),
            suggestions: Vec::new(),
        })?;
        if let Some(v) = &patch.name {
            tool.name = v.clone();
        }
        if let Some(v) = &patch.description {
            tool.description = v.clone();
        }
        if let Some(v) = &patch.category {
            tool.category = v.clone();
        }
        if let Some(v) = &patch.tags {
            tool.tags = v.clone();
        }
        if let Some(v) = &patch.input_schema {
            tool.input_schema = v.clone();
        }
        if let Some(v) = &patch.output_schema {
            tool.output_schema = Some(v.clone());
        }
        if let Some(v) = patch.implementation_type {
            tool.implementation_type = v;
        }
        if let Some(v) = &patch.implementation_code {
            tool.implementation_code = Some(v.clone());
        }
        if let Some(v) = &patch.version {
            tool.version = v.clone();
        }
        if let Some(v) = &patch.metadata {
            tool.metadata = v.clone();
        }
        match embedding {
            EmbeddingUpdate::Keep => {}
            EmbeddingUpdate::Clear => tool.embedding = None,
            EmbeddingUpdate::Set(vec) => tool.embedding = Some(vec),
        }
        tool.updated_at = OffsetDateTime::now_utc();
        Ok(tool.clone())
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<Tool> {
        let mut inner = self.inner.write();
        let tool = inner.tools.get_mut(&id).ok_or_else(|| ToolhubError::NotFound {
            name: format!("id {id}"),
            suggestions: Vec::new(),
        })?;
        tool.is_active = active;
        tool.updated_at = OffsetDateTime::now_utc();
        Ok(tool.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.tools.remove(&id).is_none() {
            return Err(ToolhubError::NotFound {
                name: format!("id {id}"),
                suggestions: Vec::new(),
            });
        }
        // Mirror ON DELETE SET NULL: audit rows outlive the tool.
        for execution in &mut inner.executions {
            if execution.record.tool_id == Some(id) {
                execution.record.tool_id = None;
            }
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Tool>> {
        Ok(self.inner.read().tools.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Tool>> {
        Ok(self
            .inner
            .read()
            .tools
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn list(
        &self,
        filter: &ToolFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Tool>, i64)> {
        let inner = self.inner.read();
        let mut matched: Vec<Tool> = inner
            .tools
            .values()
            .filter(|t| Self::matches(t, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn set_embedding(&self, id: i64, embedding: Option<&[f32]>) -> Result<()> {
        if let Some(vec) = embedding {
            validation::validate_embedding(self.dimension, vec)?;
        }
        let mut inner = self.inner.write();
        let tool = inner.tools.get_mut(&id).ok_or_else(|| ToolhubError::NotFound {
            name: format!("id {id}"),
            suggestions: Vec::new(),
        })?;
        tool.embedding = embedding.map(<[f32]>::to_vec);
        tool.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn tools_without_embeddings(&self, limit: i64) -> Result<Vec<Tool>> {
        Ok(self
            .inner
            .read()
            .tools
            .values()
            .filter(|t| t.embedding.is_none())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn semantic_search(
        &self,
        query: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validation::validate_embedding(self.dimension, query)?;
        let filter = Self::search_filter(opts);
        let inner = self.inner.read();
        let hits = inner
            .tools
            .values()
            .filter(|t| Self::matches(t, &filter))
            .filter_map(|t| {
                let emb = t.embedding.as_ref()?;
                let score = clamp_score(cosine_similarity(query, emb));
                (score >= opts.min_similarity).then(|| SearchHit {
                    tool: t.clone(),
                    score,
                    semantic: Some(score),
                    lexical: None,
                })
            })
            .collect();
        Ok(rank_hits(hits, opts.limit))
    }

    async fn lexical_search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let filter = Self::search_filter(opts);
        let inner = self.inner.read();
        let hits = inner
            .tools
            .values()
            .filter(|t| Self::matches(t, &filter))
            .filter_map(|t| {
                let score = lexical_score(query, t);
                (score > 0.0).then(|| SearchHit {
                    tool: t.clone(),
                    score,
                    semantic: None,
                    lexical: Some(score),
                })
            })
            .collect();
        Ok(rank_hits(hits, opts.limit))
    }

    async fn hybrid_search(
        &self,
        query_text: &str,
        query_vec: &[f32],
        alpha: f32,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validation::validate_embedding(self.dimension, query_vec)?;
        let filter = Self::search_filter(opts);
        let k = opts.limit.max(20);
        let inner = self.inner.read();

        // Score both legs over rows that can be scored semantically.
        let mut scored: Vec<(i64, f32, f32)> = inner
            .tools
            .values()
            .filter(|t| Self::matches(t, &filter))
            .filter_map(|t| {
                let emb = t.embedding.as_ref()?;
                let semantic = clamp_score(cosine_similarity(query_vec, emb));
                let lexical = lexical_score(query_text, t);
                Some((t.id, semantic, lexical))
            })
            .collect();

        // Candidate set: union of the top-K of each leg.
        let mut candidates: HashSet<i64> = HashSet::new();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.extend(scored.iter().take(k).map(|(id, _, _)| *id));
        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        candidates.extend(
            scored
                .iter()
                .filter(|(_, _, lex)| *lex > 0.0)
                .take(k)
                .map(|(id, _, _)| *id),
        );

        let hits = scored
            .iter()
            .filter(|(id, _, _)| candidates.contains(id))
            .filter(|(_, semantic, _)| *semantic >= opts.min_similarity)
            .map(|(id, semantic, lexical)| SearchHit {
                tool: inner.tools[id].clone(),
                score: alpha * semantic + (1.0 - alpha) * lexical,
                semantic: Some(*semantic),
                lexical: Some(*lexical),
            })
            .collect();
        Ok(rank_hits(hits, opts.limit))
    }

    async fn find_similar(
        &self,
        tool_id: i64,
        limit: usize,
        exclude_self: bool,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>> {
        let embedding = {
            let inner = self.inner.read();
            let tool = inner.tools.get(&tool_id).ok_or_else(|| ToolhubError::NotFound {
                name: format!("id {tool_id}"),
                suggestions: Vec::new(),
            })?;
            tool.embedding.clone().ok_or_else(|| {
                ToolhubError::InvalidInput(format!("tool {tool_id} has no embedding"))
            })?
        };
        let opts = SearchOptions {
            limit: limit + usize::from(exclude_self),
            min_similarity,
            category: None,
            active_only: true,
        };
        let mut hits = self.semantic_search(&embedding, &opts).await?;
        if exclude_self {
            hits.retain(|h| h.tool.id != tool_id);
        }
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count_indexed(&self, active_only: bool) -> Result<i64> {
        Ok(self
            .inner
            .read()
            .tools
            .values()
            .filter(|t| t.embedding.is_some() && (!active_only || t.is_active))
            .count() as i64)
    }

    async fn list_categories(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut categories: Vec<String> = inner
            .tools
            .values()
            .filter(|t| t.is_active)
            .map(|t| t.category.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        categories.sort();
        Ok(categories)
    }

    async fn stats(&self) -> Result<RegistryStats> {
        let inner = self.inner.read();
        let mut stats = RegistryStats::default();
        for tool in inner.tools.values() {
            stats.total += 1;
            if tool.is_active {
                stats.active += 1;
            }
            if tool.embedding.is_some() {
                stats.indexed += 1;
            }
            *stats.by_category.entry(tool.category.clone()).or_default() += 1;
            *stats
                .by_implementation
                .entry(tool.implementation_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn record_execution(&self, record: &ExecutionRecord) -> Result<ToolExecution> {
        let mut inner = self.inner.write();
        let id = inner.next_execution_id;
        inner.next_execution_id += 1;
        let execution = ToolExecution {
            id,
            record: record.clone(),
        };
        inner.executions.push(execution.clone());
        Ok(execution)
    }

    async fn execution_stats(&self, tool_id: i64) -> Result<ExecutionStats> {
        let inner = self.inner.read();
        let mut stats = ExecutionStats::default();
        let mut duration_sum = 0i64;
        for execution in inner
            .executions
            .iter()
            .filter(|e| e.record.tool_id == Some(tool_id))
        {
            stats.total += 1;
            duration_sum += execution.record.duration_ms;
            match execution.record.status {
                ExecutionStatus::Success => stats.succeeded += 1,
                ExecutionStatus::Error | ExecutionStatus::Timeout => stats.failed += 1,
            }
        }
        if stats.total > 0 {
            stats.avg_duration_ms = Some(duration_sum as f64 / stats.total as f64);
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

impl MemoryToolStore {
    /// Executions recorded for a tool, newest last. Test helper.
    pub fn executions_for(&self, tool_name: &str) -> Vec<ToolExecution> {
        self.inner
            .read()
            .executions
            .iter()
            .filter(|e| e.record.tool_name == tool_name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolhub_core::ImplementationType;

    fn draft(name: &str, description: &str, category: &str) -> ToolDraft {
        ToolDraft {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            tags: vec![],
            input_schema: json!({"type": "object"}),
            output_schema: None,
            implementation_type: ImplementationType::PythonCallable,
            implementation_code: None,
            version: "1.0.0".into(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_names() {
        let store = MemoryToolStore::new(3);
        store.insert(&draft("a", "first", "misc"), None).await.unwrap();
        let err = store.insert(&draft("a", "second", "misc"), None).await.unwrap_err();
        assert!(matches!(err, ToolhubError::NameConflict(_)));
    }

    #[tokio::test]
    async fn semantic_scores_are_clamped_and_ordered() {
        let store = MemoryToolStore::new(2);
        let a = store.insert(&draft("a", "a", "misc"), Some(vec![1.0, 0.0])).await.unwrap();
        let b = store.insert(&draft("b", "b", "misc"), Some(vec![0.0, 1.0])).await.unwrap();
        store.insert(&draft("c", "no embedding", "misc"), None).await.unwrap();

        let hits = store
            .semantic_search(&[1.0, 0.1], &SearchOptions { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].tool.id, a.id);
        assert_eq!(hits[1].tool.id, b.id);
        for window in hits.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for hit in &hits {
            assert!((0.0..=1.0).contains(&hit.score));
        }
    }

    #[tokio::test]
    async fn ties_break_by_id_ascending() {
        let store = MemoryToolStore::new(2);
        let first = store.insert(&draft("x", "x", "misc"), Some(vec![1.0, 0.0])).await.unwrap();
        let second = store.insert(&draft("y", "y", "misc"), Some(vec![1.0, 0.0])).await.unwrap();

        let hits = store
            .semantic_search(&[1.0, 0.0], &SearchOptions { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(hits[0].tool.id, first.id);
        assert_eq!(hits[1].tool.id, second.id);
    }

    #[tokio::test]
    async fn hybrid_alpha_extremes_match_single_leg_search() {
        let store = MemoryToolStore::new(2);
        store
            .insert(&draft("calculator", "adds numbers together", "math"), Some(vec![0.9, 0.1]))
            .await
            .unwrap();
        store
            .insert(&draft("weather", "weather forecast lookup", "web"), Some(vec![0.1, 0.9]))
            .await
            .unwrap();

        let opts = SearchOptions { limit: 10, min_similarity: 0.0, ..Default::default() };
        let query_vec = [0.8, 0.2];

        let semantic = store.semantic_search(&query_vec, &opts).await.unwrap();
        let hybrid_sem = store.hybrid_search("adds numbers", &query_vec, 1.0, &opts).await.unwrap();
        let sem_ids: Vec<i64> = semantic.iter().map(|h| h.tool.id).collect();
        let hyb_ids: Vec<i64> = hybrid_sem.iter().map(|h| h.tool.id).collect();
        assert_eq!(sem_ids, hyb_ids);

        let lexical = store.lexical_search("adds numbers", &opts).await.unwrap();
        let hybrid_lex = store.hybrid_search("adds numbers", &query_vec, 0.0, &opts).await.unwrap();
        let lex_ids: Vec<i64> = lexical.iter().map(|h| h.tool.id).collect();
        let hyb_lex_ids: Vec<i64> = hybrid_lex
            .iter()
            .filter(|h| h.score > 0.0)
            .map(|h| h.tool.id)
            .collect();
        assert_eq!(lex_ids, hyb_lex_ids);
    }

    #[tokio::test]
    async fn deactivated_tools_are_hidden_from_default_search() {
        let store = MemoryToolStore::new(2);
        let tool = store
            .insert(&draft("ghost", "invisible tool", "misc"), Some(vec![1.0, 0.0]))
            .await
            .unwrap();
        store.set_active(tool.id, false).await.unwrap();

        let hits = store
            .semantic_search(&[1.0, 0.0], &SearchOptions { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert!(hits.is_empty());

        // Admin reads still see the row.
        assert!(store.get(tool.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_preserves_execution_rows() {
        let store = MemoryToolStore::new(2);
        let tool = store.insert(&draft("t", "t", "misc"), None).await.unwrap();
        store
            .record_execution(&ExecutionRecord {
                tool_id: Some(tool.id),
                tool_name: "t".into(),
                arguments: json!({}),
                output: None,
                status: ExecutionStatus::Success,
                error_message: None,
                duration_ms: 5,
                started_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();

        store.delete(tool.id).await.unwrap();
        let kept = store.executions_for("t");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].record.tool_id, None);
    }
}
