//! CRUD orchestration over the tool store.
//!
//! Every mutation is a single store transaction. Registration embeds before
//! insert so a failed embedding never leaves a partial row; updates that touch
//! the embedding text re-embed with the merged field values.

use std::sync::Arc;

use toolhub_core::{
    tool::embedding_text, validation, ExecutionRecord, ExecutionStats, Result, Tool, ToolDraft,
    ToolExecution, ToolhubError, ToolPatch,
};

use crate::embedding::EmbeddingService;
use crate::store::{EmbeddingUpdate, RegistryStats, SearchHit, ToolFilter, ToolStore};

pub struct ToolRegistry {
    store: Arc<dyn ToolStore>,
    embeddings: Arc<EmbeddingService>,
}

fn embed_failure(err: ToolhubError) -> ToolhubError {
    match err {
        shape @ ToolhubError::EmbeddingShape(_) => shape,
        other => ToolhubError::EmbeddingFailed(other.to_string()),
    }
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn ToolStore>, embeddings: Arc<EmbeddingService>) -> Self {
        Self { store, embeddings }
    }

    pub fn store(&self) -> Arc<dyn ToolStore> {
        self.store.clone()
    }

    /// Registers a new tool. With `auto_embed`, the embedding is generated
    /// first and persisted together with the row; an embedding failure aborts
    /// the registration entirely.
    pub async fn register(&self, draft: ToolDraft, auto_embed: bool) -> Result<Tool> {
        let draft = normalize_draft(draft)?;
        if self.store.get_by_name(&draft.name).await?.is_some() {
            return Err(ToolhubError::NameConflict(draft.name));
        }

        let embedding = if auto_embed {
            let text = embedding_text(
                &draft.name,
                &draft.description,
                &draft.category,
                &draft.tags,
            );
            Some(self.embeddings.embed(&text).await.map_err(embed_failure)?)
        } else {
            None
        };

        let tool = self.store.insert(&draft, embedding).await?;
        tracing::info!(
            target: "toolhub::registry",
            tool = %tool.name,
            id = tool.id,
            category = %tool.category,
            embedded = tool.embedding.is_some(),
            "registered tool"
        );
        Ok(tool)
    }

    /// Applies a partial update. Changing any of name, description, category,
    /// or tags regenerates the embedding from the merged values.
    pub async fn update(&self, id: i64, patch: ToolPatch) -> Result<Tool> {
        let patch = normalize_patch(patch)?;
        let current = self.store.get(id).await?.ok_or_else(|| ToolhubError::NotFound {
            name: format!("id {id}"),
            suggestions: Vec::new(),
        })?;

        let embedding = if patch.touches_embedding_text() {
            let text = embedding_text(
                patch.name.as_deref().unwrap_or(&current.name),
                patch.description.as_deref().unwrap_or(&current.description),
                patch.category.as_deref().unwrap_or(&current.category),
                patch.tags.as_deref().unwrap_or(&current.tags),
            );
            EmbeddingUpdate::Set(self.embeddings.embed(&text).await.map_err(embed_failure)?)
        } else {
            EmbeddingUpdate::Keep
        };

        self.store.update(id, &patch, embedding).await
    }

    /// Regenerates the embedding from the tool's current fields.
    pub async fn reindex(&self, id: i64) -> Result<()> {
        let tool = self.store.get(id).await?.ok_or_else(|| ToolhubError::NotFound {
            name: format!("id {id}"),
            suggestions: Vec::new(),
        })?;
        let vector = self
            .embeddings
            .embed(&tool.embedding_text())
            .await
            .map_err(embed_failure)?;
        self.store.set_embedding(id, Some(&vector)).await
    }

    pub async fn deactivate(&self, id: i64) -> Result<Tool> {
        self.store.set_active(id, false).await
    }

    pub async fn activate(&self, id: i64) -> Result<Tool> {
        self.store.set_active(id, true).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Tool>> {
        self.store.get(id).await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Tool>> {
        self.store.get_by_name(name).await
    }

    pub async fn list(
        &self,
        filter: &ToolFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Tool>, i64)> {
        self.store.list(filter, limit, offset).await
    }

    pub async fn find_similar(
        &self,
        tool_id: i64,
        limit: usize,
        exclude_self: bool,
    ) -> Result<Vec<SearchHit>> {
        self.store
            .find_similar(tool_id, limit.clamp(1, 100), exclude_self, 0.0)
            .await
    }

    pub async fn record_execution(&self, record: &ExecutionRecord) -> Result<ToolExecution> {
        self.store.record_execution(record).await
    }

    pub async fn execution_stats(&self, tool_id: i64) -> Result<ExecutionStats> {
        self.store.execution_stats(tool_id).await
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        self.store.stats().await
    }

    pub async fn list_categories(&self) -> Result<Vec<String>> {
        self.store.list_categories().await
    }
}

fn normalize_draft(mut draft: ToolDraft) -> Result<ToolDraft> {
    draft.name = validation::validate_name(&draft.name)?;
    if draft.description.trim().is_empty() {
        return Err(ToolhubError::InvalidInput(
            "description cannot be empty".into(),
        ));
    }
    draft.category = validation::validate_category(&draft.category)?;
    draft.tags = validation::validate_tags(&draft.tags)?;
    validation::validate_json_schema(&draft.input_schema)?;
    if let Some(schema) = &draft.output_schema {
        validation::validate_json_schema(schema)?;
    }
    if draft.version.trim().is_empty() {
        draft.version = "1.0.0".to_string();
    }
    Ok(draft)
}

fn normalize_patch(mut patch: ToolPatch) -> Result<ToolPatch> {
    if let Some(name) = &patch.name {
        patch.name = Some(validation::validate_name(name)?);
    }
    if let Some(description) = &patch.description {
        if description.trim().is_empty() {
            return Err(ToolhubError::InvalidInput(
                "description cannot be empty".into(),
            ));
        }
    }
    if let Some(category) = &patch.category {
        patch.category = Some(validation::validate_category(category)?);
    }
    if let Some(tags) = &patch.tags {
        patch.tags = Some(validation::validate_tags(tags)?);
    }
    if let Some(schema) = &patch.input_schema {
        validation::validate_json_schema(schema)?;
    }
    if let Some(schema) = &patch.output_schema {
        validation::validate_json_schema(schema)?;
    }
    Ok(patch)
}
