//! Composition root: builds one set of clients and services from settings
//! and exposes the facade operations shared by the REST surface and the MCP
//! handler.

use anyhow::Context;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use toolhub_core::{Result, Tool, ToolhubError};
use toolhub_discovery::{DiscoveryConfig, DiscoveryService};
use toolhub_executor::backends::callable::{CallablePolicy, CallableRegistry};
use toolhub_executor::backends::{build_http_client, BackendContext};
use toolhub_executor::builtins::{builtin_drafts, register_builtins};
use toolhub_executor::{
    ExecutionOutcome, ExecutionRouter, GatewayClient, GatewayConfig, OutputSummarizer,
    RouterConfig, SummarizerConfig,
};
use toolhub_registry::{
    EmbeddingCache, EmbeddingService, FindToolOutcome, FindToolQuery, HttpEmbedder,
    HttpEmbedderConfig, MemoryToolStore, PgToolStore, RetrievalConfig, RetrievalEngine,
    ToolRegistry, ToolStore,
};

use crate::config::Settings;

/// The one service object handed to every transport.
#[derive(Clone)]
pub struct ToolService {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn ToolStore>,
    pub embeddings: Arc<EmbeddingService>,
    pub registry: Arc<ToolRegistry>,
    pub retrieval: Arc<RetrievalEngine>,
    pub router: Arc<ExecutionRouter>,
    pub summarizer: Arc<OutputSummarizer>,
    pub discovery: Arc<DiscoveryService>,
}

impl ToolService {
    /// Builds the full service graph. Connects to Postgres when a database
    /// URL is configured, otherwise runs on the in-memory store.
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn ToolStore> = match &settings.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(settings.db_pool_size + settings.db_max_overflow)
                    .acquire_timeout(settings.db_acquire_timeout)
                    .max_lifetime(settings.db_recycle)
                    .connect(url)
                    .await
                    .context("connecting to the database")?;
                let store = PgToolStore::new(pool, settings.embedding_dimension);
                match store.ensure_schema().await {
                    Ok(()) => {}
                    Err(ToolhubError::Config(detail)) if settings.embedding_dimension_rebuild => {
                        tracing::warn!(
                            target: "toolhub::app",
                            detail = %detail,
                            "dimension mismatch; rebuilding the embedding column"
                        );
                        store
                            .rebuild_dimension(settings.embedding_dimension)
                            .await
                            .context("rebuilding the embedding column")?;
                        store.verify_dimension().await.context("verifying after rebuild")?;
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!(e))
                            .context("applying schema / verifying embedding dimension")
                    }
                }
                Arc::new(store)
            }
            None => {
                tracing::warn!(
                    target: "toolhub::app",
                    "no DATABASE_URL configured; using the in-memory store"
                );
                Arc::new(MemoryToolStore::new(settings.embedding_dimension))
            }
        };
        Self::with_store(settings, store)
    }

    /// Wires the service graph around an existing store. Tests use this with
    /// the in-memory adapter.
    pub fn with_store(settings: Settings, store: Arc<dyn ToolStore>) -> anyhow::Result<Self> {
        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint_url: settings.embedding_endpoint_url.clone(),
            api_key: settings.embedding_api_key.clone(),
            model: settings.embedding_model.clone(),
            dimension: settings.embedding_dimension,
            timeout: settings.embedding_timeout,
            max_retries: settings.embedding_max_retries,
            base_delay: std::time::Duration::from_secs(1),
        })
        .context("building the embedding client")?;
        let cache = settings
            .embedding_cache_enabled
            .then(|| EmbeddingCache::new(settings.embedding_cache_size));
        let embeddings = Arc::new(EmbeddingService::new(Arc::new(embedder), cache));

        let registry = Arc::new(ToolRegistry::new(store.clone(), embeddings.clone()));
        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            embeddings.clone(),
            RetrievalConfig {
                default_limit: settings.default_search_limit,
                default_threshold: settings.default_similarity_threshold,
                use_hybrid: settings.use_hybrid_search,
                vector_weight: settings.hybrid_vector_weight,
            },
        ));

        let http = build_http_client().context("building the backend HTTP client")?;
        let gateway = Arc::new(GatewayClient::new(
            http.clone(),
            GatewayConfig {
                base_url: settings.gateway_url.clone().unwrap_or_default(),
                api_key: settings.gateway_api_key.clone(),
                default_model: settings.gateway_default_model.clone(),
                timeout: settings.summarization_timeout.max(settings.call_tool_timeout),
            },
        ));

        let mut callables = CallableRegistry::new(CallablePolicy {
            allowed_prefixes: settings.python_allowed_modules.clone(),
            enabled: settings.python_executor_enabled,
            ..Default::default()
        });
        register_builtins(&mut callables);

        let router = Arc::new(ExecutionRouter::new(
            store.clone(),
            retrieval.clone(),
            BackendContext {
                http,
                gateway: gateway.clone(),
                callables: Arc::new(callables),
            },
            RouterConfig {
                default_timeout: settings.call_tool_timeout,
                timeout_ceiling: settings.call_tool_timeout_ceiling,
                ..Default::default()
            },
        ));

        let summarizer = Arc::new(OutputSummarizer::new(
            gateway.clone(),
            SummarizerConfig {
                enabled: settings.summarization_enabled,
                model: settings.summarization_model.clone(),
                default_max_tokens: settings.summarization_default_max_tokens,
                max_input_chars: settings.summarization_max_input_chars,
                timeout: settings.summarization_timeout,
            },
        ));

        let discovery = Arc::new(DiscoveryService::new(
            registry.clone(),
            reqwest::Client::new(),
            DiscoveryConfig {
                sources: settings.mcp_sources.clone(),
                gateway_sync_enabled: settings.gateway_sync_enabled,
                gateway_url: settings.gateway_url.clone(),
                gateway_api_key: settings.gateway_api_key.clone(),
                source_timeout: settings.discovery_source_timeout,
                max_retries: 3,
            },
        ));

        Ok(Self {
            settings: Arc::new(settings),
            store,
            embeddings,
            registry,
            retrieval,
            router,
            summarizer,
            discovery,
        })
    }

    /// Seeds the built-in tools that are not yet registered. Embedding
    /// failures are tolerated; the rows land unembedded and are reindexed
    /// later.
    pub async fn seed_builtins(&self) -> usize {
        let mut seeded = 0;
        for draft in builtin_drafts() {
            match self.registry.get_by_name(&draft.name).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "toolhub::app", error = %e, "builtin seeding lookup failed");
                    continue;
                }
            }
            let name = draft.name.clone();
            let result = match self.registry.register(draft.clone(), true).await {
                Err(ToolhubError::EmbeddingFailed(_)) => self.registry.register(draft, false).await,
                other => other,
            };
            match result {
                Ok(_) => seeded += 1,
                Err(e) => {
                    tracing::warn!(target: "toolhub::app", tool = %name, error = %e, "failed to seed builtin")
                }
            }
        }
        if seeded > 0 {
            tracing::info!(target: "toolhub::app", seeded, "seeded builtin tools");
        }
        seeded
    }

    /// Embeds tools that have none yet (seeded or discovered while the
    /// embedder was down), in one batch call. Returns how many were indexed.
    pub async fn reindex_missing(&self, limit: i64) -> Result<usize> {
        let pending = self.store.tools_without_embeddings(limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = pending.iter().map(|t| t.embedding_text()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        let mut indexed = 0;
        for (tool, vector) in pending.iter().zip(vectors) {
            match self.store.set_embedding(tool.id, Some(&vector)).await {
                Ok(()) => indexed += 1,
                Err(e) => {
                    tracing::warn!(
                        target: "toolhub::app",
                        tool = %tool.name,
                        error = %e,
                        "failed to store embedding during reindex"
                    );
                }
            }
        }
        Ok(indexed)
    }

    /// `find_tool` under the configured retrieval deadline.
    pub async fn find_tool(&self, query: FindToolQuery) -> Result<FindToolOutcome> {
        tokio::time::timeout(self.settings.find_tool_timeout, self.retrieval.find_tool(query))
            .await
            .map_err(|_| ToolhubError::Timeout(self.settings.find_tool_timeout))?
    }

    /// `call_tool`; the router owns the per-call deadline.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ExecutionOutcome> {
        self.router.call_tool(name, arguments).await
    }

    /// `call_tool` plus summarization of the output. The returned tuple is
    /// `(outcome, rendered_output, was_summarized)`.
    pub async fn call_tool_summarized(
        &self,
        name: &str,
        arguments: Value,
        max_tokens: Option<usize>,
        hint: Option<&str>,
    ) -> Result<(ExecutionOutcome, String, bool)> {
        let outcome = self.router.call_tool(name, arguments).await?;
        let max_tokens = max_tokens.unwrap_or(self.summarizer.default_max_tokens());
        let rendered = match &outcome.output {
            Some(output) => {
                self.summarizer
                    .summarize_if_needed(output, max_tokens, hint, Some(name))
                    .await
            }
            None => (
                outcome.error.clone().unwrap_or_else(|| "no output".to_string()),
                false,
            ),
        };
        Ok((outcome, rendered.0, rendered.1))
    }

    /// Input/output schema lookup; a miss carries semantic suggestions.
    pub async fn get_tool_schema(&self, name: &str) -> Result<Tool> {
        self.router.resolve(name).await
    }

    /// True when the store answers a ping.
    pub async fn ready(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
