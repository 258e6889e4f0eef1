//! Tool registry, embedding pipeline, and retrieval engine.
//!
//! The crate is organized around a storage port:
//!
//! - `store`: the [`ToolStore`] trait plus two adapters: Postgres with the
//!   pgvector extension for production, and an in-memory implementation with
//!   identical contract semantics for tests and database-free development.
//! - `embedding`: the embedding client (OpenAI-compatible endpoint), the
//!   bounded LRU cache, and the [`EmbeddingService`] that composes them.
//! - `registry`: CRUD orchestration; mutations embed on write and serialize
//!   through the store.
//! - `retrieval`: `find_tool` semantics: hybrid or pure-vector search with
//!   semantic-leg thresholding and lexical fallback when the embedder is
//!   unreachable.

pub mod embedding;
pub mod registry;
pub mod retrieval;
pub mod store;

pub use embedding::{
    CacheStats, Embedder, EmbeddingCache, EmbeddingService, HttpEmbedder, HttpEmbedderConfig,
};
pub use registry::ToolRegistry;
pub use retrieval::{FindToolOutcome, FindToolQuery, RankedTool, RetrievalConfig, RetrievalEngine};
pub use store::{
    memory::MemoryToolStore, EmbeddingUpdate, RegistryStats, SearchHit, SearchOptions, ToolFilter,
    ToolStore,
};
pub use store::postgres::PgToolStore;
