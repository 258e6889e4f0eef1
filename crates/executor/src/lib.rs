//! Tool execution: backend routing, deadlines, audit recording, and output
//! summarization.
//!
//! The [`ExecutionRouter`] resolves a tool by name (exact match; a miss
//! carries suggestions from a semantic search of the requested name),
//! validates arguments against the tool's schema, dispatches to the backend
//! matching its implementation kind under a per-call deadline, and appends an
//! audit row for every terminal outcome.

pub mod backends;
pub mod builtins;
pub mod gateway;
pub mod router;
pub mod summarize;

pub use backends::callable::{CallableRegistry, CallablePolicy};
pub use gateway::{GatewayClient, GatewayConfig};
pub use router::{ExecutionOutcome, ExecutionRouter, RouterConfig};
pub use summarize::{
    estimate_tokens, serialize_output, OutputSummarizer, SummarizerConfig, TRUNCATION_MARKER,
};
