//! Error taxonomy shared by every toolhub crate.
//!
//! Kinds map onto boundary behavior: input and state errors become 4xx at the
//! HTTP surface with messages safe to return; backend failures become 502/503
//! and expose only a correlation id; timeouts become 504. The mapping itself
//! lives in the server crate.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, ToolhubError>;

#[derive(Debug, Error)]
pub enum ToolhubError {
    /// Malformed caller input (bad name, bad field, unparsable config).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A search query that fails normalization (empty, too long).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Registration under a name that already exists.
    #[error("tool '{0}' is already registered")]
    NameConflict(String),

    /// A supplied input/output schema is not a valid JSON Schema.
    #[error("invalid JSON schema: {0}")]
    SchemaInvalid(String),

    /// Unknown tool; when resolving by name, carries suggestions from a
    /// semantic search of the name itself.
    #[error("tool '{name}' not found")]
    NotFound {
        name: String,
        suggestions: Vec<String>,
    },

    /// The tool exists but is soft-deleted.
    #[error("tool '{0}' is inactive")]
    Inactive(String),

    /// The executor kind needed by this tool is switched off.
    #[error("{0} executor is disabled")]
    ExecutorDisabled(String),

    /// Arguments rejected by the tool's input schema; `path` points into the
    /// failing instance location.
    #[error("argument validation failed at '{path}': {message}")]
    ValidationFailed { path: String, message: String },

    /// The embedding endpoint answered with vectors of the wrong shape.
    #[error("embedding shape error: {0}")]
    EmbeddingShape(String),

    /// Embedding generation failed after retries.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// A backend (DB, embedding endpoint, upstream MCP, gateway) refused or
    /// could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend reached but returned a failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Deadline exceeded at a suspension point.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Database-layer failure.
    #[error("database error: {0}")]
    Database(String),

    /// Invalid configuration detected at boot.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ToolhubError {
    /// True for failures worth retrying at the source that owns them.
    /// Parse and validation errors never retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Timeout(_) | Self::Database(_)
        )
    }

    /// Status recorded in the execution audit row for this failure.
    pub fn execution_status(&self) -> crate::execution::ExecutionStatus {
        match self {
            Self::Timeout(_) => crate::execution::ExecutionStatus::Timeout,
            _ => crate::execution::ExecutionStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;

    #[test]
    fn transient_classification() {
        assert!(ToolhubError::BackendUnavailable("down".into()).is_transient());
        assert!(ToolhubError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!ToolhubError::InvalidInput("bad".into()).is_transient());
        assert!(!ToolhubError::SchemaInvalid("bad".into()).is_transient());
    }

    #[test]
    fn timeout_maps_to_timeout_status() {
        assert_eq!(
            ToolhubError::Timeout(Duration::from_secs(1)).execution_status(),
            ExecutionStatus::Timeout
        );
        assert_eq!(
            ToolhubError::Backend("boom".into()).execution_status(),
            ExecutionStatus::Error
        );
    }
}
