//! Sync reporting types for discovery runs.

use serde::{Deserialize, Serialize};

/// Outcome of reconciling one upstream source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    /// Tools the upstream returned.
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    /// Non-fatal per-tool errors plus any fatal per-source error.
    pub errors: Vec<String>,
}

impl SourceReport {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    /// True when the source produced no changes and no errors.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deactivated == 0 && self.errors.is_empty()
    }
}

/// Aggregate over one `sync_all` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[must_use]
pub struct SyncReport {
    pub sources: Vec<SourceReport>,
}

impl SyncReport {
    pub fn total_created(&self) -> usize {
        self.sources.iter().map(|s| s.created).sum()
    }

    pub fn total_updated(&self) -> usize {
        self.sources.iter().map(|s| s.updated).sum()
    }

    pub fn total_deactivated(&self) -> usize {
        self.sources.iter().map(|s| s.deactivated).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| !s.errors.is_empty()).count()
    }

    /// One-line summary for logs and the admin response.
    pub fn format_summary(&self) -> String {
        format!(
            "synced {} sources: {} created, {} updated, {} deactivated, {} with errors",
            self.sources.len(),
            self.total_created(),
            self.total_updated(),
            self.total_deactivated(),
            self.failed_sources(),
        )
    }
}
