//! Execution audit records.
//!
//! Every terminal `call_tool` outcome appends one row; rows are never updated
//! and survive deletion of the tool they reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::ToolhubError;

/// Terminal outcome of a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ToolhubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            "TIMEOUT" => Ok(Self::Timeout),
            other => Err(ToolhubError::InvalidInput(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// Fields appended when recording an execution.
///
/// `tool_id` is optional because the referenced tool may already have been
/// hard-deleted between lookup and recording; `tool_name` is always kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub tool_id: Option<i64>,
    pub tool_name: String,
    pub arguments: Value,
    #[serde(default)]
    pub output: Option<Value>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub duration_ms: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

/// A persisted execution row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: i64,
    #[serde(flatten)]
    pub record: ExecutionRecord,
}

/// Aggregate execution statistics for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub avg_duration_ms: Option<f64>,
}
