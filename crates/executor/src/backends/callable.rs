//! In-process callable backend.
//!
//! Tools of kind `PYTHON_CALLABLE` address a function in a table populated
//! explicitly at startup; the dotted path in `implementation_code` is a
//! lookup key, never a dynamic import. A module prefix must be allow-listed
//! before lookup, and the deny-list overrides the allow-list.

use serde_json::Value;
use std::collections::HashMap;

use toolhub_core::{Result, Tool, ToolhubError};

/// Callables take the argument object and return a JSON result.
pub type CallableFn = fn(&Value) -> Result<Value>;

/// Module prefixes that are never executable, regardless of the allow-list.
pub const DENIED_MODULE_PREFIXES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "pickle",
    "importlib",
    "builtins",
];

/// Allow/deny policy applied to the module part of a callable path.
#[derive(Debug, Clone)]
pub struct CallablePolicy {
    /// Prefixes a callable path must start with (e.g. `tools.`).
    pub allowed_prefixes: Vec<String>,
    /// Prefixes rejected even when allow-listed.
    pub denied_prefixes: Vec<String>,
    pub enabled: bool,
}

impl Default for CallablePolicy {
    fn default() -> Self {
        Self {
            allowed_prefixes: vec!["tools.".to_string()],
            denied_prefixes: DENIED_MODULE_PREFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            enabled: true,
        }
    }
}

pub struct CallableRegistry {
    table: HashMap<String, CallableFn>,
    policy: CallablePolicy,
}

fn is_valid_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|s| {
            !s.is_empty()
                && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

fn prefix_matches(path: &str, prefix: &str) -> bool {
    // "os" matches "os" and "os.path.join" but not "osquery.run".
    path == prefix
        || path.starts_with(&format!("{}.", prefix.trim_end_matches('.')))
        || (prefix.ends_with('.') && path.starts_with(prefix))
}

impl CallableRegistry {
    pub fn new(policy: CallablePolicy) -> Self {
        Self {
            table: HashMap::new(),
            policy,
        }
    }

    /// Registers a callable under its dotted path. Startup-time only.
    pub fn register(&mut self, path: &str, callable: CallableFn) {
        self.table.insert(path.to_string(), callable);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Applies the policy to a callable path without executing it.
    pub fn check_path(&self, path: &str) -> Result<()> {
        if !self.policy.enabled {
            return Err(ToolhubError::ExecutorDisabled("callable".into()));
        }
        if !is_valid_path(path) {
            return Err(ToolhubError::InvalidInput(format!(
                "'{path}' is not a valid module path (expected e.g. 'tools.math.calculator')"
            )));
        }
        if self
            .policy
            .denied_prefixes
            .iter()
            .any(|p| prefix_matches(path, p))
        {
            return Err(ToolhubError::InvalidInput(format!(
                "module '{path}' is denied for execution"
            )));
        }
        if !self
            .policy
            .allowed_prefixes
            .iter()
            .any(|p| prefix_matches(path, p))
        {
            return Err(ToolhubError::InvalidInput(format!(
                "module '{path}' is not in the allowed module list"
            )));
        }
        Ok(())
    }

    /// Resolves and runs the callable for a `PYTHON_CALLABLE` tool.
    pub async fn execute(&self, tool: &Tool, arguments: &Value) -> Result<Value> {
        let path = tool
            .implementation_code
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ToolhubError::InvalidInput(format!("tool '{}' has no callable path", tool.name))
            })?;
        self.check_path(path)?;
        let callable = *self.table.get(path).ok_or_else(|| {
            ToolhubError::InvalidInput(format!("no callable registered under '{path}'"))
        })?;
        // Callables may do CPU-bound work (data transforms); keep them off
        // the scheduler.
        let arguments = arguments.clone();
        tokio::task::spawn_blocking(move || callable(&arguments))
            .await
            .map_err(|e| ToolhubError::Backend(format!("callable panicked: {e}")))?
    }
}
