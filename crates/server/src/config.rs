//! Environment-variable configuration.
//!
//! Every value is parsed and validated at boot; an invalid variable aborts
//! startup with a message naming it. Defaults follow the deployment manifests
//! this service ships with.

use std::net::SocketAddr;
use std::time::Duration;

use toolhub_core::{Result, ToolhubError};
use toolhub_discovery::McpSourceConfig;

/// Deployment profile; `production` tightens CORS validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Settings {
    // Application
    pub bind_addr: SocketAddr,
    pub app_env: AppEnv,
    pub log_level: String,

    // Database. `None` selects the in-memory store (development only).
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub db_max_overflow: u32,
    pub db_acquire_timeout: Duration,
    pub db_recycle: Duration,

    // Embedding service
    pub embedding_endpoint_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    /// Single source of truth for the vector dimension; the store verifies
    /// the live column against it at startup.
    pub embedding_dimension: usize,
    /// Opt-in: on a dimension mismatch, rebuild the vector column (nulls all
    /// embeddings) instead of refusing to start.
    pub embedding_dimension_rebuild: bool,
    pub embedding_timeout: Duration,
    pub embedding_max_retries: u32,
    pub embedding_cache_enabled: bool,
    pub embedding_cache_size: u64,

    // LLM gateway
    pub gateway_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub gateway_default_model: String,

    // Discovery
    pub mcp_sources: Vec<McpSourceConfig>,
    pub discovery_auto_sync: bool,
    pub discovery_source_timeout: Duration,
    pub gateway_sync_enabled: bool,

    // Retrieval
    pub default_similarity_threshold: f32,
    pub default_search_limit: usize,
    pub use_hybrid_search: bool,
    pub hybrid_vector_weight: f32,
    pub find_tool_timeout: Duration,

    // Execution
    pub call_tool_timeout: Duration,
    pub call_tool_timeout_ceiling: Duration,
    pub python_executor_enabled: bool,
    pub python_allowed_modules: Vec<String>,

    // Summarization
    pub summarization_enabled: bool,
    pub summarization_model: Option<String>,
    pub summarization_default_max_tokens: usize,
    pub summarization_timeout: Duration,
    pub summarization_max_input_chars: usize,

    // Security
    pub api_key: Option<String>,
    pub cors_origins: Vec<String>,
    pub max_body_bytes: usize,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ToolhubError::Config(format!("{name}: cannot parse '{raw}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match var(name) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ToolhubError::Config(format!(
                "{name}: expected a boolean, got '{other}'"
            ))),
        },
        None => Ok(default),
    }
}

fn parse_secs(name: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(parse_var(name, default_secs)?))
}

fn parse_url(name: &str, raw: &str) -> Result<String> {
    reqwest::Url::parse(raw)
        .map_err(|e| ToolhubError::Config(format!("{name}: invalid URL '{raw}': {e}")))?;
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_list(name: &str) -> Vec<String> {
    var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Settings {
    /// Loads and validates settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let app_env = match var("APP_ENV").as_deref() {
            None | Some("development") | Some("dev") => AppEnv::Development,
            Some("production") | Some("prod") => AppEnv::Production,
            Some(other) => {
                return Err(ToolhubError::Config(format!(
                    "APP_ENV: expected 'development' or 'production', got '{other}'"
                )))
            }
        };

        let bind_addr: SocketAddr = parse_var("BIND_ADDR", "0.0.0.0:8000".parse().map_err(
            |e| ToolhubError::Config(format!("default bind addr: {e}")),
        )?)?;

        let embedding_endpoint_url = var("EMBEDDING_ENDPOINT_URL")
            .ok_or_else(|| ToolhubError::Config("EMBEDDING_ENDPOINT_URL is required".into()))?;
        let embedding_endpoint_url =
            parse_url("EMBEDDING_ENDPOINT_URL", &embedding_endpoint_url)?;

        let database_url = var("DATABASE_URL");
        if database_url.is_none() && app_env == AppEnv::Production {
            return Err(ToolhubError::Config(
                "DATABASE_URL is required in production".into(),
            ));
        }

        let gateway_url = match var("GATEWAY_URL") {
            Some(raw) => Some(parse_url("GATEWAY_URL", &raw)?),
            None => None,
        };

        let mcp_sources: Vec<McpSourceConfig> = match var("MCP_SOURCES") {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| ToolhubError::Config(format!("MCP_SOURCES: invalid JSON: {e}")))?,
            None => Vec::new(),
        };
        for source in &mcp_sources {
            parse_url("MCP_SOURCES", &source.url)?;
            if source.name.trim().is_empty() {
                return Err(ToolhubError::Config("MCP_SOURCES: source with empty name".into()));
            }
        }

        let default_similarity_threshold: f32 = parse_var("DEFAULT_SIMILARITY_THRESHOLD", 0.7)?;
        if !(0.0..=1.0).contains(&default_similarity_threshold) {
            return Err(ToolhubError::Config(
                "DEFAULT_SIMILARITY_THRESHOLD must be between 0 and 1".into(),
            ));
        }
        let hybrid_vector_weight: f32 = parse_var("HYBRID_VECTOR_WEIGHT", 0.7)?;
        if !(0.0..=1.0).contains(&hybrid_vector_weight) {
            return Err(ToolhubError::Config(
                "HYBRID_VECTOR_WEIGHT must be between 0 and 1".into(),
            ));
        }

        let embedding_dimension: usize = parse_var("EMBEDDING_DIMENSION", 1024)?;
        if embedding_dimension == 0 || embedding_dimension > 16_000 {
            return Err(ToolhubError::Config(
                "EMBEDDING_DIMENSION must be between 1 and 16000".into(),
            ));
        }

        let cors_origins = parse_list("CORS_ORIGINS");
        if app_env == AppEnv::Production && cors_origins.iter().any(|o| o == "*") {
            return Err(ToolhubError::Config(
                "CORS_ORIGINS: wildcard origin is not allowed in production".into(),
            ));
        }

        let gateway_sync_enabled = parse_bool("GATEWAY_SYNC_ENABLED", false)?;
        if gateway_sync_enabled && gateway_url.is_none() {
            return Err(ToolhubError::Config(
                "GATEWAY_SYNC_ENABLED requires GATEWAY_URL".into(),
            ));
        }

        let mut python_allowed_modules = parse_list("PYTHON_ALLOWED_MODULES");
        if python_allowed_modules.is_empty() {
            python_allowed_modules.push("tools.".to_string());
        }

        let call_tool_timeout = parse_secs("CALL_TOOL_TIMEOUT_SECS", 30)?;
        let call_tool_timeout_ceiling = parse_secs("CALL_TOOL_TIMEOUT_CEILING_SECS", 300)?;
        if call_tool_timeout > call_tool_timeout_ceiling {
            return Err(ToolhubError::Config(
                "CALL_TOOL_TIMEOUT_SECS exceeds CALL_TOOL_TIMEOUT_CEILING_SECS".into(),
            ));
        }

        Ok(Self {
            bind_addr,
            app_env,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            database_url,
            db_pool_size: parse_var("DB_POOL_SIZE", 5)?,
            db_max_overflow: parse_var("DB_MAX_OVERFLOW", 10)?,
            db_acquire_timeout: parse_secs("DB_ACQUIRE_TIMEOUT_SECS", 30)?,
            db_recycle: parse_secs("DB_RECYCLE_SECS", 1_800)?,
            embedding_endpoint_url,
            embedding_api_key: var("EMBEDDING_API_KEY"),
            embedding_model: var("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text-v1.5".to_string()),
            embedding_dimension,
            embedding_dimension_rebuild: parse_bool("EMBEDDING_DIMENSION_REBUILD", false)?,
            embedding_timeout: parse_secs("EMBEDDING_TIMEOUT_SECS", 30)?,
            embedding_max_retries: parse_var("EMBEDDING_MAX_RETRIES", 3)?,
            embedding_cache_enabled: parse_bool("EMBEDDING_CACHE_ENABLED", true)?,
            embedding_cache_size: parse_var("EMBEDDING_CACHE_SIZE", 1_024)?,
            gateway_url,
            gateway_api_key: var("GATEWAY_API_KEY"),
            gateway_default_model: var("GATEWAY_DEFAULT_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            mcp_sources,
            discovery_auto_sync: parse_bool("DISCOVERY_AUTO_SYNC", false)?,
            discovery_source_timeout: parse_secs("DISCOVERY_SOURCE_TIMEOUT_SECS", 30)?,
            gateway_sync_enabled,
            default_similarity_threshold,
            default_search_limit: parse_var("DEFAULT_SEARCH_LIMIT", 5)?,
            use_hybrid_search: parse_bool("USE_HYBRID_SEARCH", true)?,
            hybrid_vector_weight,
            find_tool_timeout: parse_secs("FIND_TOOL_TIMEOUT_SECS", 10)?,
            call_tool_timeout,
            call_tool_timeout_ceiling,
            python_executor_enabled: parse_bool("PYTHON_EXECUTOR_ENABLED", true)?,
            python_allowed_modules,
            summarization_enabled: parse_bool("SUMMARIZATION_ENABLED", true)?,
            summarization_model: var("SUMMARIZATION_MODEL"),
            summarization_default_max_tokens: parse_var("SUMMARIZATION_DEFAULT_MAX_TOKENS", 1_000)?,
            summarization_timeout: parse_secs("SUMMARIZATION_TIMEOUT_SECS", 30)?,
            summarization_max_input_chars: parse_var("SUMMARIZATION_MAX_INPUT_CHARS", 50_000)?,
            api_key: var("API_KEY"),
            cors_origins,
            max_body_bytes: parse_var("MAX_BODY_BYTES", 1_048_576)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolhub_test_utils::{env_guard, set_env_var};

    #[test]
    fn minimal_environment_loads_with_defaults() {
        let _serial = env_guard();
        let _url = set_env_var(
            "EMBEDDING_ENDPOINT_URL",
            Some("http://embedder:8080/v1/embeddings"),
        );
        let _env = set_env_var("APP_ENV", None);
        let _db = set_env_var("DATABASE_URL", None);
        let _dim = set_env_var("EMBEDDING_DIMENSION", None);

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.embedding_dimension, 1024);
        assert_eq!(settings.default_search_limit, 5);
        assert!(settings.use_hybrid_search);
        assert_eq!(settings.call_tool_timeout, Duration::from_secs(30));
        assert_eq!(settings.python_allowed_modules, vec!["tools.".to_string()]);
    }

    #[test]
    fn missing_embedding_endpoint_fails_loudly() {
        let _serial = env_guard();
        let _url = set_env_var("EMBEDDING_ENDPOINT_URL", None);

        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_ENDPOINT_URL"));
    }

    #[test]
    fn bad_numeric_value_names_the_variable() {
        let _serial = env_guard();
        let _url = set_env_var(
            "EMBEDDING_ENDPOINT_URL",
            Some("http://embedder:8080/v1/embeddings"),
        );
        let _dim = set_env_var("EMBEDDING_DIMENSION", Some("not-a-number"));

        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_DIMENSION"));
    }

    #[test]
    fn production_rejects_wildcard_cors_and_missing_db() {
        let _serial = env_guard();
        let _url = set_env_var(
            "EMBEDDING_ENDPOINT_URL",
            Some("http://embedder:8080/v1/embeddings"),
        );
        let _env = set_env_var("APP_ENV", Some("production"));
        let _db = set_env_var("DATABASE_URL", Some("postgres://db/toolhub"));
        let _cors = set_env_var("CORS_ORIGINS", Some("*"));

        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("CORS_ORIGINS"));

        let _cors = set_env_var("CORS_ORIGINS", None);
        let _db = set_env_var("DATABASE_URL", None);
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn mcp_sources_parse_from_json() {
        let _serial = env_guard();
        let _url = set_env_var(
            "EMBEDDING_ENDPOINT_URL",
            Some("http://embedder:8080/v1/embeddings"),
        );
        let _env = set_env_var("APP_ENV", None);
        let _db = set_env_var("DATABASE_URL", None);
        let _sources = set_env_var(
            "MCP_SOURCES",
            Some(r#"[{"name": "files", "url": "http://files:9000/mcp", "category": "filesystem"}]"#),
        );

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.mcp_sources.len(), 1);
        assert_eq!(settings.mcp_sources[0].name, "files");
        assert_eq!(settings.mcp_sources[0].category.as_deref(), Some("filesystem"));
    }

    #[test]
    fn timeout_over_ceiling_is_rejected() {
        let _serial = env_guard();
        let _url = set_env_var(
            "EMBEDDING_ENDPOINT_URL",
            Some("http://embedder:8080/v1/embeddings"),
        );
        let _env = set_env_var("APP_ENV", None);
        let _db = set_env_var("DATABASE_URL", None);
        let _t = set_env_var("CALL_TOOL_TIMEOUT_SECS", Some("600"));
        let _c = set_env_var("CALL_TOOL_TIMEOUT_CEILING_SECS", Some("300"));

        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains("CALL_TOOL_TIMEOUT_SECS"));
    }
}
