//! HTTP client for an OpenAI-compatible embeddings endpoint.
//!
//! Tolerates the three response shapes seen in the wild:
//! `{"data": [{"embedding": [...], "index": 0}]}`, `{"embeddings": [[...]]}`,
//! and a bare `[[...]]`. When the backend refuses array input, falls back to
//! sequential per-text requests, preserving order.

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use toolhub_core::{Result, ToolhubError};

use super::Embedder;

#[derive(Clone)]
pub struct HttpEmbedderConfig {
    /// Full endpoint URL, e.g. `http://embedder:8080/v1/embeddings`.
    pub endpoint_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for HttpEmbedderConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            api_key: None,
            model: "nomic-embed-text-v1.5".to_string(),
            dimension: 1024,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

// The api_key must never reach logs.
impl std::fmt::Debug for HttpEmbedderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedderConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

pub struct HttpEmbedder {
    client: reqwest::Client,
    config: HttpEmbedderConfig,
}

enum RequestFailure {
    /// Worth another attempt: connect errors, timeouts, 5xx, 429.
    Transient(String),
    /// The backend rejected array input; retry per-text.
    BatchRefused(String),
    /// Terminal client error.
    Fatal(String),
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ToolhubError::Config(format!("embedding HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let jitter: f64 = rand::thread_rng().gen_range(0.0..base.max(0.001) / 2.0);
        // Exponential with jitter, capped so three attempts stay under ~10s.
        Duration::from_secs_f64((base * f64::from(1 << attempt) + jitter).min(4.0))
    }

    async fn post_once(&self, input: Value) -> std::result::Result<Value, RequestFailure> {
        let payload = json!({"input": input, "model": self.config.model});
        let mut request = self.client.post(&self.config.endpoint_url).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RequestFailure::Transient(e.to_string())
            } else {
                RequestFailure::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| RequestFailure::Fatal(format!("invalid JSON body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RequestFailure::Transient(format!("{status}: {body}")));
        }
        let lowered = body.to_lowercase();
        if lowered.contains("batch") || lowered.contains("array") {
            return Err(RequestFailure::BatchRefused(format!("{status}: {body}")));
        }
        Err(RequestFailure::Fatal(format!("{status}: {body}")))
    }

    /// Posts with retries; `Ok(None)` signals a batch refusal the caller
    /// should handle by switching to sequential mode.
    async fn post_with_retries(&self, input: Value) -> Result<Option<Value>> {
        let mut last_error = String::new();
        for attempt in 0..self.config.max_retries {
            match self.post_once(input.clone()).await {
                Ok(body) => return Ok(Some(body)),
                Err(RequestFailure::BatchRefused(detail)) => {
                    tracing::debug!(
                        target: "toolhub::embedding",
                        detail = %detail,
                        "backend refused batch input; falling back to sequential requests"
                    );
                    return Ok(None);
                }
                Err(RequestFailure::Fatal(detail)) => {
                    return Err(ToolhubError::EmbeddingFailed(detail));
                }
                Err(RequestFailure::Transient(detail)) => {
                    last_error = detail;
                    if attempt + 1 < self.config.max_retries {
                        let delay = self.backoff_delay(attempt);
                        tracing::debug!(
                            target: "toolhub::embedding",
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "transient embedding failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(ToolhubError::BackendUnavailable(format!(
            "embedding endpoint failed after {} attempts: {last_error}",
            self.config.max_retries
        )))
    }

    fn validate(&self, embeddings: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if embeddings.len() != expected {
            return Err(ToolhubError::EmbeddingShape(format!(
                "expected {expected} embeddings, got {}",
                embeddings.len()
            )));
        }
        for (i, vector) in embeddings.iter().enumerate() {
            if vector.len() != self.config.dimension {
                return Err(ToolhubError::EmbeddingShape(format!(
                    "embedding {i} has dimension {}, expected {}",
                    vector.len(),
                    self.config.dimension
                )));
            }
        }
        Ok(embeddings)
    }

    async fn embed_sequentially(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = self
                .post_with_retries(Value::String(text.clone()))
                .await?
                .ok_or_else(|| {
                    ToolhubError::EmbeddingFailed(
                        "backend refused both array and single-text input".into(),
                    )
                })?;
            let mut vectors = self.validate(parse_embeddings(&body)?, 1)?;
            out.push(vectors.remove(0));
        }
        Ok(out)
    }
}

/// Parses the supported response shapes into row-major vectors, sorting by
/// `index` when the backend provides one.
fn parse_embeddings(body: &Value) -> Result<Vec<Vec<f32>>> {
    if let Some(obj) = body.as_object() {
        if let Some(data) = obj.get("data").and_then(Value::as_array) {
            let mut items: Vec<(Option<i64>, Vec<f32>)> = Vec::with_capacity(data.len());
            for item in data {
                let embedding = item
                    .get("embedding")
                    .ok_or_else(|| shape_err("data item missing 'embedding'"))?;
                items.push((
                    item.get("index").and_then(Value::as_i64),
                    parse_vector(embedding)?,
                ));
            }
            if items.iter().all(|(idx, _)| idx.is_some()) {
                items.sort_by_key(|(idx, _)| *idx);
            }
            return Ok(items.into_iter().map(|(_, v)| v).collect());
        }
        if let Some(embedding) = obj.get("embedding") {
            return Ok(vec![parse_vector(embedding)?]);
        }
        if let Some(embeddings) = obj.get("embeddings").and_then(Value::as_array) {
            return embeddings.iter().map(parse_vector).collect();
        }
        return Err(shape_err("unrecognized response object"));
    }
    if let Some(rows) = body.as_array() {
        return rows.iter().map(parse_vector).collect();
    }
    Err(shape_err("response is neither object nor array"))
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| shape_err("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| shape_err("embedding element is not a number"))
        })
        .collect()
}

fn shape_err(detail: &str) -> ToolhubError {
    ToolhubError::EmbeddingShape(detail.to_string())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_batch(&[text.to_string()]).await?.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let input = Value::Array(texts.iter().cloned().map(Value::String).collect());
        match self.post_with_retries(input).await? {
            Some(body) => self.validate(parse_embeddings(&body)?, texts.len()),
            None => self.embed_sequentially(texts).await,
        }
    }

    async fn health(&self) -> bool {
        self.embed("health check").await.is_ok()
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
