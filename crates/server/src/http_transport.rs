//! Combined HTTP transport: the REST surface plus streamable-HTTP MCP.
//!
//! The MCP endpoint is mounted at `/rpc`; everything else is plain
//! request/response JSON. CORS and the body-size cap apply to both.

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use crate::admin;
use crate::app::ToolService;

/// Builds CORS from the configured origins. Invalid origins are logged and
/// skipped; an empty list disables CORS entirely.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }
    if origins.iter().any(|o| o == "*") {
        // Config validation rejects this in production; in development allow
        // any origin but never credentials.
        tracing::warn!(
            target: "toolhub::http",
            "wildcard CORS origin configured; credentials are disabled"
        );
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }
    let mut valid = Vec::with_capacity(origins.len());
    for origin in origins {
        match origin.parse::<HeaderValue>() {
            Ok(value) => valid.push(value),
            Err(e) => tracing::warn!(
                target: "toolhub::http",
                origin,
                error = %e,
                "ignoring unparsable CORS origin"
            ),
        }
    }
    CorsLayer::new()
        .allow_origin(valid)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    service: ToolService,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = service.settings.bind_addr;
    let cors = build_cors_layer(&service.settings.cors_origins);
    let body_limit = RequestBodyLimitLayer::new(service.settings.max_body_bytes);

    let mcp_service = service.clone();
    let streamable = StreamableHttpService::new(
        move || Ok(mcp_service.clone()),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    let app = admin::router(service)
        .nest_service("/rpc", streamable)
        .layer(cors)
        .layer(body_limit);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(target: "toolhub::http", bind = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}
