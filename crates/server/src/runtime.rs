//! Startup sequence and graceful shutdown.
//!
//! Boot order: configuration → tracing → service graph (schema applied and
//! dimension verified) → builtin seeding → optional one-shot discovery →
//! transport. `TOOLHUB_TRANSPORT=stdio` serves MCP over stdio instead of the
//! combined HTTP server.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::app::ToolService;
use crate::config::Settings;
use crate::http_transport;

/// Synchronous entry point used by the CLI binary.
pub fn run() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("building the tokio runtime")?;
    runtime.block_on(run_async())
}

async fn run_async() -> Result<()> {
    let settings = Settings::from_env().map_err(|e| anyhow!("{e}"))?;
    init_tracing(&settings.log_level);

    tracing::info!(
        target: "toolhub::runtime",
        bind = %settings.bind_addr,
        dimension = settings.embedding_dimension,
        sources = settings.mcp_sources.len(),
        "starting toolhub"
    );

    let service = ToolService::from_settings(settings).await?;
    service.seed_builtins().await;
    match service.reindex_missing(500).await {
        Ok(0) => {}
        Ok(indexed) => {
            tracing::info!(target: "toolhub::runtime", indexed, "indexed tools missing embeddings")
        }
        Err(e) => {
            tracing::warn!(target: "toolhub::runtime", error = %e, "startup reindex pass failed")
        }
    }

    if service.settings.discovery_auto_sync {
        let discovery = service.discovery.clone();
        tokio::spawn(async move {
            let report = discovery.sync_all().await;
            tracing::info!(
                target: "toolhub::runtime",
                summary = %report.format_summary(),
                "startup discovery sync finished"
            );
        });
    }

    match std::env::var("TOOLHUB_TRANSPORT").as_deref() {
        Ok("stdio") => serve_stdio(service).await,
        _ => http_transport::serve(service, shutdown_signal()).await,
    }
}

async fn serve_stdio(service: ToolService) -> Result<()> {
    tracing::info!(target: "toolhub::runtime", "serving MCP over stdio");
    let running = rmcp::service::serve_server(service, rmcp::transport::stdio())
        .await
        .map_err(|e| anyhow!("failed to start stdio server: {e}"))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow!("stdio server ended: {e}"))?;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // try_init: tests may install their own subscriber first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::warn!(target: "toolhub::runtime", error = %e, "no SIGTERM handler; relying on ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!(target: "toolhub::runtime", "shutdown signal received");
}
