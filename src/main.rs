use std::sync::Arc;

use anyhow::Context;

use article_analyzer::api;
use article_analyzer::config::PipelineConfig;
use article_analyzer::pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    let port = config.http_port;
    let shutdown_timeout = config.shutdown_timeout;

    eprintln!("📝 Article Analyzer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Cache: {}", config.cache.strategy);
    eprintln!(
        "   Worker pool: {}",
        if config.pool.enabled {
            format!("{} workers", config.pool.size)
        } else {
            "disabled".to_string()
        }
    );
    eprintln!("   API: http://0.0.0.0:{}/api/jobs\n", port);

    let pipeline = Arc::new(Pipeline::new(config).await?);
    pipeline.start()?;

    let app = api::routes(Arc::clone(&pipeline));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    tracing::info!(port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    let report = pipeline.shutdown(shutdown_timeout).await;
    tracing::info!(
        drained = report.drained,
        queued = report.queued,
        "Shutdown complete"
    );
    Ok(())
}
