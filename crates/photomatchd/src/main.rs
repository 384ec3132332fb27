use anyhow::{Context, Result};
use photomatch_core::{MatchConfig, ModelProvisioner, PipelineOptions};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;
mod page;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("photomatchd starting");

    let config = config::Config::load();
    let settings = config
        .onnx_settings()
        .context("failed to locate model cache directory")?;
    let provisioner = ModelProvisioner::onnx(settings);

    // Model download and session setup block; keep them off the runtime.
    let token = tokio::task::spawn_blocking(move || provisioner.ensure_ready())
        .await
        .context("model provisioning task panicked")?
        .context("failed to provision face models")?;
    tracing::info!(ready_at = %token.ready_at(), "face models ready");

    let options = PipelineOptions {
        staging_dir: config.staging_dir.clone(),
        match_config: MatchConfig::default(),
    };
    let engine = engine::spawn_engine(&token, options).context("failed to start engine")?;

    let app = http::router(http::AppState { engine });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "photomatchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("server error")?;

    tracing::info!("photomatchd shutting down");
    Ok(())
}
