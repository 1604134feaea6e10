use anyhow::Context;
use tracing::info;

use forgejobs_api::app::{self, services};
use forgejobs_infra::{ECHO_JOB_TYPE, EchoHandler, PipelineConfig};
use forgejobs_jobs::WorkHandlerRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgejobs_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;

    let registry = WorkHandlerRegistry::builder()
        .register(ECHO_JOB_TYPE, EchoHandler)?
        .build();

    let runtime = services::start(&config, registry).await?;
    let app = app::build_app(runtime.services.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("http server stopped; draining worker");
    runtime.worker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
