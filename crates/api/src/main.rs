use std::sync::Arc;

use anyhow::Context;

use mediaproc_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mediaproc_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let services = mediaproc_api::app::services::build_services(&config)?;
    let app = mediaproc_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
