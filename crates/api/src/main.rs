use anyhow::Context;

use forgeproc_infra::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgeproc_observability::init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let app = forgeproc_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
