use std::sync::Arc;

use anyhow::Context;

use docproc_infra::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docproc_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        docproc_api::app::services::build_services(&config)
            .await
            .context("failed to start the pipeline")?,
    );
    let pipeline = services.pipeline().clone();
    let app = docproc_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    pipeline.shutdown().await;
    Ok(())
}
