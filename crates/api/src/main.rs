use std::sync::Arc;

use anyhow::Context;

use turnstile_api::app::services::{self, Collaborators, Stores};
use turnstile_infra::TurnstileConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    turnstile_observability::init();

    let config = TurnstileConfig::from_env().context("invalid configuration")?;
    if config.allowed_outcomes.is_empty() {
        tracing::warn!("TURNSTILE_ALLOWED_OUTCOMES is empty; every job will end in error");
    }

    let stores = Stores::from_config(&config)?;
    tracing::warn!("no collaborator adapters linked in; jobs will fail until they are supplied");
    let services = Arc::new(services::build_services(
        &config,
        stores,
        Collaborators::unconfigured(),
    )?);

    let app = turnstile_api::app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %listener.local_addr()?, mode = ?config.mode, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    Ok(())
}
