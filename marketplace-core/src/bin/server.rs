//! Marketplace server binary
//!
//! Opens the marketplace ledger from environment configuration and keeps it
//! running until interrupted. Intended as a host process for embedding
//! front-ends; the core API is the [`marketplace_core::Marketplace`] type.

use anyhow::Context;
use marketplace_core::{AccountId, Config, Marketplace};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    let admin = std::env::var("MARKETPLACE_ADMIN").unwrap_or_else(|_| "operator".to_string());

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = %config.data_dir.display(),
        "Starting marketplace server"
    );

    let marketplace = Marketplace::open(config, AccountId::new(admin))
        .await
        .context("failed to open marketplace")?;

    tracing::info!(admin = %marketplace.admin(), "Marketplace server running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    marketplace.shutdown().await.context("shutdown failed")?;
    tracing::info!("Marketplace server stopped");

    Ok(())
}
