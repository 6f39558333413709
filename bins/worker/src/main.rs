//! Tether attachment worker.
//!
//! Runs the expiration sweeper against the configured database and blob
//! store until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::attachment::{
    AttachmentLifecycle, ExpirationSweeper, LifecycleConfig, SystemClock,
};
use tether_core::storage::{StorageConfig, StorageService};
use tether_db::{AttachmentRepository, connect};
use tether_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_worker=info,tether_core=info,tether_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db = connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    let storage = StorageService::from_config(StorageConfig::from_settings(&config.storage))
        .context("Failed to initialize blob storage")?;
    info!(
        provider = storage.provider_name(),
        bucket = storage.bucket(),
        "Blob storage configured"
    );

    let lifecycle = AttachmentLifecycle::new(
        Arc::new(AttachmentRepository::new(db)),
        Arc::new(storage),
        Arc::new(SystemClock),
        LifecycleConfig::from(&config.attachments),
    );

    if !config.sweeper.enabled {
        info!("Expiration sweeper disabled, nothing to do");
        return Ok(());
    }

    let handle = ExpirationSweeper::new(lifecycle)
        .start(Duration::from_secs(config.sweeper.interval_secs));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    handle.shutdown().await;
    Ok(())
}
