use anyhow::Result;
use facegallery_core::config::BusKind;
use facegallery_core::{Config, GalleryService, ModelLoading};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

use dbus_interface::{GalleryInterface, BUS_NAME, OBJECT_PATH};
use engine::EngineHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        gallery = %config.gallery_dir.display(),
        models = %config.model_dir.display(),
        bus = ?config.bus,
        "facegalleryd starting"
    );

    // Models load before the bus name is claimed so a broken install fails fast.
    let service = GalleryService::from_config(&config, ModelLoading::Eager)?;
    let engine = EngineHandle::new(
        Arc::new(service),
        Duration::from_secs(config.request_timeout_secs),
    );

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, GalleryInterface::new(engine))?
        .build()
        .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facegalleryd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegalleryd shutting down");

    Ok(())
}
