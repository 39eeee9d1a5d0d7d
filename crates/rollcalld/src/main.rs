use std::sync::Arc;

use anyhow::{Context, Result};
use rollcall_core::RollcallService;
use rollcall_store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;

use config::{BusKind, Config};
use dbus_interface::{RollcallInterface, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        threshold = config.match_threshold,
        bus = config.bus.as_str(),
        "rollcalld starting"
    );

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let service = Arc::new(RollcallService::new(store, config.match_threshold));

    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let bus = config.bus;
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallInterface::new(service, config))?
        .build()
        .await
        .with_context(|| format!("failed to claim {BUS_NAME} on the {} bus", bus.as_str()))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
