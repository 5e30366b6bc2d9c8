//! Entry point of the Convoy control plane.

use std::sync::Arc;

use tracing::info;

use convoy_common::SystemLookup;
use convoy_mesh::ResourceManager;
use convoy_server::{Configuration, Reconciler, init_logging, load_store, wait_for_shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = init_logging(&configuration.logging_config())?;

    let builder_config = configuration.builder_config();
    let interval = configuration.reconcile_interval();
    info!(
        zone = %builder_config.zone,
        interval_ms = interval.as_millis() as u64,
        mads = configuration.mads_enabled(),
        "Starting Convoy control plane"
    );

    let store = load_store(configuration.resources_path().as_deref()).await?;
    let reconciler = Reconciler::new(
        ResourceManager::new(Arc::new(store)),
        Arc::new(SystemLookup),
        builder_config,
        configuration.mads_enabled(),
    );

    let shutdown = wait_for_shutdown_signal();
    reconciler.run(interval, shutdown.subscribe()).await;

    info!("Convoy control plane stopped");
    Ok(())
}
