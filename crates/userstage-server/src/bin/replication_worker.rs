//! Standalone replication worker
//!
//! Runs the consumer pool without the HTTP surface, for deployments that scale
//! workers separately from the ingest server.

use anyhow::Result;
use std::time::Duration;
use tracing::info;
use userstage_common::logging::{init_logging, LogConfig};

use userstage_server::{
    app::{self, Services},
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("replication-worker")
        .filter_directives("userstage_server=debug,sqlx=warn")
        .build()
        .with_env_overrides()?;

    let _log_guard = init_logging(&log_config)?;

    let config = Config::load()?;
    let services = Services::connect(&config).await?;

    let pool = services.worker_pool(&config);
    let cancel = pool.cancellation_token();
    let handle = pool.start();

    info!(
        workers = config.replication.workers,
        queue = %config.queue.name,
        "Replication worker running"
    );

    app::shutdown_signal().await;

    cancel.cancel();
    app::drain(
        "replication workers",
        handle,
        Duration::from_secs(config.server.shutdown_timeout_secs),
    )
    .await;

    services.pool.close().await;
    info!("Replication worker shut down");

    Ok(())
}
