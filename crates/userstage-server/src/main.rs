//! Userstage server - HTTP ingest with in-process replication workers

use anyhow::Result;
use std::{net::SocketAddr, time::Duration};
use tracing::info;
use userstage_common::logging::{init_logging, LogConfig};

use userstage_server::{
    api,
    app::{self, Services},
    config::Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("userstage-server")
        .filter_directives("userstage_server=debug,tower_http=info,sqlx=warn")
        .build()
        .with_env_overrides()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting userstage server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let services = Services::connect(&config).await?;

    let workers = if config.replication.enabled {
        let pool = services.worker_pool(&config);
        let cancel = pool.cancellation_token();
        Some((cancel, pool.start()))
    } else {
        info!("Replication workers disabled (REPLICATION_ENABLED=false)");
        None
    };

    let app = api::create_router(services.state.clone(), &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(app::shutdown_signal())
        .await?;

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    if let Some((cancel, handle)) = workers {
        cancel.cancel();
        app::drain("replication workers", handle, shutdown_timeout).await;
    }

    services.pool.close().await;
    info!("Server shut down gracefully");

    Ok(())
}
