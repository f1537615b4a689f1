//! Process wiring shared by the server and the standalone worker binary

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::db::{self, PgUserRepository};
use crate::features::PipelineState;
use crate::queue::PgReplicationQueue;
use crate::replication::{ConsumerSettings, ReplicationConsumer, ReplicationWorkerPool};
use crate::staging::S3StagingStore;
use crate::storage::Storage;

/// Connected production adapters
pub struct Services {
    pub pool: PgPool,
    pub state: PipelineState,
    pub consumer: Arc<ReplicationConsumer>,
}

impl Services {
    /// Connect to PostgreSQL and the staging bucket, migrating and creating as needed
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::create_pool(&config.database)
            .await
            .context("Failed to connect to PostgreSQL")?;
        db::run_migrations(&pool).await?;
        db::health_check(&pool).await?;
        info!("Database migrations completed");

        let storage = Storage::new(config.storage.clone());
        storage
            .ensure_bucket()
            .await
            .with_context(|| format!("Failed to prepare bucket {}", storage.bucket()))?;

        let staging = Arc::new(S3StagingStore::new(storage));
        let queue = Arc::new(PgReplicationQueue::new(pool.clone(), config.queue.name.clone()));
        let users = Arc::new(PgUserRepository::new(pool.clone()));

        let consumer = Arc::new(ReplicationConsumer::new(
            staging.clone(),
            queue.clone(),
            users.clone(),
            ConsumerSettings::from_config(config),
        ));
        let state = PipelineState::new(staging, queue, users, config.timeouts);

        Ok(Self {
            pool,
            state,
            consumer,
        })
    }

    /// Worker pool over this process's consumer
    pub fn worker_pool(&self, config: &Config) -> ReplicationWorkerPool {
        ReplicationWorkerPool::new(
            self.consumer.clone(),
            config.replication.workers,
            config.queue.poll_interval,
        )
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

/// Wait for background work to finish, giving up after `limit`
pub async fn drain<F>(what: &str, work: F, limit: Duration)
where
    F: std::future::Future,
{
    info!("Waiting up to {} seconds for {} to finish", limit.as_secs(), what);
    if tokio::time::timeout(limit, work).await.is_err() {
        tracing::warn!("{} did not finish within {} seconds", what, limit.as_secs());
    }
}
