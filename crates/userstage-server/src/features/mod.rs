//! Feature modules implementing the ingest API
//!
//! Each feature is a vertical slice with its own commands, queries, and routes.
//!
//! # Features
//!
//! - **uploads**: accept a user batch, stage it, and schedule its replication
//! - **users**: list replicated users
//! - **replication**: inspect dead-lettered replication messages
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions

pub mod replication;
pub mod uploads;
pub mod users;

use axum::Router;
use std::sync::Arc;

use crate::config::TimeoutConfig;
use crate::db::UserRepository;
use crate::queue::{NotificationPublisher, ReplicationQueue};
use crate::staging::StagingStore;

/// Shared state for all feature routes
///
/// Every store sits behind a trait object so the same router runs against
/// S3/PostgreSQL in production and in-memory adapters in tests.
#[derive(Clone)]
pub struct PipelineState {
    pub staging: Arc<dyn StagingStore>,
    pub publisher: NotificationPublisher,
    pub queue: Arc<dyn ReplicationQueue>,
    pub users: Arc<dyn UserRepository>,
    pub timeouts: TimeoutConfig,
}

impl PipelineState {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        queue: Arc<dyn ReplicationQueue>,
        users: Arc<dyn UserRepository>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            staging,
            publisher: NotificationPublisher::new(queue.clone()),
            queue,
            users,
            timeouts,
        }
    }
}

/// Creates the feature router
///
/// Routes are mounted at the root:
/// - `POST /upload` - Ingest a user batch
/// - `POST /replications/:staging_id` - Re-schedule replication of a staged batch
/// - `GET /replications/dead-letters` - Dead-lettered messages
/// - `GET /users` - Replicated users
pub fn router(state: PipelineState) -> Router<()> {
    Router::new()
        .merge(uploads::uploads_routes())
        .merge(users::users_routes())
        .merge(replication::replication_routes())
        .with_state(state)
}
