//! Userstage server library
//!
//! Accepts batches of user records over HTTP and replicates them into PostgreSQL
//! through a staging bucket and a durable queue.
//!
//! # Overview
//!
//! - **Ingest**: `POST /upload` validates a batch, writes it to S3-compatible
//!   storage, and publishes a replication message naming the staged object
//! - **Replication**: a pool of workers leases messages, fetches the staged batch,
//!   and inserts it in one transaction, acknowledging only after the commit
//! - **Read side**: `GET /users` lists every replicated row
//!
//! A batch is inserted at most once no matter how often its message is delivered.
//! Messages that can never succeed are dead-lettered instead of retried forever.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use userstage_server::{api, config::TimeoutConfig, features::PipelineState};
//! use userstage_server::{db::MemoryUserRepository, queue::MemoryReplicationQueue};
//! use userstage_server::staging::MemoryStagingStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let state = PipelineState::new(
//!         Arc::new(MemoryStagingStore::new()),
//!         Arc::new(MemoryReplicationQueue::new()),
//!         Arc::new(MemoryUserRepository::new()),
//!         TimeoutConfig::default(),
//!     );
//!     let cors = userstage_server::config::CorsConfig {
//!         allowed_origins: vec![],
//!         allow_credentials: false,
//!     };
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, api::create_router(state, &cors)).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod middleware;
pub mod queue;
pub mod replication;
pub mod staging;
pub mod storage;

pub use error::AppError;
