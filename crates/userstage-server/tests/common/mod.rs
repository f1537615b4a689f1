//! Common test utilities for userstage integration tests
//!
//! Two kinds of fixtures live here:
//!
//! - [`MemoryPipeline`]: the full router over in-memory adapters, no services needed
//! - [`TestPostgres`] / [`TestMinio`]: testcontainers-backed PostgreSQL and MinIO
//!   for exercising the production adapters (these tests are `#[ignore]`d and
//!   need a Docker daemon)

#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use testcontainers_modules::postgres::Postgres;
use tower::ServiceExt;
use tracing::{debug, info};
use userstage_server::api::create_router;
use userstage_server::config::{CorsConfig, TimeoutConfig};
use userstage_server::db::MemoryUserRepository;
use userstage_server::features::PipelineState;
use userstage_server::queue::MemoryReplicationQueue;
use userstage_server::replication::{ConsumerSettings, ReplicationConsumer, RetryPolicy};
use userstage_server::staging::MemoryStagingStore;
use userstage_server::storage::{config::StorageConfig, Storage};

/// Default S3 bucket name for tests
pub const DEFAULT_TEST_BUCKET: &str = "userstage-test-staging";

pub const CONSUMER_ID: &str = "test-consumer";

// ============================================================================
// In-memory pipeline
// ============================================================================

/// Router plus handles on every in-memory adapter behind it
pub struct MemoryPipeline {
    pub app: Router,
    pub staging: MemoryStagingStore,
    pub queue: MemoryReplicationQueue,
    pub users: MemoryUserRepository,
    pub consumer: ReplicationConsumer,
}

impl MemoryPipeline {
    pub fn new() -> Self {
        let staging = MemoryStagingStore::new();
        let queue = MemoryReplicationQueue::new();
        let users = MemoryUserRepository::new();

        let state = PipelineState::new(
            Arc::new(staging.clone()),
            Arc::new(queue.clone()),
            Arc::new(users.clone()),
            TimeoutConfig::default(),
        );
        let app = create_router(
            state,
            &CorsConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
                allow_credentials: false,
            },
        );

        let settings = ConsumerSettings {
            retry: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
            ..ConsumerSettings::default()
        };
        let consumer = ReplicationConsumer::new(
            Arc::new(staging.clone()),
            Arc::new(queue.clone()),
            Arc::new(users.clone()),
            settings,
        );

        Self {
            app,
            staging,
            queue,
            users,
            consumer,
        }
    }

    /// Process queued messages until the queue has nothing visible
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while self
            .consumer
            .poll_once(CONSUMER_ID)
            .await
            .expect("queue available")
            .is_some()
        {
            processed += 1;
        }
        processed
    }
}

/// Send a request through the router and decode the JSON body
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    (status, json)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .body(Body::empty())
        .unwrap()
}

/// Multipart form with the given `(field name, optional filename, content)` parts
pub fn post_multipart(uri: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
    const BOUNDARY: &str = "userstage-test-boundary";

    let mut body = String::new();
    for (name, filename, content) in parts {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match filename {
            Some(filename) => {
                body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    name, filename
                ));
                body.push_str("Content-Type: application/json\r\n\r\n");
            },
            None => {
                body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name));
            },
        }
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));

    Request::builder()
        .uri(uri)
        .method("POST")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container with migrations pre-applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        userstage_server::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

/// MinIO (S3-compatible) test container with the staging bucket created
pub struct TestMinio {
    _container: ContainerAsync<GenericImage>,
    storage: Storage,
}

impl TestMinio {
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", "minioadmin")
            .with_env_var("MINIO_ROOT_PASSWORD", "minioadmin")
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;

        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let storage = Storage::new(StorageConfig::for_minio(endpoint, DEFAULT_TEST_BUCKET));
        storage
            .ensure_bucket()
            .await
            .context("Failed to create S3 bucket")?;

        Ok(Self {
            _container: container,
            storage,
        })
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }
}
