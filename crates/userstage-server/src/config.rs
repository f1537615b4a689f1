//! Configuration management
//!
//! All settings come from the process environment (after loading `.env` with
//! `dotenvy`). Components receive the section they need at construction time and
//! never read the environment themselves.

use std::str::FromStr;
use std::time::Duration;

use userstage_common::PipelineError;

use crate::db::DbConfig;
use crate::replication::RetryPolicy;
use crate::storage::config::StorageConfig;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_S3_BUCKET: &str = "userstage-staging";

pub const DEFAULT_QUEUE_NAME: &str = "user_queue";
pub const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;

pub const DEFAULT_REPLICATION_WORKERS: usize = 2;
pub const DEFAULT_REPLICATION_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_REPLICATION_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_REPLICATION_BACKOFF_MAX_MS: u64 = 60_000;

pub const DEFAULT_STAGING_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RELATIONAL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Complete service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DbConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub replication: ReplicationConfig,
    pub timeouts: TimeoutConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Durable queue settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    /// How long a received message stays hidden before it is redelivered
    pub visibility_timeout: Duration,
    /// Idle wait between empty polls
    pub poll_interval: Duration,
}

/// Replication worker settings
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Run the worker pool inside the HTTP server process
    pub enabled: bool,
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl ReplicationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_base, self.backoff_max)
    }
}

/// Time budgets for every external call
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub staging: Duration,
    pub publish: Duration,
    pub relational: Duration,
    pub receive: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            staging: Duration::from_millis(DEFAULT_STAGING_TIMEOUT_MS),
            publish: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            relational: Duration::from_millis(DEFAULT_RELATIONAL_TIMEOUT_MS),
            receive: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Reads typed values through a key lookup, failing on anything unparseable
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, PipelineError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw.parse().map_err(|e| {
                PipelineError::configuration(format!("{} has invalid value '{}': {}", key, raw, e))
            }),
            None => Ok(default),
        }
    }

    fn millis_or(&self, key: &str, default: u64) -> Result<Duration, PipelineError> {
        self.parse_or(key, default).map(Duration::from_millis)
    }

    fn secs_or(&self, key: &str, default: u64) -> Result<Duration, PipelineError> {
        self.parse_or(key, default).map(Duration::from_secs)
    }
}

impl Config {
    /// Load `.env` (if present) and build the configuration from the environment
    pub fn load() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let database_url = env
            .string("DATABASE_URL")
            .ok_or_else(|| PipelineError::configuration("DATABASE_URL is not set"))?;

        let config = Config {
            server: ServerConfig {
                host: env.string_or("USERSTAGE_HOST", DEFAULT_SERVER_HOST),
                port: env.parse_or("USERSTAGE_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: env
                    .parse_or("USERSTAGE_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
            },
            database: DbConfig {
                url: database_url,
                max_connections: env
                    .parse_or("DB_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                min_connections: env
                    .parse_or("DB_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS)?,
                connect_timeout_secs: env
                    .parse_or("DB_CONNECT_TIMEOUT", DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS)?,
                idle_timeout_secs: Some(
                    env.parse_or("DB_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS)?,
                ),
            },
            storage: StorageConfig {
                endpoint: env.string("S3_ENDPOINT"),
                region: env.string_or("S3_REGION", DEFAULT_S3_REGION),
                bucket: env.string_or("S3_BUCKET", DEFAULT_S3_BUCKET),
                access_key: env
                    .string("S3_ACCESS_KEY")
                    .or_else(|| env.string("AWS_ACCESS_KEY_ID"))
                    .ok_or_else(|| PipelineError::configuration("S3_ACCESS_KEY is not set"))?,
                secret_key: env
                    .string("S3_SECRET_KEY")
                    .or_else(|| env.string("AWS_SECRET_ACCESS_KEY"))
                    .ok_or_else(|| PipelineError::configuration("S3_SECRET_KEY is not set"))?,
                path_style: env.parse_or("S3_PATH_STYLE", false)?,
            },
            queue: QueueConfig {
                name: env.string_or("QUEUE_NAME", DEFAULT_QUEUE_NAME),
                visibility_timeout: env.secs_or(
                    "QUEUE_VISIBILITY_TIMEOUT_SECS",
                    DEFAULT_QUEUE_VISIBILITY_TIMEOUT_SECS,
                )?,
                poll_interval: env
                    .millis_or("QUEUE_POLL_INTERVAL_MS", DEFAULT_QUEUE_POLL_INTERVAL_MS)?,
            },
            replication: ReplicationConfig {
                enabled: env.parse_or("REPLICATION_ENABLED", true)?,
                workers: env.parse_or("REPLICATION_WORKERS", DEFAULT_REPLICATION_WORKERS)?,
                max_attempts: env
                    .parse_or("REPLICATION_MAX_ATTEMPTS", DEFAULT_REPLICATION_MAX_ATTEMPTS)?,
                backoff_base: env.millis_or(
                    "REPLICATION_BACKOFF_BASE_MS",
                    DEFAULT_REPLICATION_BACKOFF_BASE_MS,
                )?,
                backoff_max: env
                    .millis_or("REPLICATION_BACKOFF_MAX_MS", DEFAULT_REPLICATION_BACKOFF_MAX_MS)?,
            },
            timeouts: TimeoutConfig {
                staging: env.millis_or("STAGING_TIMEOUT_MS", DEFAULT_STAGING_TIMEOUT_MS)?,
                publish: env.millis_or("PUBLISH_TIMEOUT_MS", DEFAULT_PUBLISH_TIMEOUT_MS)?,
                relational: env.millis_or("RELATIONAL_TIMEOUT_MS", DEFAULT_RELATIONAL_TIMEOUT_MS)?,
                receive: env.millis_or("RECEIVE_TIMEOUT_MS", DEFAULT_RECEIVE_TIMEOUT_MS)?,
            },
            cors: CorsConfig {
                allowed_origins: env
                    .string_or("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN)
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env.parse_or("CORS_ALLOW_CREDENTIALS", false)?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::configuration(msg));

        if self.server.port == 0 {
            return fail("Server port must be greater than 0".into());
        }

        if self.database.max_connections == 0 {
            return fail("DB_MAX_CONNECTIONS must be greater than 0".into());
        }

        if self.database.min_connections > self.database.max_connections {
            return fail(format!(
                "DB_MIN_CONNECTIONS ({}) cannot be greater than DB_MAX_CONNECTIONS ({})",
                self.database.min_connections, self.database.max_connections
            ));
        }

        if self.storage.bucket.is_empty() {
            return fail("S3_BUCKET cannot be empty".into());
        }

        if self.queue.name.is_empty() {
            return fail("QUEUE_NAME cannot be empty".into());
        }

        if self.replication.max_attempts == 0 {
            return fail("REPLICATION_MAX_ATTEMPTS must be at least 1".into());
        }

        if self.replication.workers == 0 {
            return fail("REPLICATION_WORKERS must be at least 1".into());
        }

        if self.replication.backoff_base > self.replication.backoff_max {
            return fail(format!(
                "REPLICATION_BACKOFF_BASE_MS ({}ms) exceeds REPLICATION_BACKOFF_MAX_MS ({}ms)",
                self.replication.backoff_base.as_millis(),
                self.replication.backoff_max.as_millis()
            ));
        }

        let timeouts = [
            ("STAGING_TIMEOUT_MS", self.timeouts.staging),
            ("PUBLISH_TIMEOUT_MS", self.timeouts.publish),
            ("RELATIONAL_TIMEOUT_MS", self.timeouts.relational),
            ("RECEIVE_TIMEOUT_MS", self.timeouts.receive),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return fail(format!("{} must be greater than 0", key));
        }

        // A message must not reappear while its worker is still inside the time budget
        let processing_budget = self.timeouts.staging + self.timeouts.relational;
        if self.queue.visibility_timeout <= processing_budget {
            return fail(format!(
                "QUEUE_VISIBILITY_TIMEOUT_SECS ({}s) must exceed STAGING_TIMEOUT_MS + RELATIONAL_TIMEOUT_MS ({}ms)",
                self.queue.visibility_timeout.as_secs(),
                processing_budget.as_millis()
            ));
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}
