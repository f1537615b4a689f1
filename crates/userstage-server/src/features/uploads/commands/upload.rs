use axum::body::Bytes;
use axum::extract::Multipart;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;
use userstage_common::types::{parse_batch, BatchError, StagingId, UserRecord};
use userstage_common::PipelineError;

use crate::config::TimeoutConfig;
use crate::error::AppError;
use crate::features::PipelineState;
use crate::queue::NotificationPublisher;
use crate::staging::StagingStore;

pub const ACCEPTED_MESSAGE: &str = "JSON received and is being processed";
pub const PENDING_MESSAGE: &str = "JSON received and staged; replication has not been scheduled";

/// Where the uploaded JSON came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadSource {
    /// Multipart `file` field
    File,
    /// Multipart `json_data` text field
    Inline,
    /// Raw request body
    Body,
}

#[derive(Debug, Clone)]
pub struct UploadCommand {
    pub source: UploadSource,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub id: StagingId,
    /// False when the batch is staged but its replication message could not be published
    pub replication_pending: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no data provided")]
    NoData,
    #[error("provide either a file or json_data, not both")]
    Ambiguous,
    #[error("invalid multipart body: {0}")]
    Multipart(String),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("staging store unavailable: {0}")]
    StagingUnavailable(PipelineError),
    #[error("upload task failed: {0}")]
    Task(String),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Batch(BatchError::Validation(violations)) => {
                AppError::Validation(violations)
            },
            UploadError::NoData
            | UploadError::Ambiguous
            | UploadError::Multipart(_)
            | UploadError::Batch(_) => AppError::BadRequest(err.to_string()),
            UploadError::StagingUnavailable(ref detail) => {
                AppError::unavailable("staging store", detail)
            },
            UploadError::Task(detail) => AppError::Internal(detail),
        }
    }
}

impl UploadCommand {
    pub fn from_body(payload: Bytes) -> Self {
        Self {
            source: UploadSource::Body,
            payload,
        }
    }

    /// Collect the `file` or `json_data` field; exactly one must be present
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, UploadError> {
        let mut file = None;
        let mut inline = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| UploadError::Multipart(e.body_text()))?
        {
            let name = field.name().map(str::to_owned);
            let slot = match name.as_deref() {
                Some("file") => &mut file,
                Some("json_data") => &mut inline,
                _ => continue,
            };

            let bytes = field
                .bytes()
                .await
                .map_err(|e| UploadError::Multipart(e.body_text()))?;
            if !bytes.is_empty() {
                *slot = Some(bytes);
            }
        }

        match (file, inline) {
            (Some(_), Some(_)) => Err(UploadError::Ambiguous),
            (Some(payload), None) => Ok(Self {
                source: UploadSource::File,
                payload,
            }),
            (None, Some(payload)) => Ok(Self {
                source: UploadSource::Inline,
                payload,
            }),
            (None, None) => Err(UploadError::NoData),
        }
    }
}

/// Validate, stage, and publish one uploaded batch
///
/// Validation happens before anything is written. Staging and publishing run on
/// their own task: once staging starts, the pair completes even if the client
/// goes away.
#[tracing::instrument(skip(state, command), fields(source = ?command.source, bytes = command.payload.len()))]
pub async fn handle(
    state: &PipelineState,
    command: UploadCommand,
) -> Result<UploadResponse, UploadError> {
    if command.payload.iter().all(u8::is_ascii_whitespace) {
        return Err(UploadError::NoData);
    }

    let records = parse_batch(&command.payload)?;

    let task = tokio::spawn(stage_and_publish(
        state.staging.clone(),
        state.publisher.clone(),
        records,
        state.timeouts,
    ));

    task.await.map_err(|e| UploadError::Task(e.to_string()))?
}

async fn stage_and_publish(
    staging: Arc<dyn StagingStore>,
    publisher: NotificationPublisher,
    records: Vec<UserRecord>,
    timeouts: TimeoutConfig,
) -> Result<UploadResponse, UploadError> {
    let staging_id = match timeout(timeouts.staging, staging.stage(&records)).await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => return Err(UploadError::StagingUnavailable(e.into())),
        Err(_) => {
            let err = PipelineError::timed_out("staging write", timeouts.staging);
            return Err(UploadError::StagingUnavailable(err));
        },
    };

    let publish_error = match timeout(timeouts.publish, publisher.publish(&staging_id)).await {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(PipelineError::from(e)),
        Err(_) => Some(PipelineError::timed_out("publish", timeouts.publish)),
    };

    let replication_pending = match publish_error {
        None => {
            tracing::info!(staging_id = %staging_id, records = records.len(), "Upload accepted");
            true
        },
        Some(error) => {
            tracing::warn!(
                staging_id = %staging_id,
                category = error.category(),
                error = %error,
                "Batch staged but replication message not published; republish via POST /replications/{}",
                staging_id
            );
            false
        },
    };

    Ok(UploadResponse {
        message: if replication_pending {
            ACCEPTED_MESSAGE.to_string()
        } else {
            PENDING_MESSAGE.to_string()
        },
        id: staging_id,
        replication_pending,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::MemoryUserRepository;
    use crate::queue::MemoryReplicationQueue;
    use crate::staging::{MemoryStagingStore, StagingError};
    use async_trait::async_trait;
    use std::time::Duration;
    use userstage_common::types::StagingDocument;

    /// Staging store whose writes land only after `delay`
    #[derive(Clone)]
    struct SlowStagingStore {
        inner: MemoryStagingStore,
        delay: Duration,
    }

    #[async_trait]
    impl StagingStore for SlowStagingStore {
        async fn stage(&self, records: &[UserRecord]) -> Result<StagingId, StagingError> {
            tokio::time::sleep(self.delay).await;
            self.inner.stage(records).await
        }

        async fn fetch(&self, id: &StagingId) -> Result<StagingDocument, StagingError> {
            self.inner.fetch(id).await
        }

        async fn contains(&self, id: &StagingId) -> Result<bool, StagingError> {
            self.inner.contains(id).await
        }
    }

    fn slow_state(
        delay: Duration,
        staging_timeout: Duration,
    ) -> (PipelineState, MemoryStagingStore, MemoryReplicationQueue) {
        let staging = MemoryStagingStore::new();
        let queue = MemoryReplicationQueue::new();
        let state = PipelineState::new(
            Arc::new(SlowStagingStore {
                inner: staging.clone(),
                delay,
            }),
            Arc::new(queue.clone()),
            Arc::new(MemoryUserRepository::new()),
            TimeoutConfig {
                staging: staging_timeout,
                ..TimeoutConfig::default()
            },
        );
        (state, staging, queue)
    }

    fn state() -> (PipelineState, MemoryStagingStore, MemoryReplicationQueue) {
        let staging = MemoryStagingStore::new();
        let queue = MemoryReplicationQueue::new();
        let state = PipelineState::new(
            Arc::new(staging.clone()),
            Arc::new(queue.clone()),
            Arc::new(MemoryUserRepository::new()),
            TimeoutConfig::default(),
        );
        (state, staging, queue)
    }

    fn body(json: &str) -> UploadCommand {
        UploadCommand::from_body(Bytes::from(json.to_string()))
    }

    #[tokio::test]
    async fn test_stages_then_publishes() {
        let (state, staging, queue) = state();

        let response = handle(&state, body(r#"[{"name":"Ana","email":"ana@example.com","age":35}]"#))
            .await
            .unwrap();

        assert!(response.replication_pending);
        assert_eq!(response.message, ACCEPTED_MESSAGE);
        assert_eq!(staging.fetch(&response.id).await.unwrap().records.len(), 1);
        assert_eq!(queue.published().await, vec![response.id]);
    }

    #[tokio::test]
    async fn test_invalid_batch_writes_nothing() {
        let (state, staging, queue) = state();

        let err = handle(&state, body(r#"[{"name":"","email":"x","age":-1}]"#))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Batch(BatchError::Validation(_))));
        assert!(staging.is_empty().await);
        assert!(queue.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_body_is_no_data() {
        let (state, _, _) = state();
        assert!(matches!(handle(&state, body("  \n")).await, Err(UploadError::NoData)));
    }

    #[tokio::test]
    async fn test_staging_outage_publishes_nothing() {
        let (state, staging, queue) = state();
        staging.set_unavailable(true);

        let err = handle(&state, body(r#"[{"name":"Ana","email":"a@b","age":1}]"#))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::StagingUnavailable(_)));
        assert!(queue.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_staged_batch() {
        let (state, staging, queue) = state();
        queue.set_unavailable(true);

        let response = handle(&state, body(r#"[{"name":"Ana","email":"a@b","age":1}]"#))
            .await
            .unwrap();

        assert!(!response.replication_pending);
        assert_eq!(response.message, PENDING_MESSAGE);
        assert!(staging.contains(&response.id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_staging_timeout_is_retryable_and_publishes_nothing() {
        let (state, staging, queue) = slow_state(Duration::from_millis(200), Duration::from_millis(20));

        let err = handle(&state, body(r#"[{"name":"Ana","email":"a@b","age":1}]"#))
            .await
            .unwrap_err();

        match &err {
            UploadError::StagingUnavailable(cause) => assert!(cause.is_retryable()),
            other => panic!("expected staging unavailable, got {:?}", other),
        }
        assert!(err.to_string().contains("staging write timed out after 20ms"));
        assert!(staging.is_empty().await);
        assert!(queue.published().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_still_stages_and_publishes() {
        let (state, staging, queue) = slow_state(Duration::from_millis(100), Duration::from_secs(5));

        // The caller gives up while the write is in flight
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            handle(&state, body(r#"[{"name":"Ana","email":"a@b","age":1}]"#)),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(staging.len().await, 1);
        let published = queue.published().await;
        assert_eq!(published.len(), 1);
        assert!(staging.contains(&published[0]).await.unwrap());
    }
}
