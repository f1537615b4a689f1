//! Per-message replication: staged document in, relational rows out
//!
//! A delivery moves through `Received → Fetching → Transforming → Inserting →
//! Acknowledged`, or ends in `Failed` where it is either released for a delayed
//! retry or dead-lettered. The queue is settled only after the relational commit,
//! so a crash at any point leads to redelivery rather than loss, and the batch
//! marker turns that redelivery into a no-op.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use userstage_common::types::{ReplicatedUserRow, StagingDocument};
use userstage_common::PipelineError;

use super::RetryPolicy;
use crate::config::Config;
use crate::db::{ReplicationOutcome, UserRepository};
use crate::queue::{DeadLetterReason, Delivery, QueueError, ReplicationQueue};
use crate::staging::{StagingError, StagingStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    Fetching,
    Transforming,
    Inserting,
    Acknowledged,
    Failed,
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MessageState::Received => "received",
            MessageState::Fetching => "fetching",
            MessageState::Transforming => "transforming",
            MessageState::Inserting => "inserting",
            MessageState::Acknowledged => "acknowledged",
            MessageState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Replicated { rows: usize },
    AlreadyReplicated,
    DeadLettered { reason: DeadLetterReason },
    Retrying { attempt: u32, delay: Duration },
}

/// Consumer tuning; defaults match the service configuration defaults
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub retry: RetryPolicy,
    pub visibility_timeout: Duration,
    pub receive_timeout: Duration,
    pub fetch_timeout: Duration,
    pub insert_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            visibility_timeout: Duration::from_secs(60),
            receive_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(5),
            insert_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsumerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.replication.retry_policy(),
            visibility_timeout: config.queue.visibility_timeout,
            receive_timeout: config.timeouts.receive,
            fetch_timeout: config.timeouts.staging,
            insert_timeout: config.timeouts.relational,
        }
    }
}

/// A classified replication failure
///
/// `reason` is only used when `error` is not retryable.
struct Failure {
    error: PipelineError,
    reason: DeadLetterReason,
}

impl Failure {
    fn new(error: impl Into<PipelineError>, reason: DeadLetterReason) -> Self {
        Self {
            error: error.into(),
            reason,
        }
    }

    fn invalid_document(detail: String) -> Self {
        Self::new(
            PipelineError::permanent(detail),
            DeadLetterReason::InvalidStagedDocument,
        )
    }

    fn retryable(error: impl Into<PipelineError>) -> Self {
        Self::new(error, DeadLetterReason::RetriesExhausted)
    }
}

pub struct ReplicationConsumer {
    staging: Arc<dyn StagingStore>,
    queue: Arc<dyn ReplicationQueue>,
    users: Arc<dyn UserRepository>,
    settings: ConsumerSettings,
}

impl ReplicationConsumer {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        queue: Arc<dyn ReplicationQueue>,
        users: Arc<dyn UserRepository>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            staging,
            queue,
            users,
            settings,
        }
    }

    /// Receive at most one message and process it
    pub async fn poll_once(&self, consumer_id: &str) -> Result<Option<MessageOutcome>, QueueError> {
        let receive = self
            .queue
            .receive(consumer_id, self.settings.visibility_timeout);

        let delivery = match timeout(self.settings.receive_timeout, receive).await {
            Ok(result) => result?,
            Err(_) => {
                let err = PipelineError::timed_out("queue receive", self.settings.receive_timeout);
                return Err(QueueError::Unavailable(err.to_string()));
            },
        };

        match delivery {
            Some(delivery) => self.process(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Replicate one delivery and settle it on the queue
    #[tracing::instrument(
        skip(self, delivery),
        fields(
            message_id = delivery.message_id,
            staging_id = %delivery.staging_id,
            attempt = delivery.attempts,
        )
    )]
    pub async fn process(&self, delivery: Delivery) -> Result<MessageOutcome, QueueError> {
        debug!(state = %MessageState::Received, "Message received");

        if self.settings.retry.exceeded(delivery.attempts) {
            let detail = format!(
                "delivered {} times without being settled (limit {})",
                delivery.attempts, self.settings.retry.max_attempts
            );
            return self
                .dead_letter(&delivery, DeadLetterReason::RetriesExhausted, &detail)
                .await;
        }

        match self.replicate(&delivery).await {
            Ok(outcome) => {
                tolerate_lost_lease(self.queue.ack(&delivery).await)?;
                debug!(state = %MessageState::Acknowledged, "Message acknowledged");
                Ok(outcome)
            },
            Err(Failure { error, reason }) if !error.is_retryable() => {
                self.dead_letter(&delivery, reason, &error.to_string()).await
            },
            Err(Failure { error, .. }) => {
                let detail = error.to_string();
                if self.settings.retry.should_dead_letter(delivery.attempts) {
                    return self
                        .dead_letter(&delivery, DeadLetterReason::RetriesExhausted, &detail)
                        .await;
                }

                let delay = self.settings.retry.delay_for(delivery.attempts);
                warn!(
                    state = %MessageState::Failed,
                    category = error.category(),
                    error = %detail,
                    retry_in_ms = delay.as_millis() as u64,
                    "Replication failed, will retry"
                );
                tolerate_lost_lease(self.queue.nack(&delivery, &detail, delay).await)?;

                Ok(MessageOutcome::Retrying {
                    attempt: delivery.attempts,
                    delay,
                })
            },
        }
    }

    async fn replicate(&self, delivery: &Delivery) -> Result<MessageOutcome, Failure> {
        let staging_id = &delivery.staging_id;

        debug!(state = %MessageState::Fetching, "Fetching staged document");
        let fetch = self.staging.fetch(staging_id);
        let document = match timeout(self.settings.fetch_timeout, fetch).await {
            Err(_) => {
                return Err(Failure::retryable(PipelineError::timed_out(
                    "staging fetch",
                    self.settings.fetch_timeout,
                )));
            },
            Ok(Err(err)) => {
                let reason = match err {
                    StagingError::NotFound(_) => DeadLetterReason::StagingNotFound,
                    _ => DeadLetterReason::InvalidStagedDocument,
                };
                return Err(Failure::new(err, reason));
            },
            Ok(Ok(document)) => document,
        };

        debug!(state = %MessageState::Transforming, records = document.records.len(), "Transforming records");
        let rows = transform(&document)?;

        debug!(state = %MessageState::Inserting, rows = rows.len(), "Inserting rows");
        let insert = self.users.replicate_batch(staging_id, &rows);
        match timeout(self.settings.insert_timeout, insert).await {
            Err(_) => Err(Failure::retryable(PipelineError::timed_out(
                "relational insert",
                self.settings.insert_timeout,
            ))),
            Ok(Err(err)) => Err(Failure::retryable(err)),
            Ok(Ok(ReplicationOutcome::Inserted { rows })) => {
                info!(rows, "Batch replicated");
                Ok(MessageOutcome::Replicated { rows })
            },
            Ok(Ok(ReplicationOutcome::AlreadyReplicated)) => {
                info!("Batch was already replicated by an earlier delivery");
                Ok(MessageOutcome::AlreadyReplicated)
            },
        }
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<MessageOutcome, QueueError> {
        error!(
            state = %MessageState::Failed,
            reason = %reason,
            error = %detail,
            "Message dead-lettered"
        );
        tolerate_lost_lease(self.queue.dead_letter(delivery, reason, detail).await)?;
        Ok(MessageOutcome::DeadLettered { reason })
    }
}

/// A lost lease means another consumer owns the message now; that is not an error here
fn tolerate_lost_lease(result: Result<(), QueueError>) -> Result<(), QueueError> {
    match result {
        Err(QueueError::LeaseLost { .. }) => {
            warn!("Lease expired before the message was settled; it will be redelivered");
            Ok(())
        },
        other => other,
    }
}

/// Map every staged record to a relational row, re-validating along the way
fn transform(document: &StagingDocument) -> Result<Vec<ReplicatedUserRow>, Failure> {
    if document.records.is_empty() {
        return Err(Failure::invalid_document(format!(
            "staged document {} has no records",
            document.staging_id
        )));
    }

    document
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            record
                .validate()
                .map(|()| ReplicatedUserRow::from_record(record, &document.staging_id))
                .map_err(|err| {
                    Failure::invalid_document(format!("record {} failed validation: {}", index, err))
                })
        })
        .collect()
}
