//! Durable replication queue and the notification publisher
//!
//! Delivery is at-least-once. A received message is leased to one consumer for a
//! visibility window; if it is neither acknowledged nor released before the
//! window closes it becomes deliverable again, possibly to another consumer.
//! Every delivery increments the message's attempt counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use userstage_common::types::{ReplicationMessage, StagingId};
use userstage_common::PipelineError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryReplicationQueue;
pub use postgres::PgReplicationQueue;

pub type MessageId = i64;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The lease expired and the message was claimed by someone else
    #[error("lease on message {message_id} no longer held by {consumer_id}")]
    LeaseLost {
        message_id: MessageId,
        consumer_id: String,
    },
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        PipelineError::transient(err.to_string())
    }
}

/// One leased delivery of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub staging_id: StagingId,
    /// Deliveries so far, including this one
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub consumer_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    StagingNotFound,
    InvalidStagedDocument,
    RetriesExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::StagingNotFound => "staging_not_found",
            DeadLetterReason::InvalidStagedDocument => "invalid_staged_document",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message parked for manual inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: i64,
    pub message_id: MessageId,
    pub staging_id: StagingId,
    pub reason: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Message counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub ready: i64,
    pub in_flight: i64,
    pub acked: i64,
    pub dead_lettered: i64,
}

#[async_trait]
pub trait ReplicationQueue: Send + Sync {
    /// Enqueue a message; durable once this returns
    async fn publish(&self, message: &ReplicationMessage) -> Result<MessageId, QueueError>;

    /// Lease the next visible message, if any
    async fn receive(
        &self,
        consumer_id: &str,
        visibility: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Mark the delivery as processed; terminal
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give the message back for redelivery after `delay`
    async fn nack(&self, delivery: &Delivery, error: &str, delay: Duration)
        -> Result<(), QueueError>;

    /// Record the message as dead-lettered and acknowledge it, atomically
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<(), QueueError>;

    /// Most recent dead letters first
    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Publishes replication notifications for staged batches
#[derive(Clone)]
pub struct NotificationPublisher {
    queue: Arc<dyn ReplicationQueue>,
}

impl NotificationPublisher {
    pub fn new(queue: Arc<dyn ReplicationQueue>) -> Self {
        Self { queue }
    }

    #[tracing::instrument(skip(self), fields(staging_id = %staging_id))]
    pub async fn publish(&self, staging_id: &StagingId) -> Result<MessageId, QueueError> {
        let message_id = self
            .queue
            .publish(&ReplicationMessage::new(staging_id.clone()))
            .await?;

        tracing::info!(message_id, "Replication message published");

        Ok(message_id)
    }
}
