use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use userstage_common::types::{ReplicationMessage, StagingId};

use super::{
    DeadLetter, DeadLetterReason, Delivery, MessageId, QueueError, QueueStats, ReplicationQueue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ready,
    InFlight,
    Acked,
    DeadLettered,
}

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    staging_id: StagingId,
    status: Status,
    attempts: u32,
    visible_at: Instant,
    claimed_by: Option<String>,
    last_error: Option<String>,
    enqueued_at: DateTime<Utc>,
}

impl StoredMessage {
    fn deliverable(&self, now: Instant) -> bool {
        matches!(self.status, Status::Ready | Status::InFlight) && self.visible_at <= now
    }

    fn leased_to(&self, delivery: &Delivery) -> bool {
        self.status == Status::InFlight
            && self.claimed_by.as_deref() == Some(delivery.consumer_id.as_str())
    }
}

#[derive(Default)]
struct QueueState {
    next_id: MessageId,
    messages: Vec<StoredMessage>,
    dead_letters: Vec<DeadLetter>,
}

impl QueueState {
    fn leased_mut(&mut self, delivery: &Delivery) -> Result<&mut StoredMessage, QueueError> {
        self.messages
            .iter_mut()
            .find(|m| m.id == delivery.message_id && m.leased_to(delivery))
            .ok_or_else(|| QueueError::LeaseLost {
                message_id: delivery.message_id,
                consumer_id: delivery.consumer_id.clone(),
            })
    }
}

/// In-process queue with the same lease semantics as [`super::PgReplicationQueue`]
///
/// Visibility uses `tokio::time`, so paused-clock tests can advance past leases.
#[derive(Default, Clone)]
pub struct MemoryReplicationQueue {
    state: Arc<Mutex<QueueState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryReplicationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the broker were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Staging ids of every message ever published, in publish order
    pub async fn published(&self) -> Vec<StagingId> {
        self.state
            .lock()
            .await
            .messages
            .iter()
            .map(|m| m.staging_id.clone())
            .collect()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::Unavailable("broker connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ReplicationQueue for MemoryReplicationQueue {
    async fn publish(&self, message: &ReplicationMessage) -> Result<MessageId, QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.messages.push(StoredMessage {
            id,
            staging_id: message.staging_id.clone(),
            status: Status::Ready,
            attempts: 0,
            visible_at: Instant::now(),
            claimed_by: None,
            last_error: None,
            enqueued_at: Utc::now(),
        });
        Ok(id)
    }

    async fn receive(
        &self,
        consumer_id: &str,
        visibility: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        self.check_available()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let Some(message) = state
            .messages
            .iter_mut()
            .filter(|m| m.deliverable(now))
            .min_by_key(|m| (m.visible_at, m.id))
        else {
            return Ok(None);
        };

        message.status = Status::InFlight;
        message.attempts += 1;
        message.claimed_by = Some(consumer_id.to_string());
        message.visible_at = now + visibility;

        Ok(Some(Delivery {
            message_id: message.id,
            staging_id: message.staging_id.clone(),
            attempts: message.attempts,
            enqueued_at: message.enqueued_at,
            consumer_id: consumer_id.to_string(),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let message = state.leased_mut(delivery)?;
        message.status = Status::Acked;
        message.claimed_by = None;
        Ok(())
    }

    async fn nack(
        &self,
        delivery: &Delivery,
        error: &str,
        delay: Duration,
    ) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let message = state.leased_mut(delivery)?;
        message.status = Status::Ready;
        message.claimed_by = None;
        message.last_error = Some(error.to_string());
        message.visible_at = Instant::now() + delay;
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let message = state.leased_mut(delivery)?;
        message.status = Status::DeadLettered;
        message.claimed_by = None;
        message.last_error = Some(detail.to_string());
        let attempts = message.attempts;

        let id = state.dead_letters.len() as i64 + 1;
        state.dead_letters.push(DeadLetter {
            id,
            message_id: delivery.message_id,
            staging_id: delivery.staging_id.clone(),
            reason: reason.as_str().to_string(),
            attempts,
            last_error: Some(detail.to_string()),
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        self.check_available()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state
            .lock()
            .await
            .dead_letters
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let count = |status: Status| {
            state
                .messages
                .iter()
                .filter(|m| m.status == status)
                .count() as i64
        };
        Ok(QueueStats {
            ready: count(Status::Ready),
            in_flight: count(Status::InFlight),
            acked: count(Status::Acked),
            dead_lettered: count(Status::DeadLettered),
        })
    }
}
