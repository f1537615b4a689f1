//! PostgreSQL-backed replication queue
//!
//! Messages live in `replication_messages`. Receiving claims the oldest visible
//! row with `FOR UPDATE SKIP LOCKED`, so concurrent consumers never lease the same
//! message, and pushes its `visible_at` forward by the visibility timeout. Ack,
//! nack and dead-letter only succeed while the caller still holds the lease.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tracing::instrument;
use userstage_common::types::{ReplicationMessage, StagingId};

use super::{
    DeadLetter, DeadLetterReason, Delivery, MessageId, QueueError, QueueStats, ReplicationQueue,
};

#[derive(Clone)]
pub struct PgReplicationQueue {
    pool: PgPool,
    queue_name: String,
}

impl PgReplicationQueue {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

fn attempts_from_db(attempts: i32) -> u32 {
    u32::try_from(attempts).unwrap_or(0)
}

fn lease_lost(delivery: &Delivery) -> QueueError {
    QueueError::LeaseLost {
        message_id: delivery.message_id,
        consumer_id: delivery.consumer_id.clone(),
    }
}

#[async_trait]
impl ReplicationQueue for PgReplicationQueue {
    #[instrument(skip(self, message), fields(queue = %self.queue_name, staging_id = %message.staging_id))]
    async fn publish(&self, message: &ReplicationMessage) -> Result<MessageId, QueueError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO replication_messages (queue_name, staging_id)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(&self.queue_name)
        .bind(message.staging_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    #[instrument(skip(self), fields(queue = %self.queue_name))]
    async fn receive(
        &self,
        consumer_id: &str,
        visibility: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let row = sqlx::query_as::<_, (i64, String, i32, DateTime<Utc>)>(
            r#"
            WITH next AS (
                SELECT id
                FROM replication_messages
                WHERE queue_name = $1
                  AND status IN ('ready', 'in_flight')
                  AND visible_at <= NOW()
                ORDER BY visible_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE replication_messages m
            SET status = 'in_flight',
                attempts = m.attempts + 1,
                claimed_by = $2,
                visible_at = NOW() + make_interval(secs => $3)
            FROM next
            WHERE m.id = next.id
            RETURNING m.id, m.staging_id, m.attempts, m.enqueued_at
            "#,
        )
        .bind(&self.queue_name)
        .bind(consumer_id)
        .bind(visibility.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(message_id, staging_id, attempts, enqueued_at)| Delivery {
            message_id,
            staging_id: StagingId::new(staging_id),
            attempts: attempts_from_db(attempts),
            enqueued_at,
            consumer_id: consumer_id.to_string(),
        }))
    }

    #[instrument(skip(self, delivery), fields(message_id = delivery.message_id))]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let updated = sqlx::query(
            r#"
            UPDATE replication_messages
            SET status = 'acked', acked_at = NOW(), claimed_by = NULL
            WHERE id = $1 AND claimed_by = $2 AND status = 'in_flight'
            "#,
        )
        .bind(delivery.message_id)
        .bind(&delivery.consumer_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(lease_lost(delivery));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery, error), fields(message_id = delivery.message_id))]
    async fn nack(
        &self,
        delivery: &Delivery,
        error: &str,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let updated = sqlx::query(
            r#"
            UPDATE replication_messages
            SET status = 'ready',
                claimed_by = NULL,
                last_error = $3,
                visible_at = NOW() + make_interval(secs => $4)
            WHERE id = $1 AND claimed_by = $2 AND status = 'in_flight'
            "#,
        )
        .bind(delivery.message_id)
        .bind(&delivery.consumer_id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(lease_lost(delivery));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery, detail), fields(message_id = delivery.message_id, reason = %reason))]
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        detail: &str,
    ) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, (i32,)>(
            r#"
            UPDATE replication_messages
            SET status = 'dead_lettered', acked_at = NOW(), claimed_by = NULL, last_error = $3
            WHERE id = $1 AND claimed_by = $2 AND status = 'in_flight'
            RETURNING attempts
            "#,
        )
        .bind(delivery.message_id)
        .bind(&delivery.consumer_id)
        .bind(detail)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((attempts,)) = claimed else {
            tx.rollback().await?;
            return Err(lease_lost(delivery));
        };

        sqlx::query(
            r#"
            INSERT INTO replication_dead_letters
                (message_id, queue_name, staging_id, reason, attempts, last_error)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(delivery.message_id)
        .bind(&self.queue_name)
        .bind(delivery.staging_id.as_str())
        .bind(reason.as_str())
        .bind(attempts)
        .bind(detail)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query_as::<
            _,
            (i64, i64, String, String, i32, Option<String>, DateTime<Utc>),
        >(
            r#"
            SELECT id, message_id, staging_id, reason, attempts, last_error, dead_lettered_at
            FROM replication_dead_letters
            WHERE queue_name = $1
            ORDER BY dead_lettered_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(&self.queue_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, message_id, staging_id, reason, attempts, last_error, dead_lettered_at)| {
                    DeadLetter {
                        id,
                        message_id,
                        staging_id: StagingId::new(staging_id),
                        reason,
                        attempts: attempts_from_db(attempts),
                        last_error,
                        dead_lettered_at,
                    }
                },
            )
            .collect())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM replication_messages
            WHERE queue_name = $1
            GROUP BY status
            "#,
        )
        .bind(&self.queue_name)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "ready" => stats.ready = count,
                "in_flight" => stats.in_flight = count,
                "acked" => stats.acked = count,
                "dead_lettered" => stats.dead_lettered = count,
                other => tracing::warn!(status = other, "Unknown message status"),
            }
        }
        Ok(stats)
    }
}
