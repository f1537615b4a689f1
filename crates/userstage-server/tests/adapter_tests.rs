//! Production adapter tests against real PostgreSQL and MinIO
//!
//! Require a Docker daemon; run with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;
use userstage_common::types::{ReplicatedUserRow, ReplicationMessage, StagingId, UserRecord};
use userstage_server::db::{PgUserRepository, ReplicationOutcome, RepositoryError, UserRepository};
use userstage_server::queue::{DeadLetterReason, PgReplicationQueue, QueueError, ReplicationQueue};
use userstage_server::replication::{ConsumerSettings, MessageOutcome, ReplicationConsumer};
use userstage_server::staging::{s3::staging_key, S3StagingStore, StagingError, StagingStore};

mod common;
use common::{TestMinio, TestPostgres};

const LEASE: Duration = Duration::from_secs(30);

fn rows(id: &StagingId, records: &[UserRecord]) -> Vec<ReplicatedUserRow> {
    records
        .iter()
        .map(|r| ReplicatedUserRow::from_record(r, id))
        .collect()
}

// ============================================================================
// Relational store
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pg_repository_inserts_batch_once() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let repo = PgUserRepository::new(pg.pool_clone());

    let id = StagingId::generate();
    let batch = rows(
        &id,
        &[
            UserRecord::new("Ana", "ana@example.com", 35),
            UserRecord::new("Ben", "ben@example.com", 0),
        ],
    );

    let first = repo.replicate_batch(&id, &batch).await.unwrap();
    let second = repo.replicate_batch(&id, &batch).await.unwrap();

    assert_eq!(first, ReplicationOutcome::Inserted { rows: 2 });
    assert_eq!(second, ReplicationOutcome::AlreadyReplicated);
    assert_eq!(repo.count_for_staging(&id).await.unwrap(), 2);

    let users = repo.list_users().await.unwrap();
    let names: Vec<_> = users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["Ana", "Ben"]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pg_repository_rolls_back_on_constraint_violation() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let repo = PgUserRepository::new(pg.pool_clone());

    let id = StagingId::generate();
    let mut batch = rows(&id, &[UserRecord::new("Ana", "ana@example.com", 35)]);
    batch.push(ReplicatedUserRow {
        age: -1,
        ..batch[0].clone()
    });

    let err = repo.replicate_batch(&id, &batch).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Constraint(_)));

    // Neither rows nor the batch marker survive, so a corrected retry still inserts
    assert_eq!(repo.count_for_staging(&id).await.unwrap(), 0);
    let retried = repo.replicate_batch(&id, &batch[..1]).await.unwrap();
    assert_eq!(retried, ReplicationOutcome::Inserted { rows: 1 });
}

// ============================================================================
// Durable queue
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pg_queue_leases_exclusively() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let queue = PgReplicationQueue::new(pg.pool_clone(), "user_queue");
    assert_eq!(queue.queue_name(), "user_queue");

    let id = StagingId::generate();
    queue.publish(&ReplicationMessage::new(id.clone())).await.unwrap();

    let delivery = queue.receive("worker-a", LEASE).await.unwrap().unwrap();
    assert_eq!(delivery.staging_id, id);
    assert_eq!(delivery.attempts, 1);
    assert!(queue.receive("worker-b", LEASE).await.unwrap().is_none());

    queue.ack(&delivery).await.unwrap();
    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.ready, stats.in_flight, stats.acked), (0, 0, 1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pg_queue_redelivers_expired_lease() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let queue = PgReplicationQueue::new(pg.pool_clone(), "user_queue");

    queue
        .publish(&ReplicationMessage::new(StagingId::generate()))
        .await
        .unwrap();

    let stale = queue
        .receive("worker-a", Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let fresh = queue.receive("worker-b", LEASE).await.unwrap().unwrap();
    assert_eq!(fresh.message_id, stale.message_id);
    assert_eq!(fresh.attempts, 2);

    let err = queue.ack(&stale).await.unwrap_err();
    assert!(matches!(err, QueueError::LeaseLost { .. }));
    queue.ack(&fresh).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pg_queue_nack_delays_and_dead_letter_is_terminal() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let queue = PgReplicationQueue::new(pg.pool_clone(), "user_queue");
    let id = StagingId::generate();
    queue.publish(&ReplicationMessage::new(id.clone())).await.unwrap();

    let delivery = queue.receive("worker-a", LEASE).await.unwrap().unwrap();
    queue
        .nack(&delivery, "connection refused", Duration::from_secs(60))
        .await
        .unwrap();
    assert!(queue.receive("worker-a", LEASE).await.unwrap().is_none());

    // Make it visible again without waiting out the delay
    sqlx::query("UPDATE replication_messages SET visible_at = NOW()")
        .execute(pg.pool())
        .await
        .unwrap();

    let delivery = queue.receive("worker-a", LEASE).await.unwrap().unwrap();
    queue
        .dead_letter(&delivery, DeadLetterReason::RetriesExhausted, "connection refused")
        .await
        .unwrap();

    assert!(queue.receive("worker-a", LEASE).await.unwrap().is_none());
    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].staging_id, id);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(dead[0].reason, "retries_exhausted");
    assert_eq!(queue.stats().await.unwrap().dead_lettered, 1);
}

// ============================================================================
// Staging store
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_s3_staging_round_trip_and_missing_object() {
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let storage = minio.storage();
    let store = S3StagingStore::new(storage.clone());

    let records = vec![UserRecord::new("João Silva", "joao.silva@example.com", 30)];
    let id = store.stage(&records).await.unwrap();

    assert!(store.contains(&id).await.unwrap());
    let document = store.fetch(&id).await.unwrap();
    assert_eq!(document.staging_id, id);
    assert_eq!(document.records, records);

    storage.delete(&staging_key(&id)).await.unwrap();
    assert!(!store.contains(&id).await.unwrap());
    assert!(matches!(store.fetch(&id).await, Err(StagingError::NotFound(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_s3_staging_rejects_corrupt_object() {
    let minio = TestMinio::start().await.expect("Failed to start MinIO");
    let storage = minio.storage();
    let store = S3StagingStore::new(storage.clone());

    let id = StagingId::generate();
    storage
        .upload(&staging_key(&id), b"not json".to_vec(), Some("application/json"))
        .await
        .unwrap();

    assert!(matches!(store.fetch(&id).await, Err(StagingError::Corrupt { .. })));
}

// ============================================================================
// Full pipeline
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_consumer_replicates_staged_batch_end_to_end() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let minio = TestMinio::start().await.expect("Failed to start MinIO");

    let staging = Arc::new(S3StagingStore::new(minio.storage()));
    let queue = Arc::new(PgReplicationQueue::new(pg.pool_clone(), "user_queue"));
    let users = Arc::new(PgUserRepository::new(pg.pool_clone()));
    let consumer = ReplicationConsumer::new(
        staging.clone(),
        queue.clone(),
        users.clone(),
        ConsumerSettings::default(),
    );

    let id = staging
        .stage(&[UserRecord::new("Ana", "ana@example.com", 35)])
        .await
        .unwrap();
    queue.publish(&ReplicationMessage::new(id.clone())).await.unwrap();
    queue.publish(&ReplicationMessage::new(id.clone())).await.unwrap();

    let first = consumer.poll_once("worker-a").await.unwrap();
    let second = consumer.poll_once("worker-a").await.unwrap();

    assert_eq!(first, Some(MessageOutcome::Replicated { rows: 1 }));
    assert_eq!(second, Some(MessageOutcome::AlreadyReplicated));
    assert_eq!(users.count_for_staging(&id).await.unwrap(), 1);
    assert_eq!(queue.stats().await.unwrap().acked, 2);
}
