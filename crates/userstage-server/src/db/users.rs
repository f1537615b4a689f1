//! Replicated users repository
//!
//! Each staged batch is committed in one transaction together with a marker row
//! in `replicated_batches`. The marker's primary key is what makes replays and
//! concurrent workers safe: whoever inserts it first owns the batch, everyone else
//! sees [`ReplicationOutcome::AlreadyReplicated`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use userstage_common::types::{ReplicatedUserRow, StagingId};
use userstage_common::PipelineError;

/// Row shape returned by the listing query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSummary {
    pub name: String,
    pub email: String,
    pub age: i32,
}

impl From<&ReplicatedUserRow> for UserSummary {
    fn from(row: &ReplicatedUserRow) -> Self {
        Self {
            name: row.name.clone(),
            email: row.email.clone(),
            age: row.age,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// Rows were inserted and committed by this call
    Inserted { rows: usize },
    /// A previous delivery already committed this batch; nothing was written
    AlreadyReplicated,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("relational store unavailable: {0}")]
    Unavailable(String),

    #[error("relational constraint violated: {0}")]
    Constraint(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_check_violation()
                || db_err.is_unique_violation()
                || db_err.is_foreign_key_violation()
            {
                return RepositoryError::Constraint(db_err.message().to_string());
            }
        }
        RepositoryError::Unavailable(err.to_string())
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        PipelineError::transient(err.to_string())
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert all rows of one staged batch atomically, at most once per staging id
    async fn replicate_batch(
        &self,
        staging_id: &StagingId,
        rows: &[ReplicatedUserRow],
    ) -> Result<ReplicationOutcome, RepositoryError>;

    /// All replicated users in insertion order
    async fn list_users(&self) -> Result<Vec<UserSummary>, RepositoryError>;

    /// Number of rows tagged with the given staging id
    async fn count_for_staging(&self, staging_id: &StagingId) -> Result<i64, RepositoryError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[tracing::instrument(skip(self, rows), fields(staging_id = %staging_id, rows = rows.len()))]
    async fn replicate_batch(
        &self,
        staging_id: &StagingId,
        rows: &[ReplicatedUserRow],
    ) -> Result<ReplicationOutcome, RepositoryError> {
        let row_count = i32::try_from(rows.len())
            .map_err(|_| RepositoryError::Constraint("batch too large".to_string()))?;

        let mut tx = self.pool.begin().await?;

        // Blocks behind a concurrent uncommitted claim on the same id, then does nothing
        let claimed = sqlx::query(
            r#"
            INSERT INTO replicated_batches (staging_id, row_count)
            VALUES ($1, $2)
            ON CONFLICT (staging_id) DO NOTHING
            "#,
        )
        .bind(staging_id.as_str())
        .bind(row_count)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            tracing::info!("Batch already replicated, skipping insert");
            return Ok(ReplicationOutcome::AlreadyReplicated);
        }

        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        let emails: Vec<&str> = rows.iter().map(|r| r.email.as_str()).collect();
        let ages: Vec<i32> = rows.iter().map(|r| r.age).collect();

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (name, email, age, staging_id)
            SELECT name, email, age, $4
            FROM UNNEST($1::text[], $2::text[], $3::int4[]) AS batch(name, email, age)
            "#,
        )
        .bind(&names)
        .bind(&emails)
        .bind(&ages)
        .bind(staging_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        tracing::info!(inserted, "Batch replicated into users");

        Ok(ReplicationOutcome::Inserted {
            rows: rows.len(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<UserSummary>, RepositoryError> {
        let users = sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT name, email, age
            FROM users
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn count_for_staging(&self, staging_id: &StagingId) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE staging_id = $1")
            .bind(staging_id.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Default)]
struct MemoryUsers {
    rows: Vec<ReplicatedUserRow>,
    batches: HashSet<StagingId>,
}

/// In-process repository with the same batch semantics as PostgreSQL
#[derive(Default, Clone)]
pub struct MemoryUserRepository {
    state: Arc<RwLock<MemoryUsers>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn row_count(&self) -> usize {
        self.state.read().await.rows.len()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn replicate_batch(
        &self,
        staging_id: &StagingId,
        rows: &[ReplicatedUserRow],
    ) -> Result<ReplicationOutcome, RepositoryError> {
        self.check_available()?;

        if let Some(row) = rows.iter().find(|r| r.age < 0) {
            return Err(RepositoryError::Constraint(format!(
                "age {} violates users_age_check",
                row.age
            )));
        }

        let mut state = self.state.write().await;
        if !state.batches.insert(staging_id.clone()) {
            return Ok(ReplicationOutcome::AlreadyReplicated);
        }
        state.rows.extend(rows.iter().cloned());

        Ok(ReplicationOutcome::Inserted {
            rows: rows.len(),
        })
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.read().await.rows.iter().map(UserSummary::from).collect())
    }

    async fn count_for_staging(&self, staging_id: &StagingId) -> Result<i64, RepositoryError> {
        self.check_available()?;
        let count = self
            .state
            .read()
            .await
            .rows
            .iter()
            .filter(|r| &r.staging_id == staging_id)
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use userstage_common::types::UserRecord;

    fn rows(staging_id: &StagingId, n: usize) -> Vec<ReplicatedUserRow> {
        (0..n)
            .map(|i| {
                let record = UserRecord::new(format!("User {}", i), format!("u{}@example.com", i), 20);
                ReplicatedUserRow::from_record(&record, staging_id)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_replay_inserts_once() {
        let repo = MemoryUserRepository::new();
        let id = StagingId::generate();

        let first = repo.replicate_batch(&id, &rows(&id, 2)).await.unwrap();
        let second = repo.replicate_batch(&id, &rows(&id, 2)).await.unwrap();

        assert_eq!(first, ReplicationOutcome::Inserted { rows: 2 });
        assert_eq!(second, ReplicationOutcome::AlreadyReplicated);
        assert_eq!(repo.count_for_staging(&id).await.unwrap(), 2);
        assert_eq!(repo.list_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let repo = MemoryUserRepository::new();
        repo.set_unavailable(true);
        let err = repo.list_users().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
        assert!(PipelineError::from(err).is_retryable());
    }

    #[tokio::test]
    async fn test_constraint_violation_writes_nothing() {
        let repo = MemoryUserRepository::new();
        let id = StagingId::generate();
        let mut batch = rows(&id, 2);
        batch[1].age = -1;

        let err = repo.replicate_batch(&id, &batch).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
        assert_eq!(repo.row_count().await, 0);

        // The batch was not marked, so a corrected retry still goes through
        batch[1].age = 1;
        assert_eq!(
            repo.replicate_batch(&id, &batch).await.unwrap(),
            ReplicationOutcome::Inserted { rows: 2 }
        );
    }
}
