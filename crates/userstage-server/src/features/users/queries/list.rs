//! List users query
//!
//! Returns every replicated user row in insertion order as `{name, email, age}`.

use tokio::time::timeout;
use userstage_common::PipelineError;

use crate::db::UserSummary;
use crate::error::AppError;
use crate::features::PipelineState;

#[derive(Debug, Clone, Default)]
pub struct ListUsersQuery;

#[derive(Debug, thiserror::Error)]
pub enum ListUsersError {
    #[error("relational store unavailable: {0}")]
    Unavailable(PipelineError),
}

impl From<ListUsersError> for AppError {
    fn from(err: ListUsersError) -> Self {
        match err {
            ListUsersError::Unavailable(ref detail) => {
                AppError::unavailable("relational store", detail)
            },
        }
    }
}

#[tracing::instrument(skip(state, _query))]
pub async fn handle(
    state: &PipelineState,
    _query: ListUsersQuery,
) -> Result<Vec<UserSummary>, ListUsersError> {
    let limit = state.timeouts.relational;

    match timeout(limit, state.users.list_users()).await {
        Ok(Ok(users)) => Ok(users),
        Ok(Err(e)) => Err(ListUsersError::Unavailable(e.into())),
        Err(_) => Err(ListUsersError::Unavailable(PipelineError::timed_out(
            "user listing",
            limit,
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::db::{MemoryUserRepository, UserRepository};
    use crate::queue::MemoryReplicationQueue;
    use crate::staging::MemoryStagingStore;
    use std::sync::Arc;
    use userstage_common::types::{ReplicatedUserRow, StagingId, UserRecord};

    fn state(users: &MemoryUserRepository) -> PipelineState {
        PipelineState::new(
            Arc::new(MemoryStagingStore::new()),
            Arc::new(MemoryReplicationQueue::new()),
            Arc::new(users.clone()),
            TimeoutConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_lists_in_insertion_order() {
        let users = MemoryUserRepository::new();
        let id = StagingId::generate();
        let records = [
            UserRecord::new("Ana", "ana@example.com", 35),
            UserRecord::new("Ben", "ben@example.com", 0),
        ];
        let rows: Vec<_> = records
            .iter()
            .map(|r| ReplicatedUserRow::from_record(r, &id))
            .collect();
        users.replicate_batch(&id, &rows).await.unwrap();

        let listed = handle(&state(&users), ListUsersQuery).await.unwrap();

        let names: Vec<_> = listed.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["Ana", "Ben"]);
        assert_eq!(listed[1].age, 0);
    }

    #[tokio::test]
    async fn test_outage_is_unavailable() {
        let users = MemoryUserRepository::new();
        users.set_unavailable(true);

        let err = handle(&state(&users), ListUsersQuery).await.unwrap_err();

        assert!(matches!(err, ListUsersError::Unavailable(ref e) if e.is_retryable()));
    }
}
