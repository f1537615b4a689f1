//! List dead letters query
//!
//! Most recent first. Operators use this to find batches that will never replicate
//! on their own.

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use userstage_common::PipelineError;

use crate::error::AppError;
use crate::features::PipelineState;
use crate::queue::DeadLetter;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListDeadLettersQuery {
    pub limit: Option<i64>,
}

impl ListDeadLettersQuery {
    fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDeadLettersResponse {
    pub dead_letters: Vec<DeadLetter>,
    pub limit: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ListDeadLettersError {
    #[error("replication queue unavailable: {0}")]
    Unavailable(PipelineError),
}

impl From<ListDeadLettersError> for AppError {
    fn from(err: ListDeadLettersError) -> Self {
        match err {
            ListDeadLettersError::Unavailable(ref detail) => {
                AppError::unavailable("replication queue", detail)
            },
        }
    }
}

#[tracing::instrument(skip(state))]
pub async fn handle(
    state: &PipelineState,
    query: ListDeadLettersQuery,
) -> Result<ListDeadLettersResponse, ListDeadLettersError> {
    let limit = query.effective_limit();
    let budget = state.timeouts.relational;

    let dead_letters = match timeout(budget, state.queue.dead_letters(limit)).await {
        Ok(Ok(dead_letters)) => dead_letters,
        Ok(Err(e)) => return Err(ListDeadLettersError::Unavailable(e.into())),
        Err(_) => {
            let err = PipelineError::timed_out("dead letter listing", budget);
            return Err(ListDeadLettersError::Unavailable(err));
        },
    };

    Ok(ListDeadLettersResponse {
        dead_letters,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_clamped() {
        let limit = |limit| ListDeadLettersQuery { limit }.effective_limit();

        assert_eq!(limit(None), DEFAULT_LIMIT);
        assert_eq!(limit(Some(0)), 1);
        assert_eq!(limit(Some(10)), 10);
        assert_eq!(limit(Some(10_000)), MAX_LIMIT);
    }
}
