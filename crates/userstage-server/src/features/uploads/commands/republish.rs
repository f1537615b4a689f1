use serde::Serialize;
use tokio::time::timeout;
use userstage_common::types::StagingId;
use userstage_common::PipelineError;

use crate::error::AppError;
use crate::features::PipelineState;
use crate::queue::MessageId;

#[derive(Debug, Clone)]
pub struct RepublishCommand {
    pub staging_id: StagingId,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepublishResponse {
    pub staging_id: StagingId,
    pub message_id: MessageId,
}

#[derive(Debug, thiserror::Error)]
pub enum RepublishError {
    #[error("staged batch {0} not found")]
    NotStaged(StagingId),
    #[error("staging store unavailable: {0}")]
    StagingUnavailable(PipelineError),
    #[error("replication queue unavailable: {0}")]
    QueueUnavailable(PipelineError),
}

impl From<RepublishError> for AppError {
    fn from(err: RepublishError) -> Self {
        match err {
            RepublishError::NotStaged(_) => AppError::NotFound(err.to_string()),
            RepublishError::StagingUnavailable(ref detail) => {
                AppError::unavailable("staging store", detail)
            },
            RepublishError::QueueUnavailable(ref detail) => {
                AppError::unavailable("replication queue", detail)
            },
        }
    }
}

/// Publish a fresh replication message for an already staged batch
///
/// Safe to repeat: the consumer inserts each staged batch at most once.
#[tracing::instrument(skip(state), fields(staging_id = %command.staging_id))]
pub async fn handle(
    state: &PipelineState,
    command: RepublishCommand,
) -> Result<RepublishResponse, RepublishError> {
    let RepublishCommand { staging_id } = command;
    let timeouts = state.timeouts;

    if !staging_id.is_well_formed() {
        return Err(RepublishError::NotStaged(staging_id));
    }

    let staged = match timeout(timeouts.staging, state.staging.contains(&staging_id)).await {
        Ok(Ok(staged)) => staged,
        Ok(Err(e)) => return Err(RepublishError::StagingUnavailable(e.into())),
        Err(_) => {
            let err = PipelineError::timed_out("staging lookup", timeouts.staging);
            return Err(RepublishError::StagingUnavailable(err));
        },
    };
    if !staged {
        return Err(RepublishError::NotStaged(staging_id));
    }

    let message_id = match timeout(timeouts.publish, state.publisher.publish(&staging_id)).await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => return Err(RepublishError::QueueUnavailable(e.into())),
        Err(_) => {
            let err = PipelineError::timed_out("publish", timeouts.publish);
            return Err(RepublishError::QueueUnavailable(err));
        },
    };

    tracing::info!(message_id, "Replication re-scheduled");

    Ok(RepublishResponse {
        staging_id,
        message_id,
    })
}
