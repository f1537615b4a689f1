//! Staging store adapter
//!
//! An uploaded batch is written as one immutable document before anything is
//! published about it. [`StagingStore::stage`] returns only after the backing
//! store acknowledged the write, so a returned [`StagingId`] always resolves.

use async_trait::async_trait;
use thiserror::Error;
use userstage_common::types::{StagingDocument, StagingId, UserRecord};
use userstage_common::PipelineError;

pub mod memory;
pub mod s3;

pub use memory::MemoryStagingStore;
pub use s3::S3StagingStore;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staged document {0} not found")]
    NotFound(StagingId),

    #[error("staged document {id} is unreadable: {reason}")]
    Corrupt { id: StagingId, reason: String },

    #[error("staging store unavailable: {0}")]
    Unavailable(String),
}

impl From<StagingError> for PipelineError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::NotFound(_) | StagingError::Corrupt { .. } => {
                PipelineError::permanent(err.to_string())
            },
            StagingError::Unavailable(_) => PipelineError::transient(err.to_string()),
        }
    }
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Durably persist a batch and return its store-assigned identifier
    async fn stage(&self, records: &[UserRecord]) -> Result<StagingId, StagingError>;

    /// Read a staged batch back; no side effects
    async fn fetch(&self, id: &StagingId) -> Result<StagingDocument, StagingError>;

    /// Whether a document is staged under this id
    async fn contains(&self, id: &StagingId) -> Result<bool, StagingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let id = StagingId::generate();
        assert!(!PipelineError::from(StagingError::NotFound(id.clone())).is_retryable());
        assert!(!PipelineError::from(StagingError::Corrupt {
            id,
            reason: "eof".into()
        })
        .is_retryable());
        assert!(PipelineError::from(StagingError::Unavailable("timeout".into())).is_retryable());
    }
}
