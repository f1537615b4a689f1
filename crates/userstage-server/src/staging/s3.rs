//! Staging documents as JSON objects in an S3-compatible bucket

use async_trait::async_trait;
use tracing::{info, instrument};
use userstage_common::types::{StagingDocument, StagingId, UserRecord};

use super::{StagingError, StagingStore};
use crate::storage::{Storage, StorageError};

const STAGING_PREFIX: &str = "staging";

pub fn staging_key(id: &StagingId) -> String {
    format!("{}/{}.json", STAGING_PREFIX, id)
}

#[derive(Clone)]
pub struct S3StagingStore {
    storage: Storage,
}

impl S3StagingStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl StagingStore for S3StagingStore {
    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn stage(&self, records: &[UserRecord]) -> Result<StagingId, StagingError> {
        let id = StagingId::generate();
        let document = StagingDocument::new(id.clone(), records.to_vec());

        let body = serde_json::to_vec(&document).map_err(|e| StagingError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;

        let upload = self
            .storage
            .upload(&staging_key(&id), body, Some("application/json"))
            .await
            .map_err(|e| StagingError::Unavailable(e.to_string()))?;

        info!(
            staging_id = %id,
            key = %upload.key,
            size = upload.size,
            sha256 = %upload.checksum,
            "Batch staged"
        );

        Ok(id)
    }

    #[instrument(skip(self), fields(staging_id = %id))]
    async fn fetch(&self, id: &StagingId) -> Result<StagingDocument, StagingError> {
        if !id.is_well_formed() {
            return Err(StagingError::NotFound(id.clone()));
        }

        let bytes = self
            .storage
            .download(&staging_key(id))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => StagingError::NotFound(id.clone()),
                StorageError::Request(msg) => StagingError::Unavailable(msg),
            })?;

        let document: StagingDocument =
            serde_json::from_slice(&bytes).map_err(|e| StagingError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        if &document.staging_id != id {
            return Err(StagingError::Corrupt {
                id: id.clone(),
                reason: format!("document carries staging id {}", document.staging_id),
            });
        }

        Ok(document)
    }

    async fn contains(&self, id: &StagingId) -> Result<bool, StagingError> {
        if !id.is_well_formed() {
            return Ok(false);
        }

        self.storage
            .exists(&staging_key(id))
            .await
            .map_err(|e| StagingError::Unavailable(e.to_string()))
    }
}
