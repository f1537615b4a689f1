//! Staging and replication types shared by the ingest and consumer sides

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::UserRecord;

/// Store-assigned identifier of a staged batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagingId(String);

impl StagingId {
    /// Allocate a fresh identifier for a new staging document
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier has the shape the staging store assigns
    ///
    /// Ids arriving over the queue are opaque text; a malformed one can never
    /// resolve to a staged document.
    pub fn is_well_formed(&self) -> bool {
        Uuid::parse_str(&self.0).is_ok()
    }
}

impl std::fmt::Display for StagingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StagingId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An uploaded batch as persisted in the staging store; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingDocument {
    pub staging_id: StagingId,
    pub created_at: DateTime<Utc>,
    pub records: Vec<UserRecord>,
}

impl StagingDocument {
    pub fn new(staging_id: StagingId, records: Vec<UserRecord>) -> Self {
        Self {
            staging_id,
            created_at: Utc::now(),
            records,
        }
    }
}

/// Queue notification that a staged batch is ready to replicate
///
/// The queue row carries the staging id and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationMessage {
    pub staging_id: StagingId,
}

impl ReplicationMessage {
    pub fn new(staging_id: StagingId) -> Self {
        Self { staging_id }
    }
}

/// One relational row derived from one staged user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedUserRow {
    pub name: String,
    pub email: String,
    pub age: i32,
    /// Originating batch, used to detect replays
    pub staging_id: StagingId,
}

impl ReplicatedUserRow {
    pub fn from_record(record: &UserRecord, staging_id: &StagingId) -> Self {
        Self {
            name: record.name.clone(),
            email: record.email.clone(),
            age: record.age,
            staging_id: staging_id.clone(),
        }
    }
}
