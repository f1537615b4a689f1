//! Domain types shared by the ingest endpoint and the replication consumer

pub mod staging;
pub mod user;

pub use staging::{ReplicatedUserRow, ReplicationMessage, StagingDocument, StagingId};
pub use user::{parse_batch, BatchError, FieldViolation, UserRecord, ValidationError};
