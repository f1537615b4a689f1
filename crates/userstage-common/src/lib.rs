//! Userstage Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, validation, and error handling for the userstage workspace.
//!
//! - **Error Handling**: the [`PipelineError`] taxonomy and its result alias
//! - **Types**: user records, staging documents, and replication messages
//! - **Logging**: `tracing` setup shared by the server and worker binaries
//!
//! # Example
//!
//! ```
//! use userstage_common::types::parse_batch;
//!
//! let records = parse_batch(br#"[{"name":"Ana","email":"ana@example.com","age":35}]"#).unwrap();
//! assert_eq!(records.len(), 1);
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{PipelineError, Result};
