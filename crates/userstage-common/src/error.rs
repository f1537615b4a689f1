//! Error taxonomy for the ingest-and-replicate pipeline
//!
//! Every component error converges on [`PipelineError`], whose variant decides
//! how the failure is handled: surfaced to the client, retried with backoff,
//! dead-lettered, or treated as fatal at startup.

use thiserror::Error;

use crate::types::ValidationError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline-wide error classification
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Client-caused; reported as 400, never retried
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Network failure or timeout against an external store; retried with backoff
    #[error("Transient store error: {0}")]
    Transient(String),

    /// The referenced data is gone or unusable; dead-lettered, never retried
    #[error("Permanent store error: {0}")]
    Permanent(String),

    /// Invalid or missing configuration; the process does not start
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Build the error reported when an external call exceeds its time budget
    pub fn timed_out(operation: &str, limit: std::time::Duration) -> Self {
        Self::Transient(format!("{} timed out after {}ms", operation, limit.as_millis()))
    }

    /// Whether the failed operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Short category label, safe to show to HTTP clients
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transient(_) => "transient",
            Self::Permanent(_) => "permanent",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(PipelineError::transient("connection reset").is_retryable());
        assert!(!PipelineError::permanent("gone").is_retryable());
        assert!(!PipelineError::configuration("missing").is_retryable());
        assert!(!PipelineError::Validation(ValidationError::default()).is_retryable());
    }

    #[test]
    fn test_timed_out_message() {
        let err = PipelineError::timed_out("staging write", Duration::from_millis(1500));
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Transient store error: staging write timed out after 1500ms"
        );
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(PipelineError::transient("x").category(), "transient");
        assert_eq!(PipelineError::permanent("x").category(), "permanent");
    }
}
