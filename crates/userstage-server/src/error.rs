//! HTTP error mapping
//!
//! Every error body is `{"detail": "..."}`. Store failures are logged with their
//! full context here and reach the client only as a category message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use userstage_common::types::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request was refused by an extractor; keeps the extractor's status
    #[error("Rejected ({status}): {detail}")]
    Rejected { status: StatusCode, detail: String },

    #[error("Validation error: {0}")]
    Validation(ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Log the underlying failure and answer 503 with only the component name
    pub fn unavailable(component: &str, err: &dyn std::fmt::Display) -> Self {
        tracing::error!(component, error = %err, "Dependency unavailable");
        AppError::ServiceUnavailable(format!("{} unavailable", component))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "detail": message }))
            },
            AppError::Rejected { status, detail } => (status, json!({ "detail": detail })),
            AppError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                json!({ "detail": err.to_string(), "errors": err.violations }),
            ),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "detail": message })),
            AppError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "detail": message }))
            },
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "detail": "internal server error" }),
                )
            },
        };

        (status, Json(body)).into_response()
    }
}
