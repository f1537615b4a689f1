//! Upload routes
//!
//! # Endpoints
//!
//! - `POST /upload` - JSON array body, or multipart with a `file` or `json_data` field
//! - `POST /replications/:staging_id` - re-schedule replication of a staged batch
//!
//! # Response
//!
//! ```json
//! {
//!   "message": "JSON received and is being processed",
//!   "id": "5f0c3a9e-7b1d-4c2e-9a8f-1e2d3c4b5a69",
//!   "replicationPending": true
//! }
//! ```

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use userstage_common::types::StagingId;

use super::commands::{republish, upload, RepublishCommand, UploadCommand, UploadError};
use crate::error::AppError;
use crate::features::PipelineState;

pub fn uploads_routes() -> Router<PipelineState> {
    Router::new()
        .route("/upload", post(upload_batch))
        .route("/upload/", post(upload_batch))
        .route("/replications/:staging_id", post(republish_batch))
}

#[tracing::instrument(skip(state, request))]
async fn upload_batch(
    State(state): State<PipelineState>,
    request: Request,
) -> Result<Response, AppError> {
    let command = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| UploadError::Multipart(e.body_text()))?;
        UploadCommand::from_multipart(multipart).await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| AppError::Rejected {
                status: e.status(),
                detail: e.body_text(),
            })?;
        UploadCommand::from_body(body)
    };

    let response = upload::handle(&state, command).await?;

    Ok((StatusCode::OK, Json(response)).into_response())
}

#[tracing::instrument(skip(state))]
async fn republish_batch(
    State(state): State<PipelineState>,
    Path(staging_id): Path<String>,
) -> Result<Response, AppError> {
    let command = RepublishCommand {
        staging_id: StagingId::new(staging_id),
    };

    let response = republish::handle(&state, command).await?;

    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            let media_type = value.split(';').next().unwrap_or_default().trim();
            media_type.eq_ignore_ascii_case("multipart/form-data")
        })
}
