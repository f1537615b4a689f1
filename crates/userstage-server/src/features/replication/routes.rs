//! Replication admin routes
//!
//! # Endpoint
//!
//! `GET /replications/dead-letters?limit=50`

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::queries::{list_dead_letters, ListDeadLettersQuery};
use crate::error::AppError;
use crate::features::PipelineState;

pub fn replication_routes() -> Router<PipelineState> {
    Router::new().route("/replications/dead-letters", get(dead_letters))
}

async fn dead_letters(
    State(state): State<PipelineState>,
    Query(query): Query<ListDeadLettersQuery>,
) -> Result<Response, AppError> {
    let response = list_dead_letters::handle(&state, query).await?;

    Ok((StatusCode::OK, Json(response)).into_response())
}
