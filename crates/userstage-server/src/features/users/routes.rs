//! User routes
//!
//! # Endpoint
//!
//! `GET /users`
//!
//! # Response
//!
//! ```json
//! [{ "name": "Ana", "email": "ana@example.com", "age": 35 }]
//! ```

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use super::queries::{list, ListUsersQuery};
use crate::error::AppError;
use crate::features::PipelineState;

pub fn users_routes() -> Router<PipelineState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/", get(list_users))
}

async fn list_users(State(state): State<PipelineState>) -> Result<Response, AppError> {
    let users = list::handle(&state, ListUsersQuery).await?;

    Ok((StatusCode::OK, Json(users)).into_response())
}
