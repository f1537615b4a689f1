//! Top-level router: health check, feature routes, and the middleware stack

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::time::timeout;

use crate::config::CorsConfig;
use crate::features::{self, PipelineState};
use crate::middleware;

/// Build the application router with all routes and middleware
pub fn create_router(state: PipelineState, cors: &CorsConfig) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone());

    Router::new()
        .merge(health_routes)
        .merge(features::router(state))
        // Apply layers from innermost to outermost
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

/// Health check handler
///
/// Reads the queue counters, which needs a working database connection.
async fn health_check(State(state): State<PipelineState>) -> Response {
    let budget = state.timeouts.relational;

    match timeout(budget, state.queue.stats()).await {
        Ok(Ok(stats)) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "queue": stats
            })),
        )
            .into_response(),
        Ok(Err(e)) => unhealthy(&e),
        Err(_) => unhealthy(&"health check timed out"),
    }
}

fn unhealthy(err: &dyn std::fmt::Display) -> Response {
    tracing::error!(error = %err, "Health check failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "database": "disconnected"
        })),
    )
        .into_response()
}
