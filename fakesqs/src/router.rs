//! HTTP router for the fakesqs server

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use fakesqs_queue::SqsState;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the main application router
pub fn create_router(state: Arc<SqsState>) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        .with_state(state.clone())
        // Query protocol on every other path
        .merge(fakesqs_queue::router(state))
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(state): State<Arc<SqsState>>) -> impl IntoResponse {
    let attributes = state.queue.attributes();
    Json(json!({
        "status": "running",
        "pending": attributes.visible + attributes.in_flight,
        "sent": attributes.sent,
        "deleted": attributes.deleted,
    }))
}
