//! Router configuration for the push server.

use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::ws::{push_ws_handler, PushState};

/// Create the push router (`/ws` plus `/health`).
pub fn create_router(state: Arc<PushState>) -> Router {
    Router::new()
        .route("/ws", get(push_ws_handler))
        .with_state(state)
        .merge(create_health_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
