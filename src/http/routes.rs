use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording control
        .route("/recordings", get(handlers::list_recordings))
        .route("/recordings/start", post(handlers::start_recording))
        .route("/recordings/:id/pause", post(handlers::pause_recording))
        .route("/recordings/:id/stop", post(handlers::stop_recording))
        .route("/recordings/:id/status", get(handlers::get_recording_status))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
