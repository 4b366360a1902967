//! HTTP control plane
//!
//! This module provides a REST API for controlling recording sessions:
//! - POST /recordings/start - Start a new recording
//! - POST /recordings/:id/pause - Mark a recording paused
//! - POST /recordings/:id/stop - Stop a recording
//! - GET /recordings/:id/status - Query session status
//! - GET /recordings - List all live sessions
//! - GET /health - Engine health

mod handlers;
mod routes;
mod state;

pub use handlers::{
    ErrorResponse, PauseRecordingResponse, StartRecordingRequest, StartRecordingResponse,
    StopRecordingResponse,
};
pub use routes::create_router;
pub use state::AppState;
