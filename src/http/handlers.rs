use super::state::AppState;
use crate::error::{SessionError, SessionResult};
use crate::session::{HealthStatus, SessionConfig, SessionState, SessionStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartRecordingRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub id: Option<String>,

    /// Optional explicit output file; defaults to a timestamped file in the output dir
    pub output_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRecordingResponse {
    pub id: String,
    pub output_path: String,
    pub status: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PauseRecordingResponse {
    pub id: String,
    pub status: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopRecordingResponse {
    pub id: String,
    pub output_path: String,
    pub status: SessionState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: Option<String>,
    pub kind: String,
    pub error: String,
}

/// A session error tagged with the id it concerns
#[derive(Debug)]
pub struct ApiError {
    id: Option<String>,
    error: SessionError,
}

impl ApiError {
    fn new(id: &str, error: SessionError) -> Self {
        Self {
            id: Some(id.to_string()),
            error,
        }
    }
}

pub fn status_code(error: &SessionError) -> StatusCode {
    match error {
        SessionError::Conflict(_) => StatusCode::CONFLICT,
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::EngineInit(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::ResourceSetup(_) => StatusCode::INSUFFICIENT_STORAGE,
        SessionError::EncoderSetup(_) => StatusCode::FAILED_DEPENDENCY,
        SessionError::Start(_) => StatusCode::BAD_GATEWAY,
        SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            status_code(&self.error),
            Json(ErrorResponse {
                id: self.id,
                kind: self.error.kind().to_string(),
                error: self.error.to_string(),
            }),
        )
            .into_response()
    }
}

/// Run a session call on the blocking pool.
///
/// Session operations may wait on the engine, so they never run on the async
/// workers. A panic inside the call is reported as an internal error instead
/// of taking the server down.
async fn run_blocking<T, F>(id: &str, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> SessionResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| ApiError::new(id, e)),
        Err(e) => {
            error!("Session {} call failed: {}", id, e);
            Err(ApiError::new(
                id,
                SessionError::Internal("session operation aborted".to_string()),
            ))
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recordings/start
/// Start a new recording session
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> Result<Json<StartRecordingResponse>, ApiError> {
    // Generate or use provided session ID
    let id = req.id.unwrap_or_else(SessionConfig::generate_id);

    let config = match req.output_path {
        Some(path) => SessionConfig::new(id.clone(), path),
        None => SessionConfig::in_dir(id.clone(), &state.output_dir, &state.extension),
    };

    info!("Starting recording for session: {}", id);

    let sessions = state.sessions.clone();
    let status = run_blocking(&id, move || sessions.create(config)).await?;

    Ok(Json(StartRecordingResponse {
        id: status.id,
        output_path: status.output_path,
        status: status.state,
    }))
}

/// POST /recordings/:id/pause
pub async fn pause_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PauseRecordingResponse>, ApiError> {
    let sessions = state.sessions.clone();
    let session_id = id.clone();
    let status = run_blocking(&id, move || sessions.pause(&session_id)).await?;

    Ok(Json(PauseRecordingResponse {
        id: status.id,
        status: status.state,
    }))
}

/// POST /recordings/:id/stop
/// Stop a session and return the file it wrote
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StopRecordingResponse>, ApiError> {
    info!("Stopping recording for session: {}", id);

    let sessions = state.sessions.clone();
    let session_id = id.clone();
    let output_path = run_blocking(&id, move || sessions.stop(&session_id)).await?;

    Ok(Json(StopRecordingResponse {
        id,
        output_path: output_path.display().to_string(),
        status: SessionState::Stopped,
    }))
}

/// GET /recordings/:id/status
pub async fn get_recording_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    let sessions = state.sessions.clone();
    let session_id = id.clone();
    let status = run_blocking(&id, move || sessions.status(&session_id)).await?;
    Ok(Json(status))
}

/// GET /recordings
pub async fn list_recordings(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.clone();
    match tokio::task::spawn_blocking(move || sessions.list_all()).await {
        Ok(statuses) => (StatusCode::OK, Json(statuses)).into_response(),
        Err(e) => {
            error!("Listing sessions failed: {}", e);
            ApiError {
                id: None,
                error: SessionError::Internal("listing sessions aborted".to_string()),
            }
            .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.sessions.health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn every_kind_has_its_own_status() {
        let errors = [
            SessionError::Conflict("a".into()),
            SessionError::NotFound("a".into()),
            SessionError::InvalidTransition {
                from: SessionState::Idle,
                op: "pause",
            },
            SessionError::EngineInit(EngineError::NotInitialized),
            SessionError::ResourceSetup("x".into()),
            SessionError::EncoderSetup("x".into()),
            SessionError::Start("x".into()),
            SessionError::Internal("x".into()),
        ];

        let mut codes: Vec<u16> = errors.iter().map(|e| status_code(e).as_u16()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
