use crate::session::SessionManager;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Session registry (session_id → session)
    pub sessions: Arc<SessionManager>,

    /// Where recordings go when a request names no explicit path
    pub output_dir: PathBuf,

    /// Container extension for generated file names
    pub extension: String,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, output_dir: PathBuf) -> Self {
        Self {
            sessions,
            output_dir,
            extension: "mp4".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}
