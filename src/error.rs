//! Error types for the session core
//!
//! Every failure a control-plane caller can observe is a [`SessionError`]
//! with a stable machine-readable [`SessionError::kind`].

use crate::session::SessionState;
use thiserror::Error;

/// Failure reported by the capture engine collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine startup failed: {0}")]
    Startup(String),

    #[error("required module '{0}' failed to load")]
    ModuleLoad(String),

    #[error("hardware probe failed: {0}")]
    Probe(String),

    #[error("video/audio reset failed: {0}")]
    Reset(String),

    #[error("failed to create {what}: {message}")]
    Create { what: &'static str, message: String },

    #[error("engine is not initialized")]
    NotInitialized,
}

/// Channel pool failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationError {
    #[error("channel pool exhausted: requested {requested}, {available} free")]
    Exhausted { requested: usize, available: usize },

    #[error("invalid channel request of {0} slots (expected 1..=3)")]
    InvalidCount(usize),
}

/// Errors surfaced by sessions and the session manager.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session '{0}' already exists")]
    Conflict(String),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("cannot {op} session in state {from}")]
    InvalidTransition {
        from: SessionState,
        op: &'static str,
    },

    #[error("engine initialization failed: {0}")]
    EngineInit(#[source] EngineError),

    #[error("resource setup failed: {0}")]
    ResourceSetup(String),

    #[error("encoder setup failed: {0}")]
    EncoderSetup(String),

    #[error("failed to start recording: {0}")]
    Start(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable identifier used in control-plane error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Conflict(_) => "conflict",
            SessionError::NotFound(_) => "not_found",
            SessionError::InvalidTransition { .. } => "invalid_transition",
            SessionError::EngineInit(_) => "engine_init_error",
            SessionError::ResourceSetup(_) => "resource_setup_error",
            SessionError::EncoderSetup(_) => "encoder_setup_error",
            SessionError::Start(_) => "start_error",
            SessionError::Internal(_) => "internal",
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
