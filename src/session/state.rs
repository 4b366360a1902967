use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a recording session
///
/// `Idle -> Recording -> Paused -> Stopped`, with `Recording -> Stopped`
/// also allowed. Pause is one-way: nothing resumes a paused session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Requested state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Pause,
    Stop,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Stop => "stop",
        }
    }
}

impl SessionState {
    /// Target state for `op`, or `None` if the transition is not allowed.
    pub fn apply(self, op: Operation) -> Option<SessionState> {
        use Operation::*;
        use SessionState::*;

        match (self, op) {
            (Idle, Start) => Some(Recording),
            (Recording, Pause) => Some(Paused),
            (Recording, Stop) | (Paused, Stop) => Some(Stopped),
            _ => None,
        }
    }

    /// Whether the output sink is running in this state
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub id: String,
    pub output_path: String,
    pub state: SessionState,

    /// Wall-clock seconds since recording started; paused time is not subtracted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,

    pub video_channel: Option<usize>,
    pub audio_channel: Option<usize>,
    pub desktop_channel: Option<usize>,
}
