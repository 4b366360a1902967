use super::wait::BoundedWait;
use chrono::Local;
use std::path::{Path, PathBuf};

/// Identity and destination of a single recording session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "standup-2025-10-28")
    pub session_id: String,

    /// File the engine writes the recording to
    pub output_path: PathBuf,
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            output_path: output_path.into(),
        }
    }

    /// Place the recording in `output_dir` as `<id>-<local timestamp>.<extension>`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` in the id are replaced with `_` in
    /// the file name, so the file always lands directly inside `output_dir`.
    pub fn in_dir(session_id: impl Into<String>, output_dir: &Path, extension: &str) -> Self {
        let session_id = session_id.into();
        let file_name = format!(
            "{}-{}.{}",
            file_stem(&session_id),
            Local::now().format("%Y-%m-%d_%H-%M-%S"),
            extension
        );
        let output_path = output_dir.join(file_name);
        Self {
            session_id,
            output_path,
        }
    }

    pub fn generate_id() -> String {
        format!("session-{}", uuid::Uuid::new_v4())
    }
}

fn file_stem(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Encoder and shutdown policy shared by all sessions
#[derive(Debug, Clone)]
pub struct RecordingSettings {
    /// Audio encoder bitrate (kbps)
    pub audio_bitrate_kbps: u32,

    /// Seconds between forced keyframes
    pub keyframe_interval_secs: u32,

    pub encoder_preset: String,
    pub encoder_profile: String,

    /// How long `stop` waits for the output to wind down before forcing it
    pub stop_wait: BoundedWait,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            audio_bitrate_kbps: 320,
            keyframe_interval_secs: 2,
            encoder_preset: "quality".to_string(),
            encoder_profile: "high".to_string(),
            stop_wait: BoundedWait::default(),
        }
    }
}
