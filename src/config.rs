use crate::channels::MAX_CHANNELS;
use crate::engine::EngineSettings;
use crate::session::{BoundedWait, RecordingSettings};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Extensions `config::File::with_name` probes when none is given
const CONFIG_EXTENSIONS: [&str; 7] = ["toml", "json", "yaml", "yml", "ini", "ron", "json5"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory recordings are written to (`~` is expanded)
    pub output_dir: String,
    /// Container file extension
    pub extension: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_channels: usize,
    pub fps: u32,
    pub audio_sample_rate: u32,
    pub audio_bitrate_kbps: u32,
    pub stop_poll_interval_ms: u64,
    pub stop_poll_attempts: u32,
    pub required_modules: Vec<String>,
    /// Display geometry reported by the simulated engine
    pub display_width: u32,
    pub display_height: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "capture-control".to_string(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: "~/Videos/capture-control".to_string(),
            extension: "mp4".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        let recording = RecordingSettings::default();
        Self {
            max_channels: MAX_CHANNELS,
            fps: engine.fps,
            audio_sample_rate: engine.audio_sample_rate,
            audio_bitrate_kbps: recording.audio_bitrate_kbps,
            stop_poll_interval_ms: recording.stop_wait.interval.as_millis() as u64,
            stop_poll_attempts: recording.stop_wait.attempts,
            required_modules: engine.required_modules,
            display_width: 1920,
            display_height: 1080,
        }
    }
}

impl Config {
    /// Load `path` (any extension `config` understands) with
    /// `CAPTURE_CONTROL__SECTION__KEY` environment overrides. A missing file
    /// is not an error; every field has a default.
    pub fn load(path: &str) -> Result<Self> {
        if !config_file_exists(path) {
            warn!("Config file {} not found, using defaults", path);
        }

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CAPTURE_CONTROL").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.recording.output_dir).into_owned())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            required_modules: self.engine.required_modules.clone(),
            fps: self.engine.fps,
            audio_sample_rate: self.engine.audio_sample_rate,
            ..EngineSettings::default()
        }
    }

    pub fn recording_settings(&self) -> RecordingSettings {
        RecordingSettings {
            audio_bitrate_kbps: self.engine.audio_bitrate_kbps,
            stop_wait: BoundedWait::new(
                Duration::from_millis(self.engine.stop_poll_interval_ms),
                self.engine.stop_poll_attempts,
            ),
            ..RecordingSettings::default()
        }
    }
}

fn config_file_exists(path: &str) -> bool {
    Path::new(path).is_file()
        || CONFIG_EXTENSIONS
            .iter()
            .any(|ext| Path::new(&format!("{}.{}", path, ext)).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = Config::load("/nonexistent/capture-control").unwrap();
        assert_eq!(cfg.service.http.port, 8080);
        assert_eq!(cfg.engine.max_channels, MAX_CHANNELS);
        assert_eq!(cfg.recording_settings().stop_wait, BoundedWait::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[service.http]\nport = 9090\n\n[engine]\nmax_channels = 4\nstop_poll_attempts = 10\n\n[recording]\noutput_dir = \"/srv/rec\""
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.service.http.port, 9090);
        assert_eq!(cfg.service.http.bind, "127.0.0.1");
        assert_eq!(cfg.engine.max_channels, 4);
        assert_eq!(cfg.recording_settings().stop_wait.attempts, 10);
        assert_eq!(cfg.output_dir(), PathBuf::from("/srv/rec"));
    }

    #[test]
    fn file_is_found_with_or_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        std::fs::write(&path, "[service]\nname = \"rec\"\n").unwrap();

        let stem = dir.path().join("capture");
        assert!(config_file_exists(path.to_str().unwrap()));
        assert!(config_file_exists(stem.to_str().unwrap()));
        assert!(!config_file_exists(
            dir.path().join("missing").to_str().unwrap()
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.toml");
        std::fs::write(&path, "[engine]\nfps = 24\n").unwrap();

        std::env::set_var("CAPTURE_CONTROL__ENGINE__FPS", "30");
        let cfg = Config::load(path.to_str().unwrap());
        std::env::remove_var("CAPTURE_CONTROL__ENGINE__FPS");

        let cfg = cfg.unwrap();
        assert_eq!(cfg.engine.fps, 30);
        assert_eq!(cfg.engine_settings().fps, 30);
    }
}
