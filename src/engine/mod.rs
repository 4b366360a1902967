//! Capture engine boundary
//!
//! The capture engine is a process-wide, non-reentrant media subsystem that
//! performs the actual capture, encoding and file output. This module defines
//! the contract the session core needs from it ([`CaptureEngine`]), an owning
//! guard for engine-native objects ([`Resource`]) and the singleton wrapper
//! that arbitrates initialization ([`EngineHandle`]).

mod handle;
pub mod simulated;

pub use handle::{bitrate_for_resolution, EngineHandle, EngineLease, EngineSettings};
pub use simulated::{SimulatedEngine, SimulatedFaults};

use crate::error::EngineError;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Kind of engine-native object behind a [`ResourceId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Scene,
    DisplayCapture,
    AudioCapture,
    VideoEncoder,
    AudioEncoder,
    Output,
}

/// Opaque reference to an object living inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub raw: u64,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.raw)
    }
}

/// Probed display geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayInfo {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    pub base_width: u32,
    pub base_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Which device an audio capture source listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCaptureKind {
    /// Desktop / loopback output
    Desktop,
    /// Default input device
    Microphone,
}

/// Positional bounds of a source inside a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    Cbr,
    Vbr,
}

/// Video encoder parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderSettings {
    pub bitrate_kbps: u32,
    pub buffer_size_kbps: u32,
    pub keyframe_interval_secs: u32,
    pub rate_control: RateControl,
    pub preset: String,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoderSettings {
    pub bitrate_kbps: u32,
    pub track: u32,
}

/// Contract required from the capture engine.
///
/// Implementations are driven only from the session core and are expected to
/// do their own media work on engine-owned threads. All calls are
/// synchronous and may block briefly.
pub trait CaptureEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &str;

    fn startup(&self) -> Result<(), EngineError>;
    fn load_module(&self, module: &str) -> Result<(), EngineError>;
    fn probe_display(&self) -> Result<DisplayInfo, EngineError>;
    fn reset_video(&self, settings: &VideoSettings) -> Result<(), EngineError>;
    fn reset_audio(&self, settings: &AudioSettings) -> Result<(), EngineError>;
    fn shutdown(&self);

    fn create_scene(&self, name: &str) -> Result<ResourceId, EngineError>;
    fn create_display_capture(&self, name: &str) -> Result<ResourceId, EngineError>;
    fn create_audio_capture(
        &self,
        name: &str,
        kind: AudioCaptureKind,
    ) -> Result<ResourceId, EngineError>;
    fn add_to_scene(
        &self,
        scene: ResourceId,
        source: ResourceId,
        bounds: Bounds,
    ) -> Result<(), EngineError>;

    /// Bind (or with `None`, clear) one of the engine's output channels.
    fn set_output_channel(&self, channel: usize, source: Option<ResourceId>);

    fn create_video_encoder(
        &self,
        name: &str,
        settings: &VideoEncoderSettings,
    ) -> Result<ResourceId, EngineError>;
    fn create_audio_encoder(
        &self,
        name: &str,
        settings: &AudioEncoderSettings,
    ) -> Result<ResourceId, EngineError>;
    fn create_output(
        &self,
        name: &str,
        path: &Path,
        video_encoder: ResourceId,
        audio_encoder: ResourceId,
    ) -> Result<ResourceId, EngineError>;

    /// Begin writing. Returns `false` if the engine refused; see [`last_error`](Self::last_error).
    fn start_output(&self, output: ResourceId) -> bool;
    fn stop_output(&self, output: ResourceId);
    fn force_stop_output(&self, output: ResourceId);
    fn output_active(&self, output: ResourceId) -> bool;
    fn last_error(&self, output: ResourceId) -> Option<String>;

    fn destroy(&self, resource: ResourceId);
}

/// Exclusive ownership of one engine-native object.
///
/// The object is destroyed when the guard is dropped, so every exit path
/// (success, early return, unwinding) releases it exactly once.
pub struct Resource {
    engine: Arc<dyn CaptureEngine>,
    id: ResourceId,
}

impl Resource {
    pub fn new(engine: Arc<dyn CaptureEngine>, id: ResourceId) -> Self {
        Self { engine, id }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resource").field(&self.id).finish()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        debug!("Releasing engine resource {}", self.id);
        self.engine.destroy(self.id);
    }
}
