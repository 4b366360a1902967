//! In-memory capture engine
//!
//! Implements the [`CaptureEngine`] contract without touching hardware. Used
//! when no native engine is available and by the test suite, which injects
//! failures through [`SimulatedFaults`] and inspects the live object table to
//! prove that sessions never leak engine resources.

use super::{
    AudioCaptureKind, AudioEncoderSettings, AudioSettings, Bounds, CaptureEngine, DisplayInfo,
    ResourceId, ResourceKind, VideoEncoderSettings, VideoSettings,
};
use crate::error::EngineError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Failures to inject into the next calls.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFaults {
    pub startup: bool,
    pub missing_module: Option<String>,
    pub probe: bool,
    pub display_capture: bool,
    pub audio_capture: bool,
    pub video_encoder: bool,
    pub audio_encoder: bool,
    pub output_create: bool,
    /// Refuse `start_output` with this diagnostic
    pub output_start: Option<String>,
    /// Ignore graceful stops so only a forced stop ends the output
    pub stall_stop: bool,
}

#[derive(Debug)]
struct OutputState {
    path: PathBuf,
    active: bool,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    startups: usize,
    next_id: u64,
    live: HashMap<u64, ResourceKind>,
    outputs: HashMap<u64, OutputState>,
    channels: HashMap<usize, ResourceId>,
    scene_items: HashMap<u64, Vec<(ResourceId, Bounds)>>,
    video: Option<VideoSettings>,
    video_encoders: HashMap<u64, VideoEncoderSettings>,
    forced_stops: usize,
    faults: SimulatedFaults,
}

pub struct SimulatedEngine {
    display: DisplayInfo,
    inner: Mutex<Inner>,
}

impl SimulatedEngine {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            display: DisplayInfo { width, height },
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn set_faults(&self, faults: SimulatedFaults) {
        self.inner.lock().faults = faults;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn startup_count(&self) -> usize {
        self.inner.lock().startups
    }

    /// Number of engine objects created and not yet destroyed
    pub fn live_resources(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn live_of_kind(&self, kind: ResourceKind) -> usize {
        self.inner
            .lock()
            .live
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    /// Output channels that currently have a source bound
    pub fn bound_channels(&self) -> Vec<usize> {
        let mut channels: Vec<usize> = self.inner.lock().channels.keys().copied().collect();
        channels.sort_unstable();
        channels
    }

    pub fn active_outputs(&self) -> usize {
        self.inner
            .lock()
            .outputs
            .values()
            .filter(|o| o.active)
            .count()
    }

    pub fn forced_stops(&self) -> usize {
        self.inner.lock().forced_stops
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.inner
            .lock()
            .outputs
            .values()
            .map(|o| o.path.clone())
            .collect()
    }

    pub fn video_encoder_settings(&self) -> Vec<VideoEncoderSettings> {
        self.inner.lock().video_encoders.values().cloned().collect()
    }

    pub fn video_settings(&self) -> Option<VideoSettings> {
        self.inner.lock().video.clone()
    }

    fn create(
        &self,
        kind: ResourceKind,
        fail: impl FnOnce(&SimulatedFaults) -> bool,
        what: &'static str,
    ) -> Result<ResourceId, EngineError> {
        let mut inner = self.inner.lock();
        if !inner.running {
            return Err(EngineError::NotInitialized);
        }
        if fail(&inner.faults) {
            return Err(EngineError::Create {
                what,
                message: format!("simulated {} failure", what),
            });
        }

        inner.next_id += 1;
        let raw = inner.next_id;
        inner.live.insert(raw, kind);
        debug!("Simulated engine created {:?}#{}", kind, raw);
        Ok(ResourceId { kind, raw })
    }

    fn check_live(inner: &Inner, id: ResourceId) -> Result<(), EngineError> {
        match inner.live.get(&id.raw) {
            Some(kind) if *kind == id.kind => Ok(()),
            _ => Err(EngineError::Create {
                what: "binding",
                message: format!("unknown resource {}", id),
            }),
        }
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl CaptureEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    fn startup(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if inner.faults.startup {
            return Err(EngineError::Startup("simulated startup failure".to_string()));
        }
        inner.running = true;
        inner.startups += 1;
        Ok(())
    }

    fn load_module(&self, module: &str) -> Result<(), EngineError> {
        let inner = self.inner.lock();
        if inner.faults.missing_module.as_deref() == Some(module) {
            return Err(EngineError::ModuleLoad(module.to_string()));
        }
        Ok(())
    }

    fn probe_display(&self) -> Result<DisplayInfo, EngineError> {
        if self.inner.lock().faults.probe {
            return Err(EngineError::Probe("no display attached".to_string()));
        }
        Ok(self.display)
    }

    fn reset_video(&self, settings: &VideoSettings) -> Result<(), EngineError> {
        self.inner.lock().video = Some(settings.clone());
        Ok(())
    }

    fn reset_audio(&self, _settings: &AudioSettings) -> Result<(), EngineError> {
        Ok(())
    }

    fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if !inner.live.is_empty() {
            warn!(
                "Simulated engine shut down with {} live resources",
                inner.live.len()
            );
        }
        inner.running = false;
        inner.video = None;
    }

    fn create_scene(&self, _name: &str) -> Result<ResourceId, EngineError> {
        self.create(ResourceKind::Scene, |_| false, "scene")
    }

    fn create_display_capture(&self, _name: &str) -> Result<ResourceId, EngineError> {
        self.create(
            ResourceKind::DisplayCapture,
            |f| f.display_capture,
            "display capture",
        )
    }

    fn create_audio_capture(
        &self,
        _name: &str,
        _kind: AudioCaptureKind,
    ) -> Result<ResourceId, EngineError> {
        self.create(
            ResourceKind::AudioCapture,
            |f| f.audio_capture,
            "audio capture",
        )
    }

    fn add_to_scene(
        &self,
        scene: ResourceId,
        source: ResourceId,
        bounds: Bounds,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        Self::check_live(&inner, scene)?;
        Self::check_live(&inner, source)?;
        inner
            .scene_items
            .entry(scene.raw)
            .or_default()
            .push((source, bounds));
        Ok(())
    }

    fn set_output_channel(&self, channel: usize, source: Option<ResourceId>) {
        let mut inner = self.inner.lock();
        match source {
            Some(source) => {
                inner.channels.insert(channel, source);
            }
            None => {
                inner.channels.remove(&channel);
            }
        }
    }

    fn create_video_encoder(
        &self,
        _name: &str,
        settings: &VideoEncoderSettings,
    ) -> Result<ResourceId, EngineError> {
        let id = self.create(
            ResourceKind::VideoEncoder,
            |f| f.video_encoder,
            "video encoder",
        )?;
        self.inner
            .lock()
            .video_encoders
            .insert(id.raw, settings.clone());
        Ok(id)
    }

    fn create_audio_encoder(
        &self,
        _name: &str,
        _settings: &AudioEncoderSettings,
    ) -> Result<ResourceId, EngineError> {
        self.create(
            ResourceKind::AudioEncoder,
            |f| f.audio_encoder,
            "audio encoder",
        )
    }

    fn create_output(
        &self,
        _name: &str,
        path: &Path,
        video_encoder: ResourceId,
        audio_encoder: ResourceId,
    ) -> Result<ResourceId, EngineError> {
        {
            let inner = self.inner.lock();
            Self::check_live(&inner, video_encoder)?;
            Self::check_live(&inner, audio_encoder)?;
        }
        let id = self.create(ResourceKind::Output, |f| f.output_create, "output")?;
        self.inner.lock().outputs.insert(
            id.raw,
            OutputState {
                path: path.to_path_buf(),
                active: false,
                last_error: None,
            },
        );
        Ok(id)
    }

    fn start_output(&self, output: ResourceId) -> bool {
        let mut inner = self.inner.lock();
        let refusal = inner.faults.output_start.clone();
        let Some(state) = inner.outputs.get_mut(&output.raw) else {
            return false;
        };
        match refusal {
            Some(message) => {
                state.last_error = Some(message);
                false
            }
            None => {
                state.active = true;
                true
            }
        }
    }

    fn stop_output(&self, output: ResourceId) {
        let mut inner = self.inner.lock();
        let stall = inner.faults.stall_stop;
        if let Some(state) = inner.outputs.get_mut(&output.raw) {
            if !stall {
                state.active = false;
            }
        }
    }

    fn force_stop_output(&self, output: ResourceId) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.outputs.get_mut(&output.raw) {
            state.active = false;
        }
        inner.forced_stops += 1;
    }

    fn output_active(&self, output: ResourceId) -> bool {
        self.inner
            .lock()
            .outputs
            .get(&output.raw)
            .map(|o| o.active)
            .unwrap_or(false)
    }

    fn last_error(&self, output: ResourceId) -> Option<String> {
        self.inner
            .lock()
            .outputs
            .get(&output.raw)
            .and_then(|o| o.last_error.clone())
    }

    fn destroy(&self, resource: ResourceId) {
        let mut inner = self.inner.lock();
        if inner.live.remove(&resource.raw).is_none() {
            warn!("Simulated engine asked to destroy unknown {}", resource);
            return;
        }
        inner.outputs.remove(&resource.raw);
        inner.scene_items.remove(&resource.raw);
        inner.video_encoders.remove(&resource.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RateControl;

    #[test]
    fn creation_requires_startup() {
        let engine = SimulatedEngine::default();
        assert_eq!(
            engine.create_scene("scene"),
            Err(EngineError::NotInitialized)
        );

        engine.startup().unwrap();
        let scene = engine.create_scene("scene").unwrap();
        assert_eq!(scene.kind, ResourceKind::Scene);
        assert_eq!(engine.live_resources(), 1);

        engine.destroy(scene);
        assert_eq!(engine.live_resources(), 0);
    }

    #[test]
    fn refused_start_records_diagnostic() {
        let engine = SimulatedEngine::default();
        engine.startup().unwrap();
        engine.set_faults(SimulatedFaults {
            output_start: Some("disk full".to_string()),
            ..Default::default()
        });

        let venc = engine
            .create_video_encoder(
                "v",
                &VideoEncoderSettings {
                    bitrate_kbps: 1,
                    buffer_size_kbps: 1,
                    keyframe_interval_secs: 2,
                    rate_control: RateControl::Cbr,
                    preset: "quality".into(),
                    profile: "high".into(),
                },
            )
            .unwrap();
        let aenc = engine
            .create_audio_encoder(
                "a",
                &AudioEncoderSettings {
                    bitrate_kbps: 320,
                    track: 0,
                },
            )
            .unwrap();
        let out = engine
            .create_output("o", Path::new("/tmp/x.mp4"), venc, aenc)
            .unwrap();

        assert!(!engine.start_output(out));
        assert_eq!(engine.last_error(out).as_deref(), Some("disk full"));
        assert!(!engine.output_active(out));
    }

    #[test]
    fn stalled_stop_needs_force() {
        let engine = SimulatedEngine::default();
        engine.startup().unwrap();
        let venc = engine
            .create_video_encoder(
                "v",
                &VideoEncoderSettings {
                    bitrate_kbps: 1,
                    buffer_size_kbps: 1,
                    keyframe_interval_secs: 2,
                    rate_control: RateControl::Cbr,
                    preset: "quality".into(),
                    profile: "high".into(),
                },
            )
            .unwrap();
        let aenc = engine
            .create_audio_encoder(
                "a",
                &AudioEncoderSettings {
                    bitrate_kbps: 320,
                    track: 0,
                },
            )
            .unwrap();
        let out = engine
            .create_output("o", Path::new("/tmp/x.mp4"), venc, aenc)
            .unwrap();
        engine.set_faults(SimulatedFaults {
            stall_stop: true,
            ..Default::default()
        });

        assert!(engine.start_output(out));
        engine.stop_output(out);
        assert!(engine.output_active(out));
        engine.force_stop_output(out);
        assert!(!engine.output_active(out));
        assert_eq!(engine.forced_stops(), 1);
    }
}
