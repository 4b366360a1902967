use super::config::{RecordingSettings, SessionConfig};
use super::state::{Operation, SessionState, SessionStatus};
use crate::channels::{ChannelAllocator, ChannelLease};
use crate::engine::{
    AudioCaptureKind, AudioEncoderSettings, Bounds, CaptureEngine, EngineHandle, EngineLease,
    RateControl, Resource, ResourceId, VideoEncoderSettings,
};
use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// An engine output channel bound to a source for as long as the slot is held.
struct BoundChannel {
    engine: Arc<dyn CaptureEngine>,
    lease: ChannelLease,
}

impl BoundChannel {
    fn bind(engine: Arc<dyn CaptureEngine>, lease: ChannelLease, source: ResourceId) -> Self {
        engine.set_output_channel(lease.index(), Some(source));
        Self { engine, lease }
    }

    fn index(&self) -> usize {
        self.lease.index()
    }
}

impl Drop for BoundChannel {
    fn drop(&mut self) {
        // Unbind before the lease returns the slot to the pool
        self.engine.set_output_channel(self.lease.index(), None);
    }
}

/// Engine objects owned by one session.
///
/// Fields drop in declaration order, which is the teardown order: the output
/// goes first, the engine lease last.
#[derive(Default)]
struct SessionResources {
    output: Option<Resource>,
    video_encoder: Option<Resource>,
    audio_encoder: Option<Resource>,
    video_channel: Option<BoundChannel>,
    audio_channel: Option<BoundChannel>,
    desktop_channel: Option<BoundChannel>,
    display_capture: Option<Resource>,
    mic_source: Option<Resource>,
    desktop_source: Option<Resource>,
    scene: Option<Resource>,
    lease: Option<EngineLease>,
}

impl SessionResources {
    fn release(&mut self) {
        drop(std::mem::take(self));
    }

    fn has_sources(&self) -> bool {
        self.scene.is_some()
    }
}

struct SessionInner {
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    paused_at: Option<DateTime<Utc>>,
    resources: SessionResources,
}

/// One recording request bound to the shared capture engine.
///
/// Every operation runs under the session's own lock. Engine objects and
/// channel slots are owned through guards, so they are released exactly once
/// whether the session stops cleanly, fails half-way through setup, or is
/// simply dropped.
pub struct RecordingSession {
    config: SessionConfig,
    engine: Arc<EngineHandle>,
    channels: Arc<ChannelAllocator>,
    settings: RecordingSettings,
    inner: Mutex<SessionInner>,
}

impl RecordingSession {
    pub fn new(
        config: SessionConfig,
        engine: Arc<EngineHandle>,
        channels: Arc<ChannelAllocator>,
        settings: RecordingSettings,
    ) -> Self {
        debug!("Creating recording session: {}", config.session_id);
        Self {
            config,
            engine,
            channels,
            settings,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                started_at: None,
                started_instant: None,
                paused_at: None,
                resources: SessionResources::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn output_path(&self) -> &Path {
        &self.config.output_path
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    fn engine(&self) -> Arc<dyn CaptureEngine> {
        Arc::clone(self.engine.engine())
    }

    /// Build the scene graph and claim output channels.
    ///
    /// The video channel is mandatory. Desktop and microphone audio are
    /// best-effort and are skipped with a warning when no slot or source is
    /// available.
    pub fn setup_sources(&self) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            return Err(SessionError::InvalidTransition {
                from: inner.state,
                op: "set up",
            });
        }
        if inner.resources.has_sources() {
            return Ok(());
        }

        let id = self.id();
        let lease = self
            .engine
            .lease()
            .map_err(|e| SessionError::ResourceSetup(e.to_string()))?;
        let display = self.engine.display().ok_or_else(|| {
            SessionError::ResourceSetup("engine has no probed display".to_string())
        })?;

        let video_lease = self
            .channels
            .lease(1)
            .map_err(|e| SessionError::ResourceSetup(format!("no video channel: {}", e)))?;

        let engine = self.engine();
        let scene = engine
            .create_scene(&format!("{}-scene", id))
            .map(|rid| Resource::new(Arc::clone(&engine), rid))
            .map_err(|e| SessionError::ResourceSetup(e.to_string()))?;
        let capture = engine
            .create_display_capture(&format!("{}-display", id))
            .map(|rid| Resource::new(Arc::clone(&engine), rid))
            .map_err(|e| SessionError::ResourceSetup(e.to_string()))?;

        engine
            .add_to_scene(
                scene.id(),
                capture.id(),
                Bounds {
                    x: 0,
                    y: 0,
                    width: display.width,
                    height: display.height,
                },
            )
            .map_err(|e| SessionError::ResourceSetup(e.to_string()))?;

        let video_channel = BoundChannel::bind(Arc::clone(&engine), video_lease, scene.id());
        let desktop = self.bind_audio(AudioCaptureKind::Desktop);
        let mic = self.bind_audio(AudioCaptureKind::Microphone);

        info!(
            "Session {} sources ready (video channel {}, desktop audio {:?}, mic {:?})",
            id,
            video_channel.index(),
            desktop.as_ref().map(|(_, ch)| ch.index()),
            mic.as_ref().map(|(_, ch)| ch.index()),
        );

        let resources = &mut inner.resources;
        resources.lease = Some(lease);
        resources.scene = Some(scene);
        resources.display_capture = Some(capture);
        resources.video_channel = Some(video_channel);
        if let Some((source, channel)) = desktop {
            resources.desktop_source = Some(source);
            resources.desktop_channel = Some(channel);
        }
        if let Some((source, channel)) = mic {
            resources.mic_source = Some(source);
            resources.audio_channel = Some(channel);
        }

        Ok(())
    }

    fn bind_audio(&self, kind: AudioCaptureKind) -> Option<(Resource, BoundChannel)> {
        let lease = match self.channels.lease(1) {
            Ok(lease) => lease,
            Err(e) => {
                warn!(
                    "Session {}: no channel for {:?} audio, continuing without it ({})",
                    self.id(),
                    kind,
                    e
                );
                return None;
            }
        };

        let engine = self.engine();
        let name = match kind {
            AudioCaptureKind::Desktop => format!("{}-desktop-audio", self.id()),
            AudioCaptureKind::Microphone => format!("{}-mic", self.id()),
        };
        match engine.create_audio_capture(&name, kind) {
            Ok(rid) => {
                let source = Resource::new(Arc::clone(&engine), rid);
                let channel = BoundChannel::bind(engine, lease, source.id());
                Some((source, channel))
            }
            Err(e) => {
                warn!(
                    "Session {}: {:?} audio source unavailable, continuing without it ({})",
                    self.id(),
                    kind,
                    e
                );
                None
            }
        }
    }

    /// Create the video and audio encoders.
    ///
    /// Video runs constant bitrate at the engine's recommended rate with a
    /// buffer the size of the bitrate.
    pub fn setup_encoding(&self) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        if !inner.resources.has_sources() {
            return Err(SessionError::EncoderSetup(
                "sources must be set up first".to_string(),
            ));
        }

        let bitrate = self
            .engine
            .recommended_bitrate()
            .map_err(|e| SessionError::EncoderSetup(e.to_string()))?;
        let video_settings = VideoEncoderSettings {
            bitrate_kbps: bitrate,
            buffer_size_kbps: bitrate,
            keyframe_interval_secs: self.settings.keyframe_interval_secs,
            rate_control: RateControl::Cbr,
            preset: self.settings.encoder_preset.clone(),
            profile: self.settings.encoder_profile.clone(),
        };
        let audio_settings = AudioEncoderSettings {
            bitrate_kbps: self.settings.audio_bitrate_kbps,
            track: 0,
        };

        let engine = self.engine();
        let video_encoder = engine
            .create_video_encoder(&format!("{}-video-encoder", self.id()), &video_settings)
            .map(|rid| Resource::new(Arc::clone(&engine), rid))
            .map_err(|e| SessionError::EncoderSetup(e.to_string()))?;
        let audio_encoder = engine
            .create_audio_encoder(&format!("{}-audio-encoder", self.id()), &audio_settings)
            .map(|rid| Resource::new(Arc::clone(&engine), rid))
            .map_err(|e| SessionError::EncoderSetup(e.to_string()))?;

        debug!(
            "Session {} encoders ready ({} kbps video, {} kbps audio)",
            self.id(),
            bitrate,
            audio_settings.bitrate_kbps
        );

        inner.resources.video_encoder = Some(video_encoder);
        inner.resources.audio_encoder = Some(audio_encoder);
        Ok(())
    }

    /// Bind the encoders to a file output and begin writing.
    ///
    /// On failure the session stays `Idle` and the output is discarded.
    pub fn start(&self) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        let next = inner
            .state
            .apply(Operation::Start)
            .ok_or(SessionError::InvalidTransition {
                from: inner.state,
                op: Operation::Start.name(),
            })?;

        let (Some(video_encoder), Some(audio_encoder)) = (
            inner.resources.video_encoder.as_ref().map(Resource::id),
            inner.resources.audio_encoder.as_ref().map(Resource::id),
        ) else {
            return Err(SessionError::Start(
                "encoders must be set up first".to_string(),
            ));
        };

        let engine = self.engine();
        let output = engine
            .create_output(
                &format!("{}-output", self.id()),
                &self.config.output_path,
                video_encoder,
                audio_encoder,
            )
            .map(|rid| Resource::new(Arc::clone(&engine), rid))
            .map_err(|e| SessionError::Start(e.to_string()))?;

        if !engine.start_output(output.id()) {
            let diagnostic = engine
                .last_error(output.id())
                .unwrap_or_else(|| "engine refused to start output".to_string());
            warn!("Session {} failed to start: {}", self.id(), diagnostic);
            return Err(SessionError::Start(diagnostic));
        }

        inner.resources.output = Some(output);
        inner.state = next;
        inner.started_at = Some(Utc::now());
        inner.started_instant = Some(Instant::now());

        info!(
            "Session {} recording to {}",
            self.id(),
            self.config.output_path.display()
        );
        Ok(())
    }

    /// Mark the session paused.
    ///
    /// The engine has no real pause, so media keeps flowing into the file;
    /// only the session state and `paused_at` change.
    pub fn pause(&self) -> SessionResult<()> {
        let mut inner = self.inner.lock();
        let next = inner
            .state
            .apply(Operation::Pause)
            .ok_or(SessionError::InvalidTransition {
                from: inner.state,
                op: Operation::Pause.name(),
            })?;

        inner.state = next;
        inner.paused_at = Some(Utc::now());
        info!("Session {} paused", self.id());
        Ok(())
    }

    /// Stop the output and release every engine object and channel slot.
    ///
    /// Always ends in `Stopped`; an output that does not wind down within the
    /// configured wait is force-stopped.
    pub fn stop(&self) -> SessionResult<PathBuf> {
        let mut inner = self.inner.lock();
        let next = inner
            .state
            .apply(Operation::Stop)
            .ok_or(SessionError::InvalidTransition {
                from: inner.state,
                op: Operation::Stop.name(),
            })?;

        info!("Stopping session {}", self.id());
        self.halt_output(&inner.resources);
        inner.resources.release();
        inner.state = next;

        info!("Session {} stopped", self.id());
        Ok(self.config.output_path.clone())
    }

    fn halt_output(&self, resources: &SessionResources) {
        let Some(output) = resources.output.as_ref().map(Resource::id) else {
            return;
        };

        let engine = self.engine();
        engine.stop_output(output);

        let wait = self.settings.stop_wait;
        if !wait.until(|| !engine.output_active(output)) {
            warn!(
                "Session {} output still active after {:?}, forcing stop",
                self.id(),
                wait.max_duration()
            );
            engine.force_stop_output(output);
        }
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.inner.lock();
        let resources = &inner.resources;

        let duration_seconds = if inner.state.is_active() {
            inner.started_instant.map(|t| t.elapsed().as_secs_f64())
        } else {
            None
        };

        SessionStatus {
            id: self.config.session_id.clone(),
            output_path: self.config.output_path.display().to_string(),
            state: inner.state,
            duration_seconds,
            started_at: inner.started_at,
            paused_at: inner.paused_at,
            video_channel: resources.video_channel.as_ref().map(BoundChannel::index),
            audio_channel: resources.audio_channel.as_ref().map(BoundChannel::index),
            desktop_channel: resources.desktop_channel.as_ref().map(BoundChannel::index),
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let active = self.inner.get_mut().state.is_active();
        if active {
            warn!("Session {} dropped while recording, stopping", self.id());
            self.halt_output(&self.inner.lock().resources);
        }

        let inner = self.inner.get_mut();
        if active {
            inner.state = SessionState::Stopped;
        }
        inner.resources.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSettings, ResourceKind, SimulatedEngine, SimulatedFaults};
    use crate::session::BoundedWait;
    use std::time::Duration;

    struct Fixture {
        engine: Arc<SimulatedEngine>,
        handle: Arc<EngineHandle>,
        channels: Arc<ChannelAllocator>,
    }

    impl Fixture {
        fn new(capacity: usize) -> Self {
            let engine = Arc::new(SimulatedEngine::new(1920, 1080));
            let handle = Arc::new(EngineHandle::new(
                engine.clone(),
                EngineSettings::default(),
            ));
            handle.initialize().unwrap();
            Self {
                engine,
                handle,
                channels: Arc::new(ChannelAllocator::new(capacity)),
            }
        }

        fn session(&self, id: &str) -> RecordingSession {
            let settings = RecordingSettings {
                stop_wait: BoundedWait::new(Duration::from_millis(1), 3),
                ..Default::default()
            };
            RecordingSession::new(
                SessionConfig::new(id, format!("/tmp/{}.mp4", id)),
                Arc::clone(&self.handle),
                Arc::clone(&self.channels),
                settings,
            )
        }

        fn started(&self, id: &str) -> RecordingSession {
            let session = self.session(id);
            session.setup_sources().unwrap();
            session.setup_encoding().unwrap();
            session.start().unwrap();
            session
        }
    }

    #[test]
    fn full_lifecycle_releases_everything() {
        let fx = Fixture::new(8);
        let session = fx.started("s1");

        let status = session.status();
        assert_eq!(status.state, SessionState::Recording);
        assert_eq!(status.video_channel, Some(0));
        assert_eq!(status.desktop_channel, Some(1));
        assert_eq!(status.audio_channel, Some(2));
        assert!(status.duration_seconds.unwrap() >= 0.0);
        assert_eq!(fx.engine.active_outputs(), 1);
        assert_eq!(fx.engine.bound_channels(), vec![0, 1, 2]);
        assert_eq!(fx.engine.output_paths(), vec![session.output_path().to_path_buf()]);

        let path = session.stop().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/s1.mp4"));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.status().duration_seconds, None);
        assert_eq!(fx.engine.live_resources(), 0);
        assert!(fx.engine.bound_channels().is_empty());
        assert!(fx.channels.in_use().is_empty());
        assert_eq!(fx.handle.active_leases(), 0);
    }

    #[test]
    fn encoder_uses_recommended_bitrate() {
        let fx = Fixture::new(8);
        let session = fx.session("s1");
        session.setup_sources().unwrap();
        session.setup_encoding().unwrap();

        let settings = fx.engine.video_encoder_settings();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].bitrate_kbps, 12_000);
        assert_eq!(settings[0].buffer_size_kbps, 12_000);
        assert_eq!(settings[0].keyframe_interval_secs, 2);
        assert_eq!(settings[0].rate_control, RateControl::Cbr);
    }

    #[test]
    fn audio_is_best_effort() {
        let fx = Fixture::new(1);
        let session = fx.started("s1");

        let status = session.status();
        assert_eq!(status.video_channel, Some(0));
        assert_eq!(status.audio_channel, None);
        assert_eq!(status.desktop_channel, None);
    }

    #[test]
    fn failing_audio_source_releases_its_slot() {
        let fx = Fixture::new(4);
        fx.engine.set_faults(SimulatedFaults {
            audio_capture: true,
            ..Default::default()
        });
        let session = fx.started("s1");

        assert_eq!(session.status().desktop_channel, None);
        assert_eq!(fx.channels.in_use(), vec![0]);
    }

    #[test]
    fn missing_video_channel_is_fatal() {
        let fx = Fixture::new(1);
        let _holder = fx.channels.lease(1).unwrap();
        let session = fx.session("s1");

        let err = session.setup_sources().unwrap_err();
        assert!(matches!(err, SessionError::ResourceSetup(_)));
        assert_eq!(fx.engine.live_resources(), 0);
        assert_eq!(fx.handle.active_leases(), 0);
    }

    #[test]
    fn capture_failure_rolls_back_scene_and_slot() {
        let fx = Fixture::new(4);
        fx.engine.set_faults(SimulatedFaults {
            display_capture: true,
            ..Default::default()
        });
        let session = fx.session("s1");

        assert!(matches!(
            session.setup_sources(),
            Err(SessionError::ResourceSetup(_))
        ));
        assert_eq!(fx.engine.live_resources(), 0);
        assert!(fx.channels.in_use().is_empty());
    }

    #[test]
    fn audio_encoder_failure_leaves_no_video_encoder() {
        let fx = Fixture::new(4);
        let session = fx.session("s1");
        session.setup_sources().unwrap();
        fx.engine.set_faults(SimulatedFaults {
            audio_encoder: true,
            ..Default::default()
        });

        assert!(matches!(
            session.setup_encoding(),
            Err(SessionError::EncoderSetup(_))
        ));
        assert_eq!(fx.engine.live_of_kind(ResourceKind::VideoEncoder), 0);
    }

    #[test]
    fn refused_start_stays_idle_with_diagnostic() {
        let fx = Fixture::new(4);
        let session = fx.session("s1");
        session.setup_sources().unwrap();
        session.setup_encoding().unwrap();
        fx.engine.set_faults(SimulatedFaults {
            output_start: Some("permission denied".to_string()),
            ..Default::default()
        });

        match session.start() {
            Err(SessionError::Start(message)) => assert_eq!(message, "permission denied"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(fx.engine.live_of_kind(ResourceKind::Output), 0);
    }

    #[test]
    fn pause_is_annotation_only() {
        let fx = Fixture::new(4);
        let session = fx.started("s1");

        session.pause().unwrap();
        let status = session.status();
        assert_eq!(status.state, SessionState::Paused);
        assert!(status.paused_at.is_some());
        assert!(status.duration_seconds.is_some());
        assert_eq!(fx.engine.active_outputs(), 1);

        assert!(matches!(
            session.pause(),
            Err(SessionError::InvalidTransition {
                from: SessionState::Paused,
                ..
            })
        ));
        assert!(matches!(
            session.start(),
            Err(SessionError::InvalidTransition { .. })
        ));

        session.stop().unwrap();
        assert_eq!(fx.engine.active_outputs(), 0);
    }

    #[test]
    fn pause_rejected_from_idle_and_stopped() {
        let fx = Fixture::new(4);
        let session = fx.session("s1");
        assert!(session.pause().is_err());
        assert_eq!(session.state(), SessionState::Idle);

        session.setup_sources().unwrap();
        session.setup_encoding().unwrap();
        session.start().unwrap();
        session.stop().unwrap();

        assert!(session.pause().is_err());
        assert!(session.stop().is_err());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn stalled_output_is_forced() {
        let fx = Fixture::new(4);
        let session = fx.started("s1");
        fx.engine.set_faults(SimulatedFaults {
            stall_stop: true,
            ..Default::default()
        });

        session.stop().unwrap();
        assert_eq!(fx.engine.forced_stops(), 1);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(fx.engine.live_resources(), 0);
    }

    #[test]
    fn drop_tears_down_running_session() {
        let fx = Fixture::new(4);
        let session = fx.started("s1");
        assert_eq!(fx.handle.active_leases(), 1);

        drop(session);
        assert_eq!(fx.engine.active_outputs(), 0);
        assert_eq!(fx.engine.live_resources(), 0);
        assert!(fx.channels.in_use().is_empty());
        assert_eq!(fx.handle.active_leases(), 0);
    }

    #[test]
    fn drop_after_stop_is_harmless() {
        let fx = Fixture::new(4);
        let session = fx.started("s1");
        session.stop().unwrap();
        drop(session);

        assert_eq!(fx.engine.forced_stops(), 0);
        assert!(fx.channels.in_use().is_empty());
    }
}
