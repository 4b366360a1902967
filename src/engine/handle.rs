use super::{AudioSettings, CaptureEngine, DisplayInfo, VideoSettings};
use crate::error::EngineError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Pixel-count thresholds and the video bitrate (kbps) used at or above each.
const BITRATE_TIERS: [(u64, u32); 4] = [
    (7_680_000, 40_000), // ~4K UHD
    (5_898_240, 30_000), // 3072x1920 and up
    (4_096_000, 20_000), // 2560x1600 and up
    (2_073_600, 12_000), // 1080p
];
const FLOOR_BITRATE_KBPS: u32 = 6_000;

/// Recommended video bitrate in kbps for a display resolution.
pub fn bitrate_for_resolution(width: u32, height: u32) -> u32 {
    let pixels = width as u64 * height as u64;
    BITRATE_TIERS
        .iter()
        .find(|(threshold, _)| pixels >= *threshold)
        .map(|(_, kbps)| *kbps)
        .unwrap_or(FLOOR_BITRATE_KBPS)
}

/// Parameters programmed into the engine on initialization
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Modules that must load for initialization to succeed
    pub required_modules: Vec<String>,
    pub fps: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            required_modules: vec![
                "display-capture".to_string(),
                "audio-capture".to_string(),
                "x264".to_string(),
                "ffmpeg-mux".to_string(),
            ],
            fps: 60,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    initialized: bool,
    display: Option<DisplayInfo>,
}

/// Process-wide handle to the capture engine.
///
/// Created once and shared by reference; initialization and shutdown are
/// serialized by an internal lock so concurrent callers observe exactly one
/// real startup. Sessions hold an [`EngineLease`] while they own engine
/// resources, and shutdown is refused until every lease is gone.
pub struct EngineHandle {
    engine: Arc<dyn CaptureEngine>,
    settings: EngineSettings,
    state: RwLock<EngineState>,
    leases: AtomicUsize,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn CaptureEngine>, settings: EngineSettings) -> Self {
        Self {
            engine,
            settings,
            state: RwLock::new(EngineState::default()),
            leases: AtomicUsize::new(0),
        }
    }

    /// Underlying engine, for creating session resources.
    pub fn engine(&self) -> &Arc<dyn CaptureEngine> {
        &self.engine
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Start the engine if it is not already running.
    ///
    /// Loads the required modules, probes the display and programs video and
    /// audio parameters. Any failure shuts the engine back down before the
    /// error is returned.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let mut state = self.state.write();
        if state.initialized {
            return Ok(());
        }

        info!("Initializing capture engine: {}", self.engine.name());

        self.engine.startup()?;

        let probed = match self.bring_up() {
            Ok(probed) => probed,
            Err(e) => {
                error!("Capture engine initialization failed: {}", e);
                self.engine.shutdown();
                return Err(e);
            }
        };

        let (width, height) = (probed.width, probed.height);
        info!(
            "Capture engine ready ({}x{}, {} kbps recommended)",
            width,
            height,
            bitrate_for_resolution(width, height)
        );

        state.display = Some(probed);
        state.initialized = true;
        Ok(())
    }

    fn bring_up(&self) -> Result<DisplayInfo, EngineError> {
        for module in &self.settings.required_modules {
            self.engine.load_module(module)?;
        }

        let display = self.engine.probe_display()?;
        if display.width == 0 || display.height == 0 {
            return Err(EngineError::Probe(format!(
                "display reported empty geometry {}x{}",
                display.width, display.height
            )));
        }

        self.engine.reset_video(&VideoSettings {
            base_width: display.width,
            base_height: display.height,
            output_width: display.width,
            output_height: display.height,
            fps: self.settings.fps,
        })?;
        self.engine.reset_audio(&AudioSettings {
            sample_rate: self.settings.audio_sample_rate,
            channels: self.settings.audio_channels,
        })?;

        Ok(display)
    }

    /// Shut the engine down.
    ///
    /// Returns `true` if the engine was shut down by this call. A no-op when
    /// never initialized or while sessions still hold leases.
    pub fn shutdown(&self) -> bool {
        let mut state = self.state.write();
        if !state.initialized {
            return false;
        }

        let leases = self.leases.load(Ordering::SeqCst);
        if leases > 0 {
            warn!(
                "Refusing capture engine shutdown: {} session(s) still hold engine resources",
                leases
            );
            return false;
        }

        info!("Shutting down capture engine");
        self.engine.shutdown();
        *state = EngineState::default();
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    pub fn display(&self) -> Option<DisplayInfo> {
        self.state.read().display
    }

    /// Recommended video bitrate for the probed display.
    pub fn recommended_bitrate(&self) -> Result<u32, EngineError> {
        self.display()
            .map(|d| bitrate_for_resolution(d.width, d.height))
            .ok_or(EngineError::NotInitialized)
    }

    /// Register a session as a user of the engine.
    pub fn lease(self: &Arc<Self>) -> Result<EngineLease, EngineError> {
        let state = self.state.read();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.leases.fetch_add(1, Ordering::SeqCst);
        Ok(EngineLease {
            handle: Arc::clone(self),
        })
    }

    pub fn active_leases(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }
}

/// Keeps the engine alive on behalf of one session.
pub struct EngineLease {
    handle: Arc<EngineHandle>,
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.handle.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SimulatedEngine, SimulatedFaults};

    fn handle_with(engine: Arc<SimulatedEngine>) -> Arc<EngineHandle> {
        Arc::new(EngineHandle::new(engine, EngineSettings::default()))
    }

    #[test]
    fn bitrate_tiers() {
        assert_eq!(bitrate_for_resolution(3840, 2160), 40_000);
        assert_eq!(bitrate_for_resolution(3200, 1900), 30_000);
        assert_eq!(bitrate_for_resolution(2560, 1600), 20_000);
        assert_eq!(bitrate_for_resolution(1920, 1080), 12_000);
        assert_eq!(bitrate_for_resolution(1280, 720), FLOOR_BITRATE_KBPS);
        assert_eq!(bitrate_for_resolution(640, 480), FLOOR_BITRATE_KBPS);
    }

    #[test]
    fn bitrate_is_monotonic_in_pixel_count() {
        let resolutions = [
            (640, 480),
            (1280, 720),
            (1920, 1080),
            (2560, 1440),
            (2560, 1600),
            (3440, 1440),
            (3200, 1900),
            (3840, 2160),
            (5120, 2880),
        ];
        let rates: Vec<u32> = resolutions
            .iter()
            .map(|&(w, h)| bitrate_for_resolution(w, h))
            .collect();
        assert!(rates.windows(2).all(|w| w[0] <= w[1]), "{:?}", rates);
    }

    #[test]
    fn initialize_is_idempotent() {
        let engine = Arc::new(SimulatedEngine::new(1920, 1080));
        let handle = handle_with(Arc::clone(&engine));

        handle.initialize().unwrap();
        handle.initialize().unwrap();

        assert!(handle.is_initialized());
        assert_eq!(engine.startup_count(), 1);
        assert_eq!(handle.recommended_bitrate().unwrap(), 12_000);
        assert_eq!(
            handle.display(),
            Some(DisplayInfo {
                width: 1920,
                height: 1080
            })
        );
        let video = engine.video_settings().unwrap();
        assert_eq!((video.base_width, video.base_height, video.fps), (1920, 1080, 60));
    }

    #[test]
    fn failed_probe_rolls_back() {
        let engine = Arc::new(SimulatedEngine::new(1920, 1080));
        engine.set_faults(SimulatedFaults {
            probe: true,
            ..Default::default()
        });
        let handle = handle_with(Arc::clone(&engine));

        assert!(matches!(handle.initialize(), Err(EngineError::Probe(_))));
        assert!(!handle.is_initialized());
        assert!(!engine.is_running());
        assert!(handle.recommended_bitrate().is_err());
    }

    #[test]
    fn missing_required_module_fails() {
        let engine = Arc::new(SimulatedEngine::new(1920, 1080));
        engine.set_faults(SimulatedFaults {
            missing_module: Some("x264".to_string()),
            ..Default::default()
        });
        let handle = handle_with(Arc::clone(&engine));

        assert_eq!(
            handle.initialize(),
            Err(EngineError::ModuleLoad("x264".to_string()))
        );
        assert!(!engine.is_running());
    }

    #[test]
    fn shutdown_waits_for_leases() {
        let engine = Arc::new(SimulatedEngine::new(1920, 1080));
        let handle = handle_with(Arc::clone(&engine));

        assert!(!handle.shutdown(), "never initialized");

        handle.initialize().unwrap();
        let lease = handle.lease().unwrap();
        assert!(!handle.shutdown());
        assert!(handle.is_initialized());

        drop(lease);
        assert!(handle.shutdown());
        assert!(!handle.shutdown());
        assert!(!engine.is_running());
    }

    #[test]
    fn concurrent_initialize_has_one_winner() {
        let engine = Arc::new(SimulatedEngine::new(2560, 1440));
        let handle = handle_with(Arc::clone(&engine));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                std::thread::spawn(move || handle.initialize())
            })
            .collect();
        for t in threads {
            t.join().unwrap().unwrap();
        }

        assert_eq!(engine.startup_count(), 1);
    }
}
