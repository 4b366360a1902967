pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod session;

pub use channels::{ChannelAllocator, ChannelLease, MAX_CHANNELS};
pub use config::Config;
pub use engine::{
    bitrate_for_resolution, CaptureEngine, EngineHandle, EngineSettings, SimulatedEngine,
    SimulatedFaults,
};
pub use error::{AllocationError, EngineError, SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use session::{
    RecordingSession, RecordingSettings, SessionConfig, SessionManager, SessionState,
    SessionStatus,
};
