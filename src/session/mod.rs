//! Recording session management
//!
//! This module provides:
//! - `SessionState`: the per-session lifecycle state machine
//! - `RecordingSession`: one recording bound to the shared capture engine
//! - `SessionManager`: the id → session registry the control plane calls into
//! - `BoundedWait`: fixed-interval polling used when stopping outputs

mod config;
mod manager;
mod session;
mod state;
mod wait;

pub use config::{RecordingSettings, SessionConfig};
pub use manager::{HealthStatus, SessionManager};
pub use session::RecordingSession;
pub use state::{Operation, SessionState, SessionStatus};
pub use wait::BoundedWait;
