use super::config::{RecordingSettings, SessionConfig};
use super::session::RecordingSession;
use super::state::SessionStatus;
use crate::channels::ChannelAllocator;
use crate::engine::EngineHandle;
use crate::error::{SessionError, SessionResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Default)]
struct Registry {
    /// Fully started sessions
    live: HashMap<String, Arc<RecordingSession>>,
    /// Ids whose sessions are still being built
    pending: HashSet<String>,
}

/// Engine availability as reported to health checks
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub engine: String,
    pub engine_initialized: bool,
    pub active_sessions: usize,
}

/// Removes a pending id on drop, whatever the outcome of session creation.
struct Reservation<'a> {
    registry: &'a Mutex<Registry>,
    id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.lock().pending.remove(&self.id);
    }
}

/// Registry of recording sessions and entry point for the control plane.
///
/// The registry lock only guards membership. It is never held while a
/// session's own lock is taken, so session work (including the bounded wait
/// in `stop`) never blocks lookups of other sessions.
pub struct SessionManager {
    engine: Arc<EngineHandle>,
    channels: Arc<ChannelAllocator>,
    settings: RecordingSettings,
    sessions: Mutex<Registry>,
}

impl SessionManager {
    pub fn new(
        engine: Arc<EngineHandle>,
        channels: Arc<ChannelAllocator>,
        settings: RecordingSettings,
    ) -> Self {
        Self {
            engine,
            channels,
            settings,
            sessions: Mutex::new(Registry::default()),
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    /// Create, set up and start a session.
    ///
    /// The session only becomes visible once it is recording. On any failure
    /// the half-built session is torn down before the error is returned.
    pub fn create(&self, config: SessionConfig) -> SessionResult<SessionStatus> {
        let id = config.session_id.clone();
        let _reservation = self.reserve(&id)?;

        self.engine.initialize().map_err(|e| {
            error!("Cannot create session {}: {}", id, e);
            SessionError::EngineInit(e)
        })?;

        let session = Arc::new(RecordingSession::new(
            config,
            Arc::clone(&self.engine),
            Arc::clone(&self.channels),
            self.settings.clone(),
        ));

        if let Err(e) = session
            .setup_sources()
            .and_then(|_| session.setup_encoding())
            .and_then(|_| session.start())
        {
            error!("Failed to start session {}: {}", id, e);
            drop(session);
            return Err(e);
        }

        let status = session.status();
        self.sessions.lock().live.insert(id.clone(), session);
        info!("Session {} started", id);
        Ok(status)
    }

    fn reserve(&self, id: &str) -> SessionResult<Reservation<'_>> {
        let mut registry = self.sessions.lock();
        if registry.live.contains_key(id) || registry.pending.contains(id) {
            warn!("Session {} already exists", id);
            return Err(SessionError::Conflict(id.to_string()));
        }
        registry.pending.insert(id.to_string());
        Ok(Reservation {
            registry: &self.sessions,
            id: id.to_string(),
        })
    }

    fn get(&self, id: &str) -> SessionResult<Arc<RecordingSession>> {
        self.sessions
            .lock()
            .live
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn pause(&self, id: &str) -> SessionResult<SessionStatus> {
        let session = self.get(id)?;
        session.pause()?;
        Ok(session.status())
    }

    /// Stop a session and remove it from the registry.
    pub fn stop(&self, id: &str) -> SessionResult<PathBuf> {
        let session = self.get(id)?;
        let output_path = session.stop()?;

        let mut registry = self.sessions.lock();
        if registry
            .live
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &session))
        {
            registry.live.remove(id);
        }
        Ok(output_path)
    }

    pub fn status(&self, id: &str) -> SessionResult<SessionStatus> {
        Ok(self.get(id)?.status())
    }

    /// Status of every live session, ordered by id.
    ///
    /// Membership is captured under the registry lock; each session is then
    /// read under its own lock after the registry lock is released.
    pub fn list_all(&self) -> Vec<SessionStatus> {
        let sessions: Vec<Arc<RecordingSession>> =
            self.sessions.lock().live.values().cloned().collect();

        let mut statuses: Vec<SessionStatus> = sessions.iter().map(|s| s.status()).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            engine: self.engine.name().to_string(),
            engine_initialized: self.engine.is_initialized(),
            active_sessions: self.len(),
        }
    }

    /// Stop every live session, then shut the engine down.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<RecordingSession>> = {
            let mut registry = self.sessions.lock();
            registry.live.drain().map(|(_, s)| s).collect()
        };

        info!("Shutting down {} session(s)", sessions.len());
        for session in sessions {
            match session.stop() {
                Ok(path) => info!("Session {} saved to {}", session.id(), path.display()),
                Err(e) => warn!("Session {} did not stop cleanly: {}", session.id(), e),
            }
        }

        self.engine.shutdown();
    }
}
