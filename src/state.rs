use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{AppConfig, MAX_SESSIONS_LIMIT};
use crate::error::{AppError, Result};
use crate::webrtc::SessionConfig;

/// Application-wide state shared across handlers
///
/// Sessions are not registered anywhere. Each one holds a permit from
/// `session_slots` for its lifetime and a child of `shutdown`.
pub struct AppState {
    /// Effective configuration (file + command line)
    pub config: AppConfig,
    /// Root cancellation token, cancelled on shutdown
    pub shutdown: CancellationToken,
    /// Background session tasks
    pub tasks: TaskTracker,
    session_slots: Arc<Semaphore>,
    max_sessions: usize,
}

impl AppState {
    /// Create new application state
    pub fn new(config: AppConfig) -> Arc<Self> {
        // Bounded even when the config was not validated
        let slots = config.session.max_sessions.min(MAX_SESSIONS_LIMIT);
        Arc::new(Self {
            config,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            session_slots: Arc::new(Semaphore::new(slots)),
            max_sessions: slots,
        })
    }

    /// Reserve a session slot, `ServiceUnavailable` when all are taken
    pub fn acquire_session_slot(&self) -> Result<OwnedSemaphorePermit> {
        self.session_slots.clone().try_acquire_owned().map_err(|_| {
            AppError::ServiceUnavailable(format!(
                "Session limit reached ({} active)",
                self.max_sessions
            ))
        })
    }

    /// Sessions currently holding a slot
    pub fn active_sessions(&self) -> usize {
        self.max_sessions - self.session_slots.available_permits()
    }

    /// Per-session settings derived from the configuration
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.config.webrtc.clone(), self.config.video.geometry());
        session.negotiation_timeout = self.config.session.negotiation_timeout();
        session.progress_interval = self.config.video.progress_interval;
        session.bitrate_kbps = self.config.video.bitrate_kbps;
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_slots_bounded() {
        let mut config = AppConfig::default();
        config.session.max_sessions = 2;
        let state = AppState::new(config);

        let first = state.acquire_session_slot().unwrap();
        let _second = state.acquire_session_slot().unwrap();
        assert_eq!(state.active_sessions(), 2);
        assert!(matches!(
            state.acquire_session_slot(),
            Err(AppError::ServiceUnavailable(_))
        ));

        drop(first);
        assert_eq!(state.active_sessions(), 1);
        assert!(state.acquire_session_slot().is_ok());
    }

    #[test]
    fn test_oversized_session_limit_is_capped() {
        let mut config = AppConfig::default();
        config.session.max_sessions = usize::MAX;
        let state = AppState::new(config);

        assert_eq!(state.active_sessions(), 0);
        let _slot = state.acquire_session_slot().unwrap();
        assert_eq!(state.active_sessions(), 1);
    }

    #[test]
    fn test_session_config_from_app_config() {
        let mut config = AppConfig::default();
        config.session.negotiation_timeout_ms = 2500;
        config.video.progress_interval = 25;
        let state = AppState::new(config);

        let session = state.session_config();
        assert_eq!(session.negotiation_timeout.as_millis(), 2500);
        assert_eq!(session.progress_interval, 25);
        assert_eq!(session.bitrate_kbps, 1000);
        assert_eq!(session.geometry.frame_size(), 460800);
    }
}
