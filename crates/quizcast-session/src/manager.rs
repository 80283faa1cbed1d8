//! Session manager: creates, tracks, and retires session actors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use quizcast_protocol::SessionId;
use quizcast_registry::HostAuthenticator;

use crate::actor::spawn_session;
use crate::{HealthReporter, NoopReporter, Question, QuizError, SessionConfig, SessionHandle};

/// Owns every session hosted by this process.
///
/// Sessions share nothing; the manager only routes by id.
pub struct SessionManager {
    sessions: HashMap<SessionId, SessionHandle>,
    next_id: AtomicU64,
    config: SessionConfig,
    reporter: Arc<dyn HealthReporter>,
}

impl SessionManager {
    /// `config` is the template for new sessions.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: AtomicU64::new(1),
            config,
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Sets the reporter handed to sessions created from now on.
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawns a session using the manager's config.
    pub fn create_session(&mut self, questions: Vec<Question>, host: Arc<dyn HostAuthenticator>) -> SessionHandle {
        let config = self.config.clone();
        self.create_session_with(config, questions, host)
    }

    /// Spawns a session with its own config.
    pub fn create_session_with(
        &mut self,
        config: SessionConfig,
        questions: Vec<Question>,
        host: Arc<dyn HostAuthenticator>,
    ) -> SessionHandle {
        let session_id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = questions.len();
        let handle = spawn_session(session_id, config, questions, host, Arc::clone(&self.reporter));
        self.sessions.insert(session_id, handle.clone());
        tracing::info!(%session_id, questions = count, "session created");
        handle
    }

    /// # Errors
    /// [`QuizError::NotFound`] if no such session is registered.
    pub fn get(&self, session_id: SessionId) -> Result<SessionHandle, QuizError> {
        self.sessions
            .get(&session_id)
            .cloned()
            .ok_or(QuizError::NotFound(session_id))
    }

    /// Shuts a session down and forgets it.
    ///
    /// # Errors
    /// [`QuizError::NotFound`] if no such session is registered.
    pub async fn remove(&mut self, session_id: SessionId) -> Result<(), QuizError> {
        let handle = self
            .sessions
            .remove(&session_id)
            .ok_or(QuizError::NotFound(session_id))?;
        // Already stopped is fine.
        let _ = handle.shutdown().await;
        tracing::info!(%session_id, "session removed");
        Ok(())
    }

    /// Forgets sessions whose actor has stopped. Returns how many.
    pub fn prune(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session_id, handle| {
            let alive = !handle.is_closed();
            if !alive {
                tracing::debug!(%session_id, "pruning stopped session");
            }
            alive
        });
        before - self.sessions.len()
    }

    /// Ids of registered sessions, ascending.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
