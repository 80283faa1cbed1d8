//! Session health reporting.
//!
//! Each session actor calls its [`HealthReporter`] after every command it
//! processes and on a fixed interval while idle. A reporter that stops
//! hearing from a session knows the actor is wedged or gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use quizcast_protocol::{SessionId, SessionStatus};

/// Receives liveness signals from session actors.
///
/// Called on the actor task, so implementations must not block.
pub trait HealthReporter: Send + Sync + 'static {
    fn heartbeat(&self, status: &SessionStatus);

    /// The actor exited (normally or after aborting).
    fn session_stopped(&self, _session_id: SessionId) {}
}

/// Discards every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl HealthReporter for NoopReporter {
    fn heartbeat(&self, _status: &SessionStatus) {}
}

/// Keeps the latest status of every running session.
///
/// Cheap to clone; clones share one table.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<HashMap<SessionId, SessionStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionStatus>> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, session_id: SessionId) -> Option<SessionStatus> {
        self.lock().get(&session_id).cloned()
    }

    /// Latest status of every running session, ordered by id.
    pub fn all(&self) -> Vec<SessionStatus> {
        let mut all: Vec<SessionStatus> = self.lock().values().cloned().collect();
        all.sort_by_key(|s| s.session_id);
        all
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl HealthReporter for StatusBoard {
    fn heartbeat(&self, status: &SessionStatus) {
        self.lock().insert(status.session_id, status.clone());
    }

    fn session_stopped(&self, session_id: SessionId) {
        self.lock().remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizcast_protocol::SessionState;

    fn status(id: u64, players: usize) -> SessionStatus {
        SessionStatus {
            session_id: SessionId(id),
            state: SessionState::Lobby,
            question_index: None,
            total_questions: 3,
            players,
            connected_players: players,
            answered: 0,
            uptime_ms: 0,
        }
    }

    #[test]
    fn test_status_board_keeps_latest_per_session() {
        let board = StatusBoard::new();
        board.heartbeat(&status(2, 1));
        board.heartbeat(&status(1, 0));
        board.heartbeat(&status(2, 5));

        assert_eq!(board.len(), 2);
        assert_eq!(board.get(SessionId(2)).map(|s| s.players), Some(5));
        let ids: Vec<SessionId> = board.all().iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec![SessionId(1), SessionId(2)]);
    }

    #[test]
    fn test_status_board_forgets_stopped_session() {
        let board = StatusBoard::new();
        let shared = board.clone();
        shared.heartbeat(&status(7, 2));

        board.session_stopped(SessionId(7));

        assert!(shared.is_empty());
    }
}
