//! Error types for the session layer.

use quizcast_protocol::{PlayerId, QuestionId, RejectReason, SessionId, SessionState};

/// Why a session rejected a request.
///
/// Every variant except [`QuizError::InvariantViolation`] is an ordinary
/// rejection: it goes back to whoever made the request and the session
/// carries on unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuizError {
    /// A control event came from someone who is not the session's host.
    #[error("not authorized to control this session")]
    NotAuthorized,

    /// No question is accepting answers: the session is not in
    /// `QuestionActive`, the answer names a different question, or it
    /// arrived at or after the deadline.
    #[error("no question is accepting answers")]
    SessionNotActive,

    /// The player already has an answer recorded for this question.
    #[error("player {0} already answered {1}")]
    DuplicateAnswer(PlayerId, QuestionId),

    /// Another player already joined under this name (case-insensitive).
    #[error("name '{0}' is already taken")]
    NameTaken(String),

    /// "Start game" on a session with no questions.
    #[error("session has no questions")]
    EmptyQuestionSet,

    /// A control event arrived after the game ended.
    #[error("session has already ended")]
    SessionAlreadyEnded,

    /// The display name is empty or too long.
    #[error("invalid player name: {0}")]
    InvalidName(String),

    /// The answer is blank or longer than the session allows. Nothing is
    /// recorded, so the player can still answer.
    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    /// The player id never joined this session.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// The control event is not valid in the current state, e.g. starting
    /// a game twice.
    #[error("cannot {action} while session is {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    /// No session with this id exists.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session actor is gone (shut down or aborted).
    #[error("session {0} is unavailable")]
    Unavailable(SessionId),

    /// Internal state no longer adds up. Fatal for the affected session
    /// only: its actor aborts and later calls see `Unavailable`.
    #[error("session invariant violated: {0}")]
    InvariantViolation(String),
}

impl QuizError {
    /// The wire-level reason sent to the client in a `Rejected` event.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::NotAuthorized => RejectReason::NotAuthorized,
            Self::SessionNotActive => RejectReason::SessionNotActive,
            Self::DuplicateAnswer(..) => RejectReason::DuplicateAnswer,
            Self::NameTaken(_) => RejectReason::NameTaken,
            Self::EmptyQuestionSet => RejectReason::EmptyQuestionSet,
            Self::SessionAlreadyEnded => RejectReason::SessionAlreadyEnded,
            Self::InvalidName(_) => RejectReason::InvalidName,
            Self::InvalidAnswer(_) => RejectReason::BadRequest,
            Self::UnknownPlayer(_) => RejectReason::UnknownPlayer,
            Self::InvalidTransition { .. } => RejectReason::InvalidTransition,
            Self::NotFound(_) => RejectReason::UnknownSession,
            Self::Unavailable(_) | Self::InvariantViolation(_) => RejectReason::Unavailable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Errors raised while loading or validating a question set.
#[derive(Debug, thiserror::Error)]
pub enum QuestionSourceError {
    /// Reading the backing store failed.
    #[error("failed to read questions: {0}")]
    Io(#[from] std::io::Error),

    /// The data could not be parsed.
    #[error("failed to parse questions: {0}")]
    Parse(String),

    /// A question is malformed (empty prompt, bad option index, duplicate).
    #[error("invalid question #{index}: {reason}")]
    Invalid { index: usize, reason: String },
}
