//! Unified error type for quizcast.

use quizcast_protocol::{ProtocolError, RejectReason};
use quizcast_registry::RegistryError;
use quizcast_session::{QuestionSourceError, QuizError};
use quizcast_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps every crate-specific error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum QuizcastError {
    /// A transport-level error (bind, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Reconnect token or host authorization failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A session rejected a request.
    #[error(transparent)]
    Quiz(#[from] QuizError),

    /// The question set could not be loaded.
    #[error(transparent)]
    Questions(#[from] QuestionSourceError),

    /// Invalid server configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QuizcastError {
    /// The reason a client is given when this error ends its request.
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::Quiz(err) => err.reason(),
            Self::Registry(RegistryError::InvalidToken) => RejectReason::InvalidToken,
            Self::Registry(RegistryError::HostRejected(_)) => RejectReason::NotAuthorized,
            Self::Protocol(_) => RejectReason::BadRequest,
            Self::Transport(_) | Self::Questions(_) | Self::Config(_) => RejectReason::Unavailable,
        }
    }
}
