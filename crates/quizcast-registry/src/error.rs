//! Error types for the registry layer.

use quizcast_protocol::SessionId;

/// Errors raised while resolving identities and credentials.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The reconnect token was never issued by this registry.
    #[error("invalid reconnect token")]
    InvalidToken,

    /// The host token does not match the session's host credential.
    #[error("host token rejected for session {0}")]
    HostRejected(SessionId),
}
