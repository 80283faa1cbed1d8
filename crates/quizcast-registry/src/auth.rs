//! Host authorization hook.
//!
//! quizcast does not know how hosts log in; an admin console, a signed link,
//! or a shared secret all work. The session only needs one question answered
//! before it accepts a control event: is this token the host of this
//! session? [`HostAuthenticator`] is that seam. [`StaticHostToken`] is the
//! built-in answer, a single secret per session.

use quizcast_protocol::SessionId;

use crate::{RegistryError, generate_token};

/// Resolves a host token to authorization for a session.
///
/// Called from inside the session actor for every control event, so it must
/// be cheap and must not block.
///
/// ```rust
/// use quizcast_protocol::SessionId;
/// use quizcast_registry::{HostAuthenticator, RegistryError};
///
/// /// Lets anyone with the magic word run any session.
/// struct Demo;
///
/// impl HostAuthenticator for Demo {
///     fn authorize(&self, session_id: SessionId, token: &str) -> Result<(), RegistryError> {
///         if token == "please" {
///             Ok(())
///         } else {
///             Err(RegistryError::HostRejected(session_id))
///         }
///     }
/// }
///
/// assert!(Demo.authorize(SessionId(1), "please").is_ok());
/// ```
pub trait HostAuthenticator: Send + Sync + 'static {
    /// Returns `Ok(())` if `token` authorizes control of `session_id`.
    ///
    /// # Errors
    /// [`RegistryError::HostRejected`] for anything else.
    fn authorize(&self, session_id: SessionId, token: &str) -> Result<(), RegistryError>;
}

/// One shared secret per session.
#[derive(Debug, Clone)]
pub struct StaticHostToken {
    token: String,
}

impl StaticHostToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// A fresh random 128-bit token.
    pub fn generate() -> Self {
        Self::new(generate_token())
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl HostAuthenticator for StaticHostToken {
    fn authorize(&self, session_id: SessionId, token: &str) -> Result<(), RegistryError> {
        // Compare every byte so the time taken does not leak the matching prefix.
        let expected = self.token.as_bytes();
        let given = token.as_bytes();
        let mut diff = expected.len() ^ given.len();
        for (a, b) in expected.iter().zip(given.iter()) {
            diff |= usize::from(a ^ b);
        }
        if diff == 0 && !expected.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::HostRejected(session_id))
        }
    }
}
