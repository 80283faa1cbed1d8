//! Wire protocol for quizcast.
//!
//! This crate defines everything that crosses the network boundary between
//! the quiz server and its clients (the host console and player devices):
//!
//! - **Identity types** ([`PlayerId`], [`SessionId`], [`QuestionId`],
//!   [`Identity`]) shared by every other crate.
//! - **Messages** ([`ClientMessage`], [`ServerEvent`], [`Envelope`]) and the
//!   read-only views they carry ([`QuestionView`], [`LeaderboardEntry`],
//!   [`SessionSnapshot`], ...).
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) to turn them into bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (ClientMessage / Envelope) → Session actor
//! ```

mod codec;
mod error;
mod messages;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    AnswerSummary, ClientMessage, Envelope, LeaderboardEntry, PlayerView,
    QuestionView, RejectReason, ServerEvent, SessionSnapshot, SessionStatus,
};
pub use types::{
    AnswerValue, CorrectAnswer, Identity, PlayerId, QuestionId, QuestionOrder,
    Recipient, SessionId, SessionState,
};
