//! Identity and domain value types shared across the workspace.
//!
//! Everything here is small, `Copy` where possible, and serializes to the
//! plain JSON a browser client expects (`PlayerId(7)` is just `7`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identifier of a player within one session.
///
/// Assigned on the first successful join and kept across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Identifier of a quiz session (one game instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Identifier of a question, unique within the question set it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub u64);

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q-{}", self.0)
    }
}

/// Who is on the other end of a connection.
///
/// A session has exactly one host and any number of players. The registry
/// keys its channels by this type, so the host and each player can hold at
/// most one live channel at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// The session's host (quiz master). Issues control events.
    Host,
    /// A participant.
    Player(PlayerId),
}

impl Identity {
    /// Returns the player id, or `None` for the host.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Self::Host => None,
            Self::Player(id) => Some(*id),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Player(id) => write!(f, "{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Addressing for an outbound event produced by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Host and every player.
    All,
    /// Only the host.
    Host,
    /// One player (unicast, e.g. an answer result).
    Player(PlayerId),
    /// Everyone except one player.
    AllExcept(PlayerId),
}

impl Recipient {
    /// Whether an identity is addressed by this recipient.
    pub fn includes(&self, identity: Identity) -> bool {
        match (self, identity) {
            (Self::All, _) => true,
            (Self::Host, Identity::Host) => true,
            (Self::Host, Identity::Player(_)) => false,
            (Self::Player(target), Identity::Player(id)) => *target == id,
            (Self::Player(_), Identity::Host) => false,
            (Self::AllExcept(excluded), Identity::Player(id)) => *excluded != id,
            (Self::AllExcept(_), Identity::Host) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a quiz session.
///
/// ```text
/// Lobby ──start──→ QuestionActive ──deadline/close──→ QuestionClosed
///   │                   │   ↑                             │
///   │                   │   └──────────next───────────────┤
///   └───────end─────────┴──────────end──────────→ Ended ←─┘ (last question)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Players are joining; no question has been shown yet.
    Lobby,
    /// A question is open for answers until its deadline.
    QuestionActive,
    /// The current question is closed; waiting for the host to advance.
    QuestionClosed,
    /// Terminal. Control and answer events are rejected.
    Ended,
}

impl SessionState {
    /// Whether a game is running (a question is open or between questions).
    pub fn is_in_game(&self) -> bool {
        matches!(self, Self::QuestionActive | Self::QuestionClosed)
    }

    /// Whether answers may be accepted in this state.
    pub fn accepts_answers(&self) -> bool {
        matches!(self, Self::QuestionActive)
    }

    /// Whether the session is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Lobby, QuestionActive)
                | (QuestionActive, QuestionClosed)
                | (QuestionClosed, QuestionActive)
                | (Lobby | QuestionActive | QuestionClosed, Ended)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => f.write_str("lobby"),
            Self::QuestionActive => f.write_str("question-active"),
            Self::QuestionClosed => f.write_str("question-closed"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// How a session orders its questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionOrder {
    /// The order the question source supplied.
    #[default]
    Sequential,
    /// Shuffled once when the game starts.
    Random,
}

impl FromStr for QuestionOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown question order '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// A value submitted by a player.
///
/// Serialized externally tagged: `{"text":"42"}` or `{"choice":2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerValue {
    /// Free-form text (also used for numeric answers).
    Text(String),
    /// Index into the question's option list.
    Choice(usize),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Choice(idx) => write!(f, "#{idx}"),
        }
    }
}

/// The correct answer of a question, revealed when the question closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectAnswer {
    /// Exact text match (surrounding whitespace ignored).
    Text(String),
    /// Index of the correct option.
    Choice(usize),
    /// Numeric value, matched within a small absolute tolerance.
    Numeric(f64),
}

impl fmt::Display for CorrectAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Choice(idx) => write!(f, "#{idx}"),
            Self::Numeric(value) => write!(f, "{value}"),
        }
    }
}
