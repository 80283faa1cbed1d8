//! Client and server messages.
//!
//! Clients send bare [`ClientMessage`] frames. The server answers with
//! [`Envelope`]s wrapping a [`ServerEvent`]. Both enums are internally
//! tagged (`{"type": "Join", ...}`) so a JavaScript client can switch on
//! `msg.type`.
//!
//! # Sequence numbers
//!
//! Events produced by a session carry the session-wide dispatch sequence in
//! [`Envelope::seq`], starting at 1 and strictly increasing in the order the
//! session produced them. A client sees an increasing subsequence: events
//! addressed to other clients leave gaps. Replies produced by the
//! connection handler alone (`Rejected`, `HeartbeatAck`) use `seq: 0`. A
//! client that suspects it missed something sends
//! [`ClientMessage::Resync`] and gets a fresh snapshot.

use serde::{Deserialize, Serialize};

use crate::{
    AnswerValue, CorrectAnswer, Identity, PlayerId, QuestionId, SessionId, SessionState,
};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A message sent by a client.
///
/// The first frame on a connection must be `HostConnect`, `Join`, or
/// `Resume`; everything else is only valid once the connection has an
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    // -- Hello --
    /// Attach as the host of a session.
    HostConnect {
        session_id: SessionId,
        host_token: String,
    },
    /// Join a session as a new player with a display name.
    Join { session_id: SessionId, name: String },
    /// Re-attach with the reconnect token from an earlier `Welcome`.
    Resume { session_id: SessionId, token: String },

    // -- Host control --
    StartGame,
    /// Close the active question before its deadline.
    CloseQuestion,
    /// Open the next question (closing the active one first, if any).
    NextQuestion,
    EndGame,

    // -- Player --
    SubmitAnswer {
        question_id: QuestionId,
        value: AnswerValue,
    },
    /// Leave the session. The player's score is kept.
    Leave,

    // -- Any --
    /// Ask for a full [`SessionSnapshot`].
    Resync,
    Heartbeat { client_time: u64 },
}

impl ClientMessage {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HostConnect { .. } => "HostConnect",
            Self::Join { .. } => "Join",
            Self::Resume { .. } => "Resume",
            Self::StartGame => "StartGame",
            Self::CloseQuestion => "CloseQuestion",
            Self::NextQuestion => "NextQuestion",
            Self::EndGame => "EndGame",
            Self::SubmitAnswer { .. } => "SubmitAnswer",
            Self::Leave => "Leave",
            Self::Resync => "Resync",
            Self::Heartbeat { .. } => "Heartbeat",
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A question as players see it: no correct answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub question_id: QuestionId,
    pub prompt: String,
    /// Empty for free-text questions.
    pub options: Vec<String>,
    /// 1-based position in the session's question sequence.
    pub ordinal: usize,
    pub total_count: usize,
    /// Deadline in ms since the session epoch (same clock as
    /// [`Envelope::timestamp`]).
    pub deadline_ms: u64,
    pub duration_ms: u64,
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based; ties are already broken so ranks are unique.
    pub rank: u32,
    pub player_id: PlayerId,
    pub name: String,
    pub score: u32,
}

/// One player's outcome for a closed question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSummary {
    pub player_id: PlayerId,
    pub name: String,
    pub answered: bool,
    pub value: Option<AnswerValue>,
    pub correct: bool,
    pub points: u32,
    /// Time from activation to receipt.
    pub elapsed_ms: Option<u64>,
    /// Absolute distance from the correct value (numeric questions only).
    pub distance: Option<f64>,
}

/// A player as listed in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub name: String,
    pub score: u32,
    pub connected: bool,
}

/// Everything a (re)connecting client needs to render the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    /// Who this snapshot was prepared for.
    pub you: Identity,
    /// The active question, if one is open.
    pub current_question: Option<QuestionView>,
    /// 0-based index of the current (or last closed) question.
    pub question_index: Option<usize>,
    pub total_questions: usize,
    pub players: Vec<PlayerView>,
    pub leaderboard: Vec<LeaderboardEntry>,
    /// The recipient's own answer to the current question, if any.
    pub own_answer: Option<AnswerSummary>,
    /// Number of answers recorded for the current question.
    pub answered: usize,
}

/// Heartbeat payload fed to the health reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub question_index: Option<usize>,
    pub total_questions: usize,
    pub players: usize,
    pub connected_players: usize,
    pub answered: usize,
    /// ms since the session was created.
    pub uptime_ms: u64,
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    NotAuthorized,
    SessionNotActive,
    DuplicateAnswer,
    NameTaken,
    EmptyQuestionSet,
    SessionAlreadyEnded,
    InvalidName,
    UnknownPlayer,
    InvalidTransition,
    InvalidToken,
    UnknownSession,
    BadRequest,
    Unavailable,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An event sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Reply to a successful hello.
    Welcome {
        session_id: SessionId,
        identity: Identity,
        /// Present it in `Resume` after a dropped connection.
        reconnect_token: String,
    },
    PlayerJoined { player_id: PlayerId, name: String },
    PlayerLeft { player_id: PlayerId },
    PlayerReconnected { player_id: PlayerId },
    QuestionBroadcast { question: QuestionView },
    /// Countdown tick while a question is active.
    TimerUpdate {
        question_id: QuestionId,
        remaining_secs: u64,
    },
    /// Unicast to the submitting player.
    AnswerResult {
        player_id: PlayerId,
        question_id: QuestionId,
        correct: bool,
        points_awarded: u32,
        score: u32,
    },
    AnswerProgress {
        question_id: QuestionId,
        answered: usize,
        total_players: usize,
    },
    QuestionClosed {
        question_id: QuestionId,
        correct_answer: CorrectAnswer,
        /// Closest answers first; players who did not answer last.
        results: Vec<AnswerSummary>,
        answered: usize,
        total_players: usize,
    },
    LeaderboardUpdate { entries: Vec<LeaderboardEntry> },
    GameEnded { final_leaderboard: Vec<LeaderboardEntry> },
    Snapshot { snapshot: SessionSnapshot },
    Rejected { reason: RejectReason, message: String },
    HeartbeatAck { client_time: u64, server_time: u64 },
    /// The session hit an internal fault and stopped.
    SessionAborted { reason: String },
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Session dispatch sequence, or 0 for connection-local replies.
    pub seq: u64,
    /// ms since the session epoch.
    pub timestamp: u64,
    pub payload: ServerEvent,
}
