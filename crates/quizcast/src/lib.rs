//! # Quizcast
//!
//! Real-time multiplayer quiz server.
//!
//! A host opens a session, players join it by name over WebSocket, and the
//! server drives the game: it broadcasts each question, keeps the countdown,
//! grades answers as they arrive, and pushes leaderboard updates to every
//! connected client in one consistent order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use quizcast::prelude::*;
//!
//! # async fn run() -> Result<(), QuizcastError> {
//! let server = QuizServer::builder().bind("0.0.0.0:8080").build().await?;
//!
//! let host = StaticHostToken::generate();
//! println!("host token: {}", host.token());
//! server.create_session(sample_questions(), Arc::new(host)).await;
//!
//! server.run().await
//! # }
//! ```
//!
//! ## Connection flow
//!
//! ```text
//! client ──HostConnect/Join/Resume──→ handler ──attach──→ session actor
//!        ←──Welcome, Snapshot, events──────────────────────┘
//! ```

mod config;
mod error;
mod handler;
mod questions;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::QuizcastError;
pub use questions::{JsonFileQuestionSource, parse_questions, sample_questions};
pub use server::{QuizServer, QuizServerBuilder};

/// Everything needed to run a server and talk to it.
pub mod prelude {
    pub use crate::{
        ConfigError, JsonFileQuestionSource, QuizServer, QuizServerBuilder, QuizcastError,
        ServerConfig, parse_questions, sample_questions,
    };
    pub use quizcast_protocol::{
        AnswerValue, ClientMessage, Codec, CorrectAnswer, Envelope, Identity, JsonCodec,
        LeaderboardEntry, PlayerId, QuestionId, QuestionOrder, RejectReason, ServerEvent,
        SessionId, SessionSnapshot, SessionState, SessionStatus,
    };
    pub use quizcast_registry::{HostAuthenticator, RegistryError, StaticHostToken};
    pub use quizcast_session::{
        FixedScoring, LatencyScoring, Question, QuestionSource, QuizError, ScoringStrategy,
        SessionConfig, SessionHandle, StaticQuestions, StatusBoard,
    };
}
