//! Quiz session orchestration for quizcast.
//!
//! A session is one game: a host, a roster of players, an ordered list of
//! questions, and the answers given to them. Each session runs as its own
//! Tokio task (actor model) that owns all of its state.
//!
//! # Key types
//!
//! - [`QuizSession`]: the state machine (lobby → questions → ended), pure
//!   and clock-free, driven by the actor
//! - [`SessionHandle`]: send commands to a running session actor
//! - [`SessionManager`]: creates and tracks sessions by id
//! - [`ScoringStrategy`]: how many points an accepted answer earns
//! - [`QuestionSource`]: where a session's questions come from
//! - [`HealthReporter`]: liveness signals from session actors
//!
//! # Lifecycle
//!
//! ```text
//! Lobby ──start──→ QuestionActive ──deadline/close──→ QuestionClosed
//!   │                   ↑   │                              │
//!   │                   └───┼──────────next────────────────┘
//!   │                       │
//!   └──────end──────────────┴────────end / next past last──→ Ended
//! ```

#![allow(async_fn_in_trait)]

mod actor;
mod config;
mod error;
mod health;
mod ledger;
mod machine;
mod manager;
mod question;
mod ranking;
mod roster;
mod scoring;

pub use actor::{ControlAction, SessionHandle, spawn_session};
pub use config::SessionConfig;
pub use error::{QuestionSourceError, QuizError};
pub use health::{HealthReporter, NoopReporter, StatusBoard};
pub use ledger::{AnswerLedger, AnswerRecord};
pub use machine::{AnswerReceipt, QuizSession, Step, TimerDirective};
pub use manager::SessionManager;
pub use question::{
    Grade, NUMERIC_TOLERANCE, Question, QuestionSource, StaticQuestions, validate_questions,
};
pub use ranking::{is_sorted, rank};
pub use roster::{Player, Roster};
pub use scoring::{FixedScoring, LatencyScoring, ScoringSpec, ScoringStrategy};
