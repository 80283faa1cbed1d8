//! Session configuration.

use std::sync::Arc;
use std::time::Duration;

use quizcast_protocol::QuestionOrder;
use quizcast_registry::RegistryConfig;
use quizcast_timer::TimerConfig;

use crate::{FixedScoring, ScoringStrategy};

/// Configuration for one quiz session.
///
/// Start from `SessionConfig::default()` and override what you need:
///
/// ```rust
/// use std::time::Duration;
/// use quizcast_session::SessionConfig;
///
/// let config = SessionConfig {
///     question_duration: Duration::from_secs(10),
///     ..SessionConfig::default()
/// };
/// assert_eq!(config.mailbox_size, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long each question stays open unless the question overrides it.
    ///
    /// Default: 30 seconds.
    pub question_duration: Duration,

    /// Sequential, or shuffled once at game start.
    pub order: QuestionOrder,

    /// Points for accepted answers. Default: 10 per correct answer.
    pub scoring: Arc<dyn ScoringStrategy>,

    /// Countdown cadence of the question timer.
    pub timer: TimerConfig,

    /// Capacity of the actor's command mailbox.
    pub mailbox_size: usize,

    /// How often the actor reports its status when otherwise idle.
    pub heartbeat_interval: Duration,

    /// Longest accepted display name, in characters.
    pub max_name_len: usize,

    /// Longest accepted text answer, in characters. Answers are echoed to
    /// every player when the question closes.
    pub max_answer_len: usize,

    /// Per-connection queue sizing.
    pub registry: RegistryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            question_duration: Duration::from_secs(30),
            order: QuestionOrder::Sequential,
            scoring: Arc::new(FixedScoring::default()),
            timer: TimerConfig::default(),
            mailbox_size: 64,
            heartbeat_interval: Duration::from_secs(5),
            max_name_len: 24,
            max_answer_len: 200,
            registry: RegistryConfig::default(),
        }
    }
}
