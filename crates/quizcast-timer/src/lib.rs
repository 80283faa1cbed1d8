//! Question deadline timer for quizcast.
//!
//! Every active question has a deadline. When it passes, the session must
//! close the question exactly once, unless the host closed it first. The
//! timer also produces optional countdown ticks so clients can show a
//! synchronized clock.
//!
//! # Integration
//!
//! The timer is not a task of its own. It sits inside the session actor's
//! `tokio::select!` loop next to the command mailbox, so a deadline is just
//! one more event processed in order with answers and host commands:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = mailbox.recv() => { /* join, submit, next, ... */ }
//!         event = timer.next_event() => match event {
//!             TimerEvent::Deadline { question } => machine.on_deadline(question),
//!             TimerEvent::Countdown { question, remaining } => { /* broadcast */ }
//!         }
//!     }
//! }
//! ```
//!
//! [`QuestionTimer::next_event`] only mutates the timer after its sleep
//! completes, so dropping the future when another branch wins is safe.
//!
//! # Disarmed
//!
//! With no question armed, `next_event` pends forever and the `select!`
//! simply keeps serving the other branches.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timer configuration.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Interval between countdown ticks. `None` disables countdown events;
    /// the deadline still fires.
    ///
    /// Default: one second.
    pub countdown_interval: Option<Duration>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            countdown_interval: Some(Duration::from_secs(1)),
        }
    }
}

impl TimerConfig {
    /// Shortest accepted countdown interval.
    pub const MIN_COUNTDOWN: Duration = Duration::from_millis(100);

    /// Deadline events only.
    pub fn deadline_only() -> Self {
        Self {
            countdown_interval: None,
        }
    }

    /// Clamps the countdown interval to [`Self::MIN_COUNTDOWN`]; a zero
    /// interval disables countdown ticks.
    pub fn validated(mut self) -> Self {
        self.countdown_interval = match self.countdown_interval {
            Some(d) if d.is_zero() => None,
            Some(d) if d < Self::MIN_COUNTDOWN => Some(Self::MIN_COUNTDOWN),
            other => other,
        };
        self
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something the armed timer wants the session to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Periodic tick while the question is open.
    Countdown {
        /// Index of the question the timer was armed for.
        question: usize,
        /// Time left until the deadline.
        remaining: Duration,
    },
    /// The deadline passed. Fires once per arming; the timer is disarmed
    /// afterwards.
    Deadline { question: usize },
}

impl TimerEvent {
    pub fn question(&self) -> usize {
        match self {
            Self::Countdown { question, .. } | Self::Deadline { question } => *question,
        }
    }
}

/// Whole seconds left, rounded up, so a clock never shows 0 while the
/// question is still open.
pub fn remaining_secs(remaining: Duration) -> u64 {
    let millis = remaining.as_millis() as u64;
    millis.div_ceil(1000)
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Armed {
    question: usize,
    deadline: Instant,
    next_countdown: Option<Instant>,
}

/// Deadline timer for the currently active question.
pub struct QuestionTimer {
    config: TimerConfig,
    armed: Option<Armed>,
    deadlines_fired: u64,
}

impl QuestionTimer {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config: config.validated(),
            armed: None,
            deadlines_fired: 0,
        }
    }

    /// Arms the timer for `question`, replacing whatever was armed.
    pub fn arm(&mut self, question: usize, deadline: Instant) {
        let now = Instant::now();
        let next_countdown = self
            .config
            .countdown_interval
            .map(|interval| now + interval)
            .filter(|at| *at < deadline);

        if let Some(previous) = self.armed.replace(Armed {
            question,
            deadline,
            next_countdown,
        }) {
            debug!(previous = previous.question, question, "timer re-armed");
        }
        debug!(
            question,
            in_ms = deadline.saturating_duration_since(now).as_millis() as u64,
            "timer armed"
        );
    }

    /// Disarms the timer. Returns the question it was armed for, if any.
    /// Cancelling after the deadline already fired is a no-op.
    pub fn cancel(&mut self) -> Option<usize> {
        let cancelled = self.armed.take().map(|a| a.question);
        if let Some(question) = cancelled {
            debug!(question, "timer cancelled");
        }
        cancelled
    }

    /// Waits for the next countdown tick or the deadline.
    ///
    /// Pends forever while disarmed.
    pub async fn next_event(&mut self) -> TimerEvent {
        let Some(armed) = self.armed else {
            return std::future::pending().await;
        };

        let wake_at = match armed.next_countdown {
            Some(tick) if tick < armed.deadline => tick,
            _ => armed.deadline,
        };
        time::sleep_until(wake_at).await;

        let now = Instant::now();
        if now >= armed.deadline {
            self.armed = None;
            self.deadlines_fired += 1;
            debug!(question = armed.question, "deadline fired");
            return TimerEvent::Deadline {
                question: armed.question,
            };
        }

        // Countdown tick. If the actor was busy and we woke late, skip the
        // missed ticks instead of bursting them.
        let next = self.config.countdown_interval.map(|interval| {
            let scheduled = wake_at + interval;
            if scheduled <= now { now + interval } else { scheduled }
        });
        if let Some(current) = &mut self.armed {
            current.next_countdown = next.filter(|at| *at < armed.deadline);
        }

        let remaining = armed.deadline.saturating_duration_since(now);
        trace!(question = armed.question, remaining_ms = remaining.as_millis() as u64, "countdown");
        TimerEvent::Countdown {
            question: armed.question,
            remaining,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// The question the timer is armed for.
    pub fn armed_question(&self) -> Option<usize> {
        self.armed.map(|a| a.question)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|a| a.deadline)
    }

    /// Time left on the armed deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .map(|a| a.deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of deadlines that have fired over the timer's life.
    pub fn deadlines_fired(&self) -> u64 {
        self.deadlines_fired
    }

    pub fn countdown_interval(&self) -> Option<Duration> {
        self.config.countdown_interval
    }
}

impl Default for QuestionTimer {
    fn default() -> Self {
        Self::new(TimerConfig::default())
    }
}
