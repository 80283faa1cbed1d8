//! Scoring strategies.
//!
//! A strategy turns (correct?, how fast?) into points. It is chosen per
//! session through [`SessionConfig::scoring`](crate::SessionConfig). Two
//! are built in:
//!
//! - [`FixedScoring`]: a flat award for every correct answer.
//! - [`LatencyScoring`]: faster correct answers earn more, falling linearly
//!   from `max_points` at activation to `min_points` at the deadline.
//!
//! Every strategy must award 0 for wrong answers, never exceed
//! [`ScoringStrategy::max_award`], and be non-increasing in elapsed time.
//! The session checks the ceiling after every answer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Computes points for an accepted answer.
pub trait ScoringStrategy: Send + Sync + fmt::Debug + 'static {
    /// Points for an answer received `elapsed` after activation, where the
    /// question was open for `window`.
    fn award(&self, correct: bool, elapsed: Duration, window: Duration) -> u32;

    /// Upper bound of [`award`](Self::award).
    fn max_award(&self) -> u32;
}

/// A flat award for every correct answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedScoring {
    pub points: u32,
}

impl Default for FixedScoring {
    fn default() -> Self {
        Self { points: 10 }
    }
}

impl ScoringStrategy for FixedScoring {
    fn award(&self, correct: bool, _elapsed: Duration, _window: Duration) -> u32 {
        if correct { self.points } else { 0 }
    }

    fn max_award(&self) -> u32 {
        self.points
    }
}

/// Linear decay from `max_points` (instant answer) to `min_points`
/// (answer right at the deadline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyScoring {
    pub max_points: u32,
    pub min_points: u32,
}

impl Default for LatencyScoring {
    fn default() -> Self {
        Self {
            max_points: 1000,
            min_points: 500,
        }
    }
}

impl ScoringStrategy for LatencyScoring {
    fn award(&self, correct: bool, elapsed: Duration, window: Duration) -> u32 {
        if !correct {
            return 0;
        }
        let floor = self.min_points.min(self.max_points);
        if window.is_zero() {
            return self.max_points;
        }
        let fraction = (elapsed.as_secs_f64() / window.as_secs_f64()).clamp(0.0, 1.0);
        let span = f64::from(self.max_points - floor);
        self.max_points - (span * fraction).round() as u32
    }

    fn max_award(&self) -> u32 {
        self.max_points
    }
}

/// Builds a strategy from a config string: `fixed`, `fixed:25`,
/// `latency`, or `latency:1000:500`.
#[derive(Debug, Clone)]
pub struct ScoringSpec(pub Arc<dyn ScoringStrategy>);

impl FromStr for ScoringSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let kind = parts.next().unwrap_or_default().to_ascii_lowercase();
        let numbers: Vec<u32> = parts
            .map(|p| p.trim().parse::<u32>().map_err(|e| format!("bad number '{p}': {e}")))
            .collect::<Result<_, _>>()?;

        let strategy: Arc<dyn ScoringStrategy> = match (kind.as_str(), numbers.as_slice()) {
            ("fixed", []) => Arc::new(FixedScoring::default()),
            ("fixed", [points]) => Arc::new(FixedScoring { points: *points }),
            ("latency", []) => Arc::new(LatencyScoring::default()),
            ("latency", [max, min]) if min <= max => Arc::new(LatencyScoring {
                max_points: *max,
                min_points: *min,
            }),
            _ => return Err(format!("unknown scoring '{s}'")),
        };
        Ok(Self(strategy))
    }
}
