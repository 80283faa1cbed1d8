//! Server configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use quizcast_protocol::QuestionOrder;
use quizcast_session::{FixedScoring, ScoringSpec, SessionConfig};
use quizcast_timer::TimerConfig;

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for a [`QuizServer`](crate::QuizServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default: `127.0.0.1:8080`.
    pub bind_addr: String,

    /// JSON question file for the default session. `None` uses the
    /// built-in sample questions.
    pub questions_path: Option<PathBuf>,

    /// Host token for the default session. `None` generates one at startup.
    pub host_token: Option<String>,

    /// How long a new connection has to send its hello. Default: 5s.
    pub hello_timeout: Duration,

    /// A connection silent for this long is dropped. Clients heartbeat to
    /// stay alive. Default: 30s.
    pub idle_timeout: Duration,

    /// Longest a single frame write may take before the connection is
    /// dropped. Default: 5s.
    pub send_timeout: Duration,

    /// Template for sessions created by the server.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            questions_path: None,
            host_token: None,
            hello_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            session: SessionConfig::default(),
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse::<u64>(var, value)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

impl ServerConfig {
    /// Reads `QUIZCAST_*` environment variables over the defaults:
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `QUIZCAST_BIND` | listen address |
    /// | `QUIZCAST_QUESTIONS` | question file path |
    /// | `QUIZCAST_HOST_TOKEN` | host token for the default session |
    /// | `QUIZCAST_QUESTION_SECS` | question duration |
    /// | `QUIZCAST_ORDER` | `sequential` or `random` |
    /// | `QUIZCAST_SCORING` | `fixed`, `fixed:N`, `latency`, `latency:MAX:MIN` |
    /// | `QUIZCAST_POINTS` | shorthand for `fixed:N` |
    /// | `QUIZCAST_COUNTDOWN_MS` | countdown tick interval, `0` disables |
    /// | `QUIZCAST_IDLE_SECS` | idle connection timeout |
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first unusable variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("QUIZCAST_BIND") {
            config.bind_addr = bind;
        }
        if let Some(path) = lookup("QUIZCAST_QUESTIONS") {
            config.questions_path = Some(PathBuf::from(path));
        }
        if let Some(token) = lookup("QUIZCAST_HOST_TOKEN") {
            if token.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: "QUIZCAST_HOST_TOKEN",
                    value: token,
                    reason: "must not be empty".into(),
                });
            }
            config.host_token = Some(token);
        }
        if let Some(secs) = lookup("QUIZCAST_QUESTION_SECS") {
            config.session.question_duration = positive_secs("QUIZCAST_QUESTION_SECS", &secs)?;
        }
        if let Some(order) = lookup("QUIZCAST_ORDER") {
            config.session.order = parse::<QuestionOrder>("QUIZCAST_ORDER", &order)?;
        }

        match (lookup("QUIZCAST_SCORING"), lookup("QUIZCAST_POINTS")) {
            (Some(_), Some(points)) => {
                return Err(ConfigError::Invalid {
                    var: "QUIZCAST_POINTS",
                    value: points,
                    reason: "conflicts with QUIZCAST_SCORING".into(),
                });
            }
            (Some(scoring), None) => {
                config.session.scoring = parse::<ScoringSpec>("QUIZCAST_SCORING", &scoring)?.0;
            }
            (None, Some(points)) => {
                config.session.scoring = Arc::new(FixedScoring {
                    points: parse("QUIZCAST_POINTS", &points)?,
                });
            }
            (None, None) => {}
        }

        if let Some(ms) = lookup("QUIZCAST_COUNTDOWN_MS") {
            let interval = match parse::<u64>("QUIZCAST_COUNTDOWN_MS", &ms)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };
            config.session.timer = TimerConfig {
                countdown_interval: interval,
            }
            .validated();
        }
        if let Some(secs) = lookup("QUIZCAST_IDLE_SECS") {
            config.idle_timeout = positive_secs("QUIZCAST_IDLE_SECS", &secs)?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.session.question_duration, Duration::from_secs(30));
        assert_eq!(config.session.scoring.max_award(), 10);
        assert!(config.questions_path.is_none());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = from_pairs(&[
            ("QUIZCAST_BIND", "0.0.0.0:9000"),
            ("QUIZCAST_QUESTIONS", "data/questions.json"),
            ("QUIZCAST_QUESTION_SECS", "12"),
            ("QUIZCAST_ORDER", "Random"),
            ("QUIZCAST_SCORING", "latency:800:200"),
            ("QUIZCAST_COUNTDOWN_MS", "0"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.questions_path, Some(PathBuf::from("data/questions.json")));
        assert_eq!(config.session.question_duration, Duration::from_secs(12));
        assert_eq!(config.session.order, QuestionOrder::Random);
        assert_eq!(config.session.scoring.max_award(), 800);
        assert_eq!(config.session.timer.countdown_interval, None);
    }

    #[test]
    fn test_from_lookup_points_shorthand_sets_fixed_scoring() {
        let config = from_pairs(&[("QUIZCAST_POINTS", "25")]).unwrap();
        assert_eq!(config.session.scoring.max_award(), 25);
    }

    #[test]
    fn test_from_lookup_zero_seconds_is_invalid() {
        let err = from_pairs(&[("QUIZCAST_QUESTION_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "QUIZCAST_QUESTION_SECS", .. }));
    }

    #[test]
    fn test_from_lookup_bad_values_name_the_variable() {
        assert!(matches!(
            from_pairs(&[("QUIZCAST_ORDER", "alphabetical")]),
            Err(ConfigError::Invalid { var: "QUIZCAST_ORDER", .. })
        ));
        assert!(matches!(
            from_pairs(&[("QUIZCAST_SCORING", "bonus")]),
            Err(ConfigError::Invalid { var: "QUIZCAST_SCORING", .. })
        ));
        assert!(matches!(
            from_pairs(&[("QUIZCAST_HOST_TOKEN", "  ")]),
            Err(ConfigError::Invalid { var: "QUIZCAST_HOST_TOKEN", .. })
        ));
    }

    #[test]
    fn test_from_lookup_scoring_and_points_conflict() {
        let err = from_pairs(&[("QUIZCAST_SCORING", "fixed"), ("QUIZCAST_POINTS", "5")]).unwrap_err();
        assert!(err.to_string().contains("conflicts"));
    }
}
