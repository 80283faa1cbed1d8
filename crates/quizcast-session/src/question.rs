//! Questions, grading, and the question-source boundary.

use std::collections::HashSet;
use std::time::Duration;

use quizcast_protocol::{AnswerValue, CorrectAnswer, QuestionId};

use crate::QuestionSourceError;

/// Absolute tolerance for numeric answers.
pub const NUMERIC_TOLERANCE: f64 = 0.001;

/// A quiz question. Immutable once handed to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    /// Selectable options; empty for free-answer questions.
    pub options: Vec<String>,
    pub answer: CorrectAnswer,
    /// Overrides the session's question duration.
    pub duration: Option<Duration>,
}

/// Outcome of comparing a submitted value with the correct answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grade {
    pub correct: bool,
    /// Distance from the correct value, for numeric questions with a
    /// numeric submission.
    pub distance: Option<f64>,
}

impl Question {
    /// A free-text question matched exactly (surrounding whitespace ignored).
    pub fn text(id: u64, prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: QuestionId(id),
            prompt: prompt.into(),
            options: Vec::new(),
            answer: CorrectAnswer::Text(answer.into()),
            duration: None,
        }
    }

    /// A multiple-choice question; `correct` indexes into `options`.
    pub fn choice(id: u64, prompt: impl Into<String>, options: Vec<String>, correct: usize) -> Self {
        Self {
            id: QuestionId(id),
            prompt: prompt.into(),
            options,
            answer: CorrectAnswer::Choice(correct),
            duration: None,
        }
    }

    /// A numeric question, matched within [`NUMERIC_TOLERANCE`].
    pub fn numeric(id: u64, prompt: impl Into<String>, value: f64) -> Self {
        Self {
            id: QuestionId(id),
            prompt: prompt.into(),
            options: Vec::new(),
            answer: CorrectAnswer::Numeric(value),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Grades a submitted value.
    pub fn grade(&self, value: &AnswerValue) -> Grade {
        match (&self.answer, value) {
            (CorrectAnswer::Text(expected), AnswerValue::Text(given)) => Grade {
                correct: expected.trim() == given.trim(),
                distance: None,
            },
            (CorrectAnswer::Choice(expected), AnswerValue::Choice(given)) => Grade {
                correct: expected == given,
                distance: None,
            },
            // Clients without option indices may send the option's text.
            (CorrectAnswer::Choice(expected), AnswerValue::Text(given)) => Grade {
                correct: self
                    .options
                    .get(*expected)
                    .is_some_and(|option| option.trim() == given.trim()),
                distance: None,
            },
            (CorrectAnswer::Numeric(expected), AnswerValue::Text(given)) => {
                match parse_number(given) {
                    Some(n) => {
                        let distance = (n - expected).abs();
                        Grade {
                            correct: distance < NUMERIC_TOLERANCE,
                            distance: Some(distance),
                        }
                    }
                    None => Grade {
                        correct: false,
                        distance: None,
                    },
                }
            }
            (CorrectAnswer::Text(_) | CorrectAnswer::Numeric(_), AnswerValue::Choice(_)) => Grade {
                correct: false,
                distance: None,
            },
        }
    }

    /// Checks that a submitted value is a real attempt at this question:
    /// non-blank text of at most `max_len` characters, or an index into the
    /// question's options.
    ///
    /// # Errors
    /// A human-readable reason when the value should not be recorded.
    pub fn check_answer(&self, value: &AnswerValue, max_len: usize) -> Result<(), String> {
        match value {
            AnswerValue::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err("answer is empty".into());
                }
                if text.chars().count() > max_len {
                    return Err(format!("answer longer than {max_len} characters"));
                }
            }
            AnswerValue::Choice(index) => {
                if *index >= self.options.len() {
                    return Err(format!(
                        "option {index} out of range ({} options)",
                        self.options.len()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Checks the question on its own.
    ///
    /// # Errors
    /// A human-readable reason when the question is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt is empty".into());
        }
        match &self.answer {
            CorrectAnswer::Text(answer) if answer.trim().is_empty() => {
                Err("answer is empty".into())
            }
            CorrectAnswer::Choice(idx) if *idx >= self.options.len() => Err(format!(
                "answer option {idx} out of range ({} options)",
                self.options.len()
            )),
            CorrectAnswer::Numeric(n) if !n.is_finite() => Err("answer is not a finite number".into()),
            _ if self.duration.is_some_and(|d| d.is_zero()) => Err("duration is zero".into()),
            _ => Ok(()),
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Validates a whole question set: each question on its own, unique ids,
/// and no prompt repeated (compared case-insensitively).
///
/// # Errors
/// [`QuestionSourceError::Invalid`] naming the first offending question.
pub fn validate_questions(questions: &[Question]) -> Result<(), QuestionSourceError> {
    let mut ids = HashSet::new();
    let mut prompts = HashSet::new();
    for (index, question) in questions.iter().enumerate() {
        question
            .validate()
            .map_err(|reason| QuestionSourceError::Invalid { index, reason })?;
        if !ids.insert(question.id) {
            return Err(QuestionSourceError::Invalid {
                index,
                reason: format!("duplicate id {}", question.id),
            });
        }
        if !prompts.insert(question.prompt.trim().to_lowercase()) {
            return Err(QuestionSourceError::Invalid {
                index,
                reason: format!("duplicate prompt '{}'", question.prompt.trim()),
            });
        }
    }
    Ok(())
}

/// Supplies the questions for a new session.
///
/// Admin tooling, a database, or a file on disk all fit behind this trait.
pub trait QuestionSource: Send + Sync + 'static {
    fn load(&self) -> impl std::future::Future<Output = Result<Vec<Question>, QuestionSourceError>> + Send;
}

/// An in-memory question list.
#[derive(Debug, Clone, Default)]
pub struct StaticQuestions(pub Vec<Question>);

impl QuestionSource for StaticQuestions {
    async fn load(&self) -> Result<Vec<Question>, QuestionSourceError> {
        validate_questions(&self.0)?;
        Ok(self.0.clone())
    }
}
