//! Question files.
//!
//! A question file is a JSON array of objects:
//!
//! ```json
//! [
//!   { "question": "Capital of France?", "answer": "Paris" },
//!   { "question": "Moon landing year?", "answer": 1969 },
//!   { "question": "Largest planet?", "options": ["Mars", "Jupiter"], "answer": "Jupiter",
//!     "duration_secs": 15 }
//! ]
//! ```
//!
//! `answer` is matched as text unless it is a number (or a string that
//! parses as one), in which case submissions within
//! [`NUMERIC_TOLERANCE`](quizcast_session::NUMERIC_TOLERANCE) count. With
//! `options`, the answer is the correct option's text or its 0-based index.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quizcast_session::{Question, QuestionSource, QuestionSourceError, validate_questions};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAnswer {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct QuestionRecord {
    question: String,
    answer: RawAnswer,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    duration_secs: Option<u64>,
}

impl QuestionRecord {
    fn into_question(self, index: usize) -> Result<Question, QuestionSourceError> {
        let id = index as u64 + 1;
        let invalid = |reason: String| QuestionSourceError::Invalid { index, reason };

        let question = if self.options.is_empty() {
            match self.answer {
                RawAnswer::Number(n) => Question::numeric(id, self.question, n),
                RawAnswer::Text(text) => match text.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => Question::numeric(id, self.question, n),
                    _ => Question::text(id, self.question, text),
                },
            }
        } else {
            let correct = match &self.answer {
                RawAnswer::Number(n) if n.fract() == 0.0 && *n >= 0.0 => *n as usize,
                RawAnswer::Number(n) => return Err(invalid(format!("option index {n} is not a whole number"))),
                RawAnswer::Text(text) => self
                    .options
                    .iter()
                    .position(|option| option.trim() == text.trim())
                    .ok_or_else(|| invalid(format!("answer '{}' is not one of the options", text.trim())))?,
            };
            Question::choice(id, self.question, self.options, correct)
        };

        Ok(match self.duration_secs {
            Some(secs) => question.with_duration(Duration::from_secs(secs)),
            None => question,
        })
    }
}

/// Parses and validates a question file's contents.
///
/// # Errors
/// [`QuestionSourceError::Parse`] for malformed JSON,
/// [`QuestionSourceError::Invalid`] for an unusable question.
pub fn parse_questions(data: &[u8]) -> Result<Vec<Question>, QuestionSourceError> {
    let records: Vec<QuestionRecord> =
        serde_json::from_slice(data).map_err(|e| QuestionSourceError::Parse(e.to_string()))?;
    let questions = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| record.into_question(index))
        .collect::<Result<Vec<_>, _>>()?;
    validate_questions(&questions)?;
    Ok(questions)
}

/// Loads questions from a JSON file on every [`load`](QuestionSource::load).
#[derive(Debug, Clone)]
pub struct JsonFileQuestionSource {
    path: PathBuf,
}

impl JsonFileQuestionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QuestionSource for JsonFileQuestionSource {
    async fn load(&self) -> Result<Vec<Question>, QuestionSourceError> {
        let data = tokio::fs::read(&self.path).await?;
        let questions = parse_questions(&data)?;
        tracing::info!(path = %self.path.display(), questions = questions.len(), "questions loaded");
        Ok(questions)
    }
}

/// A short built-in quiz, used when no question file is configured.
pub fn sample_questions() -> Vec<Question> {
    vec![
        Question::text(1, "What is the capital of France?", "Paris"),
        Question::numeric(2, "In which year did humans first land on the Moon?", 1969.0),
        Question::choice(
            3,
            "Which planet is the largest in the solar system?",
            vec!["Mars".into(), "Jupiter".into(), "Venus".into(), "Saturn".into()],
            1,
        ),
        Question::numeric(4, "How many minutes are in a day?", 1440.0),
        Question::text(5, "Which element has the chemical symbol O?", "Oxygen"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizcast_protocol::{AnswerValue, CorrectAnswer};

    #[test]
    fn test_parse_questions_detects_answer_kinds() {
        let questions = parse_questions(
            br#"[
                {"question": "Capital of France?", "answer": "Paris"},
                {"question": "Moon landing?", "answer": "1969"},
                {"question": "Two and a half?", "answer": 2.5},
                {"question": "Largest planet?", "options": ["Mars", "Jupiter"], "answer": "Jupiter"},
                {"question": "Smallest planet?", "options": ["Mercury", "Mars"], "answer": 0, "duration_secs": 12}
            ]"#,
        )
        .unwrap();

        assert_eq!(questions.len(), 5);
        assert_eq!(questions[0].answer, CorrectAnswer::Text("Paris".into()));
        assert_eq!(questions[1].answer, CorrectAnswer::Numeric(1969.0));
        assert_eq!(questions[2].answer, CorrectAnswer::Numeric(2.5));
        assert_eq!(questions[3].answer, CorrectAnswer::Choice(1));
        assert_eq!(questions[4].answer, CorrectAnswer::Choice(0));
        assert_eq!(questions[4].duration, Some(Duration::from_secs(12)));
        assert_eq!(questions[4].id.0, 5);
    }

    #[test]
    fn test_parse_questions_numeric_answer_accepts_close_submission() {
        let questions = parse_questions(br#"[{"question": "Half of one?", "answer": "0.5"}]"#).unwrap();
        assert!(questions[0].grade(&AnswerValue::Text("0.5004".into())).correct);
        assert!(!questions[0].grade(&AnswerValue::Text("0.51".into())).correct);
    }

    #[test]
    fn test_parse_questions_rejects_duplicate_prompt() {
        let err = parse_questions(
            br#"[{"question": "Same?", "answer": "a"}, {"question": "  same? ", "answer": "b"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, QuestionSourceError::Invalid { index: 1, .. }));
    }

    #[test]
    fn test_parse_questions_rejects_empty_fields_and_unknown_option() {
        assert!(matches!(
            parse_questions(br#"[{"question": " ", "answer": "a"}]"#),
            Err(QuestionSourceError::Invalid { index: 0, .. })
        ));
        assert!(matches!(
            parse_questions(br#"[{"question": "Q?", "answer": ""}]"#),
            Err(QuestionSourceError::Invalid { index: 0, .. })
        ));
        assert!(matches!(
            parse_questions(br#"[{"question": "Q?", "options": ["a", "b"], "answer": "c"}]"#),
            Err(QuestionSourceError::Invalid { index: 0, .. })
        ));
        assert!(matches!(
            parse_questions(br#"[{"question": "Q?", "options": ["a"], "answer": 4}]"#),
            Err(QuestionSourceError::Invalid { index: 0, .. })
        ));
    }

    #[test]
    fn test_parse_questions_malformed_json_is_parse_error() {
        assert!(matches!(
            parse_questions(b"{not json"),
            Err(QuestionSourceError::Parse(_))
        ));
    }

    #[test]
    fn test_sample_questions_are_valid() {
        assert!(validate_questions(&sample_questions()).is_ok());
    }

    #[tokio::test]
    async fn test_json_file_source_missing_file_is_io_error() {
        let source = JsonFileQuestionSource::new("definitely/not/here.json");
        assert!(matches!(source.load().await, Err(QuestionSourceError::Io(_))));
    }
}
