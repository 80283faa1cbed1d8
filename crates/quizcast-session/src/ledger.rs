//! The answer ledger: at most one answer per (player, question).

use std::collections::HashMap;
use std::time::Duration;

use quizcast_protocol::{AnswerValue, PlayerId, QuestionId};
use tokio::time::Instant;

use crate::QuizError;

/// An accepted answer. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub player_id: PlayerId,
    pub question_id: QuestionId,
    pub value: AnswerValue,
    /// Server-side receipt time.
    pub received_at: Instant,
    /// Receipt time minus activation time.
    pub elapsed: Duration,
    pub correct: bool,
    pub distance: Option<f64>,
    pub points: u32,
}

#[derive(Debug, Default)]
pub struct AnswerLedger {
    records: HashMap<(PlayerId, QuestionId), AnswerRecord>,
    /// Acceptance order per question.
    order: HashMap<QuestionId, Vec<PlayerId>>,
}

impl AnswerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an answer.
    ///
    /// # Errors
    /// [`QuizError::DuplicateAnswer`] if the pair already has a record; the
    /// existing record is left untouched.
    pub fn record(&mut self, record: AnswerRecord) -> Result<&AnswerRecord, QuizError> {
        let key = (record.player_id, record.question_id);
        if self.records.contains_key(&key) {
            return Err(QuizError::DuplicateAnswer(key.0, key.1));
        }
        self.order.entry(key.1).or_default().push(key.0);
        Ok(self.records.entry(key).or_insert(record))
    }

    pub fn get(&self, player: PlayerId, question: QuestionId) -> Option<&AnswerRecord> {
        self.records.get(&(player, question))
    }

    pub fn contains(&self, player: PlayerId, question: QuestionId) -> bool {
        self.records.contains_key(&(player, question))
    }

    /// Answers to `question` in the order they were accepted.
    pub fn answers_for(&self, question: QuestionId) -> impl Iterator<Item = &AnswerRecord> {
        self.order
            .get(&question)
            .into_iter()
            .flatten()
            .filter_map(move |player| self.records.get(&(*player, question)))
    }

    pub fn answered_count(&self, question: QuestionId) -> usize {
        self.order.get(&question).map_or(0, Vec::len)
    }

    /// Total points awarded for one question.
    pub fn points_for_question(&self, question: QuestionId) -> u64 {
        self.answers_for(question).map(|r| u64::from(r.points)).sum()
    }

    /// Total points a player earned across all questions.
    pub fn points_for_player(&self, player: PlayerId) -> u64 {
        self.records
            .values()
            .filter(|r| r.player_id == player)
            .map(|r| u64::from(r.points))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
