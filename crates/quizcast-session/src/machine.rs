//! The quiz session state machine.
//!
//! [`QuizSession`] is plain synchronous data: every operation takes the
//! current time explicitly and returns a [`Step`] listing the events to
//! send and what to do with the question timer. It never talks to the
//! network and never sleeps. The session actor owns one instance, feeds it
//! commands and timer firings one at a time, and carries out each step.
//! Keeping the rules here, away from tasks and channels, makes every
//! transition testable with hand-picked timestamps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quizcast_protocol::{
    AnswerSummary, AnswerValue, Identity, LeaderboardEntry, PlayerId, QuestionId, QuestionOrder,
    QuestionView, Recipient, ServerEvent, SessionId, SessionSnapshot, SessionState, SessionStatus,
};
use quizcast_registry::HostAuthenticator;
use quizcast_timer::remaining_secs;
use rand::seq::SliceRandom;
use tokio::time::Instant;

use crate::{AnswerLedger, AnswerRecord, Player, Question, QuizError, Roster, SessionConfig, ranking};

/// What the actor should do with the question timer after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerDirective {
    /// Leave it as it is.
    #[default]
    Keep,
    /// Arm it for a newly active question.
    Arm { question: usize, deadline: Instant },
    /// Disarm it.
    Cancel,
}

/// Output of one state-machine operation.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    /// Events in the order they must be delivered.
    pub events: Vec<(Recipient, ServerEvent)>,
    pub timer: TimerDirective,
}

impl Step {
    fn push(&mut self, recipient: Recipient, event: ServerEvent) {
        self.events.push((recipient, event));
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.timer == TimerDirective::Keep
    }
}

/// Returned to the player whose answer was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerReceipt {
    pub question_id: QuestionId,
    pub correct: bool,
    pub points_awarded: u32,
    pub score: u32,
}

#[derive(Debug, Clone, Copy)]
struct ActiveQuestion {
    index: usize,
    activated_at: Instant,
    deadline: Instant,
    duration: Duration,
}

/// Authoritative state of one quiz game.
pub struct QuizSession {
    id: SessionId,
    config: SessionConfig,
    host: Arc<dyn HostAuthenticator>,
    questions: Vec<Question>,
    state: SessionState,
    /// Index of the current or last closed question. Only moves forward.
    index: Option<usize>,
    active: Option<ActiveQuestion>,
    roster: Roster,
    ledger: AnswerLedger,
    /// Bumped on every score change; orders ties on the leaderboard.
    score_seq: u64,
    epoch: Instant,
}

impl QuizSession {
    /// Creates a session in the lobby. An empty question list is allowed
    /// here; starting the game is what fails.
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        questions: Vec<Question>,
        host: Arc<dyn HostAuthenticator>,
        epoch: Instant,
    ) -> Self {
        Self {
            id,
            config,
            host,
            questions,
            state: SessionState::Lobby,
            index: None,
            active: None,
            roster: Roster::new(),
            ledger: AnswerLedger::new(),
            score_seq: 0,
            epoch,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_index(&self) -> Option<usize> {
        self.index
    }

    /// The question currently accepting answers.
    pub fn active_question(&self) -> Option<&Question> {
        self.active.map(|a| &self.questions[a.index])
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.map(|a| a.deadline)
    }

    /// Questions in play order (shuffled at start in random mode).
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.roster.get(id)
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn ledger(&self) -> &AnswerLedger {
        &self.ledger
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        ranking::rank(self.roster.iter())
    }

    // -----------------------------------------------------------------------
    // Players
    // -----------------------------------------------------------------------

    /// Adds a player. Allowed in every state except `Ended`, so latecomers
    /// can still join a running game.
    ///
    /// # Errors
    /// `SessionAlreadyEnded`, `InvalidName`, or `NameTaken`.
    pub fn join(&mut self, name: &str) -> Result<(PlayerId, Step), QuizError> {
        if self.state.is_terminal() {
            return Err(QuizError::SessionAlreadyEnded);
        }
        let player = self.roster.add(name, self.config.max_name_len)?;
        let (player_id, name) = (player.id, player.name.clone());
        tracing::info!(
            session_id = %self.id,
            %player_id,
            %name,
            players = self.roster.len(),
            "player joined"
        );

        let mut step = Step::default();
        step.push(Recipient::All, ServerEvent::PlayerJoined { player_id, name });
        step.push(Recipient::All, self.leaderboard_event());
        Ok((player_id, step))
    }

    /// Records a player's connection going away or coming back. The first
    /// attach after joining is silent; later ones announce a reconnect.
    ///
    /// # Errors
    /// `UnknownPlayer` if the id never joined.
    pub fn set_presence(&mut self, player_id: PlayerId, connected: bool) -> Result<Step, QuizError> {
        let player = self
            .roster
            .get_mut(player_id)
            .ok_or(QuizError::UnknownPlayer(player_id))?;
        let mut step = Step::default();
        if player.connected == connected {
            return Ok(step);
        }
        player.connected = connected;

        if connected && !player.ever_connected {
            // `PlayerJoined` already announced them.
            player.ever_connected = true;
            tracing::debug!(session_id = %self.id, %player_id, "player attached");
        } else if connected {
            tracing::info!(session_id = %self.id, %player_id, "player reconnected");
            step.push(Recipient::AllExcept(player_id), ServerEvent::PlayerReconnected { player_id });
        } else {
            tracing::info!(session_id = %self.id, %player_id, "player left");
            step.push(Recipient::AllExcept(player_id), ServerEvent::PlayerLeft { player_id });
        }
        Ok(step)
    }

    // -----------------------------------------------------------------------
    // Host control
    // -----------------------------------------------------------------------

    /// Checks a host token without changing anything.
    ///
    /// # Errors
    /// `NotAuthorized`.
    pub fn authorize_host(&self, token: &str) -> Result<(), QuizError> {
        self.host
            .authorize(self.id, token)
            .map_err(|_| QuizError::NotAuthorized)
    }

    fn guard_control(&self, token: &str, action: &'static str, target: SessionState) -> Result<(), QuizError> {
        self.authorize_host(token)?;
        if self.state.is_terminal() {
            return Err(QuizError::SessionAlreadyEnded);
        }
        if !self.state.can_transition_to(target) {
            return Err(QuizError::InvalidTransition {
                state: self.state,
                action,
            });
        }
        Ok(())
    }

    /// Lobby → QuestionActive on the first question.
    ///
    /// # Errors
    /// `NotAuthorized`, `SessionAlreadyEnded`, `InvalidTransition`, or
    /// `EmptyQuestionSet`.
    pub fn start_game(&mut self, token: &str, now: Instant) -> Result<Step, QuizError> {
        self.guard_control(token, "start the game", SessionState::QuestionActive)?;
        if self.state != SessionState::Lobby {
            return Err(QuizError::InvalidTransition {
                state: self.state,
                action: "start the game",
            });
        }
        if self.questions.is_empty() {
            return Err(QuizError::EmptyQuestionSet);
        }

        if self.config.order == QuestionOrder::Random {
            self.questions.shuffle(&mut rand::rng());
        }
        tracing::info!(
            session_id = %self.id,
            questions = self.questions.len(),
            players = self.roster.len(),
            order = ?self.config.order,
            "game started"
        );

        let mut step = Step::default();
        self.activate(0, now, &mut step);
        Ok(step)
    }

    /// QuestionActive → QuestionClosed before the deadline.
    ///
    /// # Errors
    /// `NotAuthorized`, `SessionAlreadyEnded`, or `InvalidTransition`.
    pub fn close_question(&mut self, token: &str, _now: Instant) -> Result<Step, QuizError> {
        self.guard_control(token, "close the question", SessionState::QuestionClosed)?;
        let mut step = Step::default();
        self.close_active(&mut step);
        Ok(step)
    }

    /// Opens the next question, closing the active one first. After the
    /// last question the game ends.
    ///
    /// # Errors
    /// `NotAuthorized`, `SessionAlreadyEnded`, or `InvalidTransition` (from
    /// the lobby).
    pub fn next_question(&mut self, token: &str, now: Instant) -> Result<Step, QuizError> {
        self.authorize_host(token)?;
        match self.state {
            SessionState::Ended => return Err(QuizError::SessionAlreadyEnded),
            SessionState::Lobby => {
                return Err(QuizError::InvalidTransition {
                    state: self.state,
                    action: "advance to the next question",
                });
            }
            SessionState::QuestionActive | SessionState::QuestionClosed => {}
        }

        let mut step = Step::default();
        if self.active.is_some() {
            self.close_active(&mut step);
        }
        let next = self.index.map_or(0, |i| i + 1);
        if next < self.questions.len() {
            self.activate(next, now, &mut step);
        } else {
            self.finish(&mut step);
        }
        Ok(step)
    }

    /// Ends the game from any non-terminal state.
    ///
    /// # Errors
    /// `NotAuthorized` or `SessionAlreadyEnded`.
    pub fn end_game(&mut self, token: &str, _now: Instant) -> Result<Step, QuizError> {
        self.guard_control(token, "end the game", SessionState::Ended)?;
        let mut step = Step::default();
        if self.active.is_some() {
            self.close_active(&mut step);
        }
        self.finish(&mut step);
        Ok(step)
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// The deadline for question `question` elapsed. Ignored unless that
    /// question is still the active one.
    pub fn on_deadline(&mut self, question: usize, _now: Instant) -> Step {
        let mut step = Step::default();
        match self.active {
            Some(active) if active.index == question => {
                tracing::debug!(session_id = %self.id, question, "deadline reached");
                self.close_active(&mut step);
            }
            _ => {
                tracing::debug!(session_id = %self.id, question, "stale deadline ignored");
            }
        }
        step
    }

    /// A countdown tick for question `question`.
    pub fn on_countdown(&self, question: usize, remaining: Duration) -> Step {
        let mut step = Step::default();
        if let Some(active) = self.active.filter(|a| a.index == question) {
            step.push(
                Recipient::All,
                ServerEvent::TimerUpdate {
                    question_id: self.questions[active.index].id,
                    remaining_secs: remaining_secs(remaining),
                },
            );
        }
        step
    }

    // -----------------------------------------------------------------------
    // Answers
    // -----------------------------------------------------------------------

    /// Records a player's answer.
    ///
    /// # Errors
    /// - `UnknownPlayer` if the player never joined
    /// - `SessionNotActive` if `question_id` is not the active question or
    ///   `received_at` is at or after its deadline
    /// - `InvalidAnswer` for a blank or over-long text, or an option index
    ///   the question does not have; the player may answer again
    /// - `DuplicateAnswer` if the player already answered it
    pub fn submit(
        &mut self,
        player_id: PlayerId,
        question_id: QuestionId,
        value: AnswerValue,
        received_at: Instant,
    ) -> Result<(AnswerReceipt, Step), QuizError> {
        if !self.roster.contains(player_id) {
            return Err(QuizError::UnknownPlayer(player_id));
        }
        let active = self.active.ok_or(QuizError::SessionNotActive)?;
        let question = &self.questions[active.index];
        if question.id != question_id || received_at >= active.deadline {
            return Err(QuizError::SessionNotActive);
        }
        question
            .check_answer(&value, self.config.max_answer_len)
            .map_err(QuizError::InvalidAnswer)?;
        if self.ledger.contains(player_id, question_id) {
            return Err(QuizError::DuplicateAnswer(player_id, question_id));
        }

        let grade = question.grade(&value);
        let elapsed = received_at.saturating_duration_since(active.activated_at);
        let points = self.config.scoring.award(grade.correct, elapsed, active.duration);
        if points > self.config.scoring.max_award() {
            return Err(QuizError::InvariantViolation(format!(
                "scoring awarded {points}, above its maximum {}",
                self.config.scoring.max_award()
            )));
        }

        self.ledger.record(AnswerRecord {
            player_id,
            question_id,
            value,
            received_at,
            elapsed,
            correct: grade.correct,
            distance: grade.distance,
            points,
        })?;

        let scored_at = if points > 0 {
            self.score_seq += 1;
            Some(self.score_seq)
        } else {
            None
        };
        let player = self
            .roster
            .get_mut(player_id)
            .ok_or(QuizError::UnknownPlayer(player_id))?;
        if let Some(seq) = scored_at {
            player.score = player
                .score
                .checked_add(points)
                .ok_or_else(|| QuizError::InvariantViolation(format!("score overflow for {player_id}")))?;
            player.scored_at = Some(seq);
        }
        let score = player.score;

        tracing::debug!(
            session_id = %self.id,
            %player_id,
            %question_id,
            correct = grade.correct,
            points,
            elapsed_ms = elapsed.as_millis() as u64,
            "answer recorded"
        );

        let receipt = AnswerReceipt {
            question_id,
            correct: grade.correct,
            points_awarded: points,
            score,
        };
        let mut step = Step::default();
        step.push(
            Recipient::Player(player_id),
            ServerEvent::AnswerResult {
                player_id,
                question_id,
                correct: grade.correct,
                points_awarded: points,
                score,
            },
        );
        step.push(
            Recipient::All,
            ServerEvent::AnswerProgress {
                question_id,
                answered: self.ledger.answered_count(question_id),
                total_players: self.roster.len(),
            },
        );
        step.push(Recipient::All, self.leaderboard_event());
        Ok((receipt, step))
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Full state as seen by `you`, for (re)synchronizing a client.
    pub fn snapshot(&self, you: Identity) -> SessionSnapshot {
        let current_id = self.index.map(|i| self.questions[i].id);
        let own_answer = match (you, current_id) {
            (Identity::Player(player_id), Some(question_id)) => self
                .ledger
                .get(player_id, question_id)
                .and_then(|record| self.roster.get(player_id).map(|p| summarize(p, Some(record)))),
            _ => None,
        };

        SessionSnapshot {
            session_id: self.id,
            state: self.state,
            you,
            current_question: self.active.map(|a| self.question_view(a)),
            question_index: self.index,
            total_questions: self.questions.len(),
            players: self.roster.iter().map(Player::view).collect(),
            leaderboard: self.leaderboard(),
            own_answer,
            answered: current_id.map_or(0, |q| self.ledger.answered_count(q)),
        }
    }

    /// Heartbeat summary for the health reporter.
    pub fn status(&self, now: Instant) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            state: self.state,
            question_index: self.index,
            total_questions: self.questions.len(),
            players: self.roster.len(),
            connected_players: self.roster.connected_count(),
            answered: self
                .index
                .map_or(0, |i| self.ledger.answered_count(self.questions[i].id)),
            uptime_ms: self.millis(now),
        }
    }

    /// Verifies that the derived state still adds up.
    ///
    /// # Errors
    /// `InvariantViolation` describing the first inconsistency found.
    pub fn check_invariants(&self) -> Result<(), QuizError> {
        if let Some(index) = self.index {
            if index >= self.questions.len() {
                return Err(QuizError::InvariantViolation(format!(
                    "question index {index} out of range"
                )));
            }
        }
        if (self.state == SessionState::QuestionActive) != self.active.is_some() {
            return Err(QuizError::InvariantViolation(format!(
                "state {} disagrees with active question",
                self.state
            )));
        }
        if let Some(active) = self.active {
            if Some(active.index) != self.index {
                return Err(QuizError::InvariantViolation(
                    "active question is not the current index".into(),
                ));
            }
        }

        let mut totals: HashMap<PlayerId, u64> = HashMap::new();
        for question in &self.questions {
            for record in self.ledger.answers_for(question.id) {
                *totals.entry(record.player_id).or_default() += u64::from(record.points);
            }
        }
        for player in self.roster.iter() {
            let expected = totals.get(&player.id).copied().unwrap_or(0);
            if u64::from(player.score) != expected {
                return Err(QuizError::InvariantViolation(format!(
                    "{} has score {} but ledger holds {expected}",
                    player.id, player.score
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn millis(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn leaderboard_event(&self) -> ServerEvent {
        ServerEvent::LeaderboardUpdate {
            entries: self.leaderboard(),
        }
    }

    fn question_view(&self, active: ActiveQuestion) -> QuestionView {
        let question = &self.questions[active.index];
        QuestionView {
            question_id: question.id,
            prompt: question.prompt.clone(),
            options: question.options.clone(),
            ordinal: active.index + 1,
            total_count: self.questions.len(),
            deadline_ms: self.millis(active.deadline),
            duration_ms: active.duration.as_millis() as u64,
        }
    }

    fn activate(&mut self, index: usize, now: Instant, step: &mut Step) {
        let question = &self.questions[index];
        let duration = question.duration.unwrap_or(self.config.question_duration);
        let deadline = now + duration;
        let active = ActiveQuestion {
            index,
            activated_at: now,
            deadline,
            duration,
        };
        tracing::info!(
            session_id = %self.id,
            question = index,
            question_id = %question.id,
            duration_ms = duration.as_millis() as u64,
            "question activated"
        );

        self.state = SessionState::QuestionActive;
        self.index = Some(index);
        self.active = Some(active);
        step.push(
            Recipient::All,
            ServerEvent::QuestionBroadcast {
                question: self.question_view(active),
            },
        );
        step.timer = TimerDirective::Arm {
            question: index,
            deadline,
        };
    }

    fn close_active(&mut self, step: &mut Step) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.state = SessionState::QuestionClosed;
        let question = &self.questions[active.index];
        let results = self.question_results(question.id);
        let answered = self.ledger.answered_count(question.id);
        tracing::info!(
            session_id = %self.id,
            question = active.index,
            question_id = %question.id,
            answered,
            players = self.roster.len(),
            "question closed"
        );

        step.push(
            Recipient::All,
            ServerEvent::QuestionClosed {
                question_id: question.id,
                correct_answer: question.answer.clone(),
                results,
                answered,
                total_players: self.roster.len(),
            },
        );
        step.push(Recipient::All, self.leaderboard_event());
        step.timer = TimerDirective::Cancel;
    }

    fn finish(&mut self, step: &mut Step) {
        self.state = SessionState::Ended;
        self.active = None;
        let final_leaderboard = self.leaderboard();
        tracing::info!(
            session_id = %self.id,
            players = self.roster.len(),
            winner = ?final_leaderboard.first().map(|e| e.player_id),
            "game ended"
        );
        step.push(Recipient::All, ServerEvent::GameEnded { final_leaderboard });
        step.timer = TimerDirective::Cancel;
    }

    /// Per-player outcome: answered players first (correct, then closest,
    /// then fastest), then players who did not answer in join order.
    fn question_results(&self, question_id: QuestionId) -> Vec<AnswerSummary> {
        let mut results: Vec<AnswerSummary> = self
            .roster
            .iter()
            .map(|player| summarize(player, self.ledger.get(player.id, question_id)))
            .collect();
        results.sort_by(|a, b| {
            b.answered
                .cmp(&a.answered)
                .then(b.correct.cmp(&a.correct))
                .then_with(|| {
                    a.distance
                        .unwrap_or(f64::INFINITY)
                        .total_cmp(&b.distance.unwrap_or(f64::INFINITY))
                })
                .then(a.elapsed_ms.cmp(&b.elapsed_ms))
        });
        results
    }
}

fn summarize(player: &Player, record: Option<&AnswerRecord>) -> AnswerSummary {
    match record {
        Some(record) => AnswerSummary {
            player_id: player.id,
            name: player.name.clone(),
            answered: true,
            value: Some(record.value.clone()),
            correct: record.correct,
            points: record.points,
            elapsed_ms: Some(record.elapsed.as_millis() as u64),
            distance: record.distance,
        },
        None => AnswerSummary {
            player_id: player.id,
            name: player.name.clone(),
            answered: false,
            value: None,
            correct: false,
            points: 0,
            elapsed_ms: None,
            distance: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LatencyScoring, ranking::is_sorted};
    use quizcast_registry::StaticHostToken;

    const HOST: &str = "host-token";

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn text(v: &str) -> AnswerValue {
        AnswerValue::Text(v.into())
    }

    fn two_questions() -> Vec<Question> {
        vec![Question::text(1, "2+2?", "4"), Question::text(2, "3+3?", "6")]
    }

    fn session_with(config: SessionConfig, questions: Vec<Question>) -> (QuizSession, Instant) {
        let epoch = Instant::now();
        let session = QuizSession::new(
            SessionId(1),
            config,
            questions,
            Arc::new(StaticHostToken::new(HOST)),
            epoch,
        );
        (session, epoch)
    }

    fn ten_second_session() -> (QuizSession, Instant) {
        session_with(
            SessionConfig {
                question_duration: secs(10),
                ..SessionConfig::default()
            },
            two_questions(),
        )
    }

    fn events_of(step: &Step) -> Vec<&ServerEvent> {
        step.events.iter().map(|(_, e)| e).collect()
    }

    // =====================================================================
    // Full game scenarios
    // =====================================================================

    #[test]
    fn test_two_question_game_ranks_fast_player_first() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        let (b, _) = s.join("B").unwrap();

        let step = s.start_game(HOST, t0).unwrap();
        assert_eq!(
            step.timer,
            TimerDirective::Arm {
                question: 0,
                deadline: t0 + secs(10)
            }
        );

        let (receipt, _) = s.submit(a, QuestionId(1), text("4"), t0 + secs(2)).unwrap();
        assert!(receipt.correct);
        assert_eq!(receipt.points_awarded, 10);

        // Deadline fires at t=10, then B's answer arrives at t=11.
        let closed = s.on_deadline(0, t0 + secs(10));
        assert_eq!(closed.timer, TimerDirective::Cancel);
        assert_eq!(s.state(), SessionState::QuestionClosed);
        assert_eq!(
            s.submit(b, QuestionId(1), text("4"), t0 + secs(11)),
            Err(QuizError::SessionNotActive)
        );

        let t1 = t0 + secs(20);
        s.next_question(HOST, t1).unwrap();
        s.submit(a, QuestionId(2), text("6"), t1 + secs(1)).unwrap();
        s.submit(b, QuestionId(2), text("6"), t1 + secs(3)).unwrap();

        let end = s.next_question(HOST, t1 + secs(5)).unwrap();
        assert_eq!(s.state(), SessionState::Ended);
        let Some(ServerEvent::GameEnded { final_leaderboard }) = events_of(&end).last().copied() else {
            panic!("expected GameEnded last, got {:?}", end.events);
        };
        assert_eq!(final_leaderboard[0].player_id, a);
        assert_eq!(final_leaderboard[0].score, 20);
        assert_eq!(final_leaderboard[1].player_id, b);
        assert_eq!(final_leaderboard[1].score, 10);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_end_game_twice_returns_session_already_ended() {
        let (mut s, t0) = ten_second_session();
        s.start_game(HOST, t0).unwrap();

        s.end_game(HOST, t0 + secs(1)).unwrap();

        assert_eq!(s.end_game(HOST, t0 + secs(2)), Err(QuizError::SessionAlreadyEnded));
        assert_eq!(s.start_game(HOST, t0), Err(QuizError::SessionAlreadyEnded));
        assert_eq!(s.next_question(HOST, t0), Err(QuizError::SessionAlreadyEnded));
        assert_eq!(s.close_question(HOST, t0), Err(QuizError::SessionAlreadyEnded));
    }

    #[test]
    fn test_end_game_mid_question_closes_it_then_ends() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();

        let step = s.end_game(HOST, t0 + secs(3)).unwrap();

        let kinds: Vec<&ServerEvent> = events_of(&step);
        assert!(matches!(kinds[0], ServerEvent::QuestionClosed { .. }));
        assert!(matches!(kinds.last(), Some(ServerEvent::GameEnded { .. })));
        assert_eq!(step.timer, TimerDirective::Cancel);
        assert_eq!(
            s.submit(a, QuestionId(1), text("4"), t0 + secs(4)),
            Err(QuizError::SessionNotActive)
        );
    }

    #[test]
    fn test_end_game_from_lobby_is_permitted() {
        let (mut s, t0) = ten_second_session();
        s.end_game(HOST, t0).unwrap();
        assert_eq!(s.state(), SessionState::Ended);
        assert_eq!(s.join("late").map(|_| ()), Err(QuizError::SessionAlreadyEnded));
    }

    // =====================================================================
    // Control rules
    // =====================================================================

    #[test]
    fn test_control_from_non_host_returns_not_authorized() {
        let (mut s, t0) = ten_second_session();
        assert_eq!(s.start_game("guess", t0), Err(QuizError::NotAuthorized));
        assert_eq!(s.state(), SessionState::Lobby);

        s.start_game(HOST, t0).unwrap();
        assert_eq!(s.next_question("", t0), Err(QuizError::NotAuthorized));
        assert_eq!(s.close_question("x", t0), Err(QuizError::NotAuthorized));
        assert_eq!(s.end_game("x", t0), Err(QuizError::NotAuthorized));
        assert_eq!(s.state(), SessionState::QuestionActive);
    }

    #[test]
    fn test_authorization_checked_before_state() {
        let (mut s, t0) = ten_second_session();
        s.end_game(HOST, t0).unwrap();
        assert_eq!(s.end_game("intruder", t0), Err(QuizError::NotAuthorized));
    }

    #[test]
    fn test_start_game_without_questions_returns_empty_question_set() {
        let (mut s, t0) = session_with(SessionConfig::default(), Vec::new());
        assert_eq!(s.start_game(HOST, t0), Err(QuizError::EmptyQuestionSet));
        assert_eq!(s.state(), SessionState::Lobby);
    }

    #[test]
    fn test_start_game_twice_returns_invalid_transition() {
        let (mut s, t0) = ten_second_session();
        s.start_game(HOST, t0).unwrap();
        assert!(matches!(
            s.start_game(HOST, t0),
            Err(QuizError::InvalidTransition {
                state: SessionState::QuestionActive,
                ..
            })
        ));
    }

    #[test]
    fn test_next_question_in_lobby_returns_invalid_transition() {
        let (mut s, t0) = ten_second_session();
        assert!(matches!(
            s.next_question(HOST, t0),
            Err(QuizError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_close_question_when_closed_returns_invalid_transition() {
        let (mut s, t0) = ten_second_session();
        s.start_game(HOST, t0).unwrap();
        s.close_question(HOST, t0 + secs(1)).unwrap();
        assert!(matches!(
            s.close_question(HOST, t0 + secs(2)),
            Err(QuizError::InvalidTransition {
                state: SessionState::QuestionClosed,
                ..
            })
        ));
    }

    #[test]
    fn test_next_question_while_active_closes_then_opens_next() {
        let (mut s, t0) = ten_second_session();
        s.start_game(HOST, t0).unwrap();

        let step = s.next_question(HOST, t0 + secs(4)).unwrap();

        let kinds = events_of(&step);
        assert!(matches!(kinds[0], ServerEvent::QuestionClosed { question_id, .. } if *question_id == QuestionId(1)));
        assert!(matches!(
            kinds.last(),
            Some(ServerEvent::QuestionBroadcast { question }) if question.question_id == QuestionId(2)
        ));
        assert_eq!(
            step.timer,
            TimerDirective::Arm {
                question: 1,
                deadline: t0 + secs(14)
            }
        );
        assert_eq!(s.current_index(), Some(1));
    }

    #[test]
    fn test_question_index_never_decreases() {
        let (mut s, t0) = session_with(
            SessionConfig::default(),
            (1..=5).map(|i| Question::text(i, format!("q{i}?"), "a")).collect(),
        );
        s.start_game(HOST, t0).unwrap();
        let mut last = s.current_index();
        let mut now = t0;
        while s.state() != SessionState::Ended {
            now += secs(1);
            if s.state() == SessionState::QuestionActive && now.duration_since(t0).as_secs() % 2 == 0 {
                s.close_question(HOST, now).unwrap();
            } else {
                s.next_question(HOST, now).unwrap();
            }
            assert!(s.current_index() >= last);
            last = s.current_index();
            s.check_invariants().unwrap();
        }
        assert_eq!(last, Some(4));
    }

    #[test]
    fn test_question_duration_override_sets_deadline() {
        let (mut s, t0) = session_with(
            SessionConfig::default(),
            vec![Question::text(1, "quick?", "y").with_duration(secs(5))],
        );
        let step = s.start_game(HOST, t0).unwrap();
        assert_eq!(s.deadline(), Some(t0 + secs(5)));
        let Some(ServerEvent::QuestionBroadcast { question }) = events_of(&step).first().copied() else {
            panic!("expected broadcast");
        };
        assert_eq!(question.duration_ms, 5_000);
        assert_eq!(question.ordinal, 1);
        assert_eq!(question.total_count, 1);
    }

    #[test]
    fn test_random_order_keeps_same_question_set() {
        let questions: Vec<Question> = (1..=20).map(|i| Question::text(i, format!("q{i}?"), "a")).collect();
        let (mut s, t0) = session_with(
            SessionConfig {
                order: QuestionOrder::Random,
                ..SessionConfig::default()
            },
            questions,
        );
        s.start_game(HOST, t0).unwrap();
        let mut ids: Vec<u64> = s.questions().iter().map(|q| q.id.0).collect();
        ids.sort();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    // =====================================================================
    // Deadline & countdown
    // =====================================================================

    #[test]
    fn test_stale_deadline_is_ignored() {
        let (mut s, t0) = ten_second_session();
        s.start_game(HOST, t0).unwrap();
        s.next_question(HOST, t0 + secs(2)).unwrap();

        let step = s.on_deadline(0, t0 + secs(10));

        assert!(step.is_empty());
        assert_eq!(s.state(), SessionState::QuestionActive);
        assert_eq!(s.current_index(), Some(1));
    }

    #[test]
    fn test_countdown_emits_timer_update_for_active_question_only() {
        let (mut s, t0) = ten_second_session();
        s.start_game(HOST, t0).unwrap();

        let step = s.on_countdown(0, Duration::from_millis(7_400));
        assert!(matches!(
            events_of(&step)[..],
            [ServerEvent::TimerUpdate { remaining_secs: 8, .. }]
        ));
        assert!(s.on_countdown(1, secs(3)).is_empty());
    }

    // =====================================================================
    // Answers
    // =====================================================================

    #[test]
    fn test_submit_twice_returns_duplicate_answer_and_keeps_one_record() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();

        s.submit(a, QuestionId(1), text("5"), t0 + secs(1)).unwrap();
        let second = s.submit(a, QuestionId(1), text("4"), t0 + secs(2));

        assert_eq!(second, Err(QuizError::DuplicateAnswer(a, QuestionId(1))));
        assert_eq!(s.ledger().len(), 1);
        assert_eq!(s.player(a).unwrap().score, 0);
    }

    #[test]
    fn test_submit_at_deadline_is_rejected() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();

        // Deadline not yet processed, but the receipt time is on it.
        assert_eq!(
            s.submit(a, QuestionId(1), text("4"), t0 + secs(10)),
            Err(QuizError::SessionNotActive)
        );
        assert!(s.submit(a, QuestionId(1), text("4"), t0 + secs(10) - Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_submit_after_deadline_processed_is_rejected_even_if_stamped_earlier() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();

        s.on_deadline(0, t0 + secs(10));

        // Read off the socket at t=9, but queued behind the deadline.
        assert_eq!(
            s.submit(a, QuestionId(1), text("4"), t0 + secs(9)),
            Err(QuizError::SessionNotActive)
        );
        assert!(s.ledger().get(a, QuestionId(1)).is_none());
        assert_eq!(s.player(a).unwrap().score, 0);
    }

    #[test]
    fn test_blank_answer_is_rejected_and_player_can_still_answer() {
        let (mut s, t0) = session_with(
            SessionConfig {
                question_duration: secs(10),
                ..SessionConfig::default()
            },
            vec![Question::numeric(1, "Moon landing year?", 1969.0)],
        );
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();

        assert!(matches!(
            s.submit(a, QuestionId(1), text("   "), t0 + secs(1)),
            Err(QuizError::InvalidAnswer(_))
        ));
        assert_eq!(s.ledger().answered_count(QuestionId(1)), 0);

        let (receipt, _) = s.submit(a, QuestionId(1), text("1969"), t0 + secs(2)).unwrap();
        assert!(receipt.correct);
    }

    #[test]
    fn test_over_long_answer_is_rejected() {
        let (mut s, t0) = session_with(
            SessionConfig {
                question_duration: secs(10),
                max_answer_len: 8,
                ..SessionConfig::default()
            },
            two_questions(),
        );
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();

        let flood = "4".repeat(1 << 20);
        assert!(matches!(
            s.submit(a, QuestionId(1), text(&flood), t0 + secs(1)),
            Err(QuizError::InvalidAnswer(_))
        ));
        assert!(s.submit(a, QuestionId(1), text("4"), t0 + secs(2)).is_ok());
    }

    #[test]
    fn test_submit_for_other_question_is_rejected() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.start_game(HOST, t0).unwrap();
        assert_eq!(
            s.submit(a, QuestionId(2), text("6"), t0 + secs(1)),
            Err(QuizError::SessionNotActive)
        );
    }

    #[test]
    fn test_submit_in_lobby_and_unknown_player_are_rejected() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        assert_eq!(
            s.submit(a, QuestionId(1), text("4"), t0),
            Err(QuizError::SessionNotActive)
        );
        s.start_game(HOST, t0).unwrap();
        assert_eq!(
            s.submit(PlayerId(99), QuestionId(1), text("4"), t0),
            Err(QuizError::UnknownPlayer(PlayerId(99)))
        );
    }

    #[test]
    fn test_submit_emits_unicast_result_then_progress_and_leaderboard() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.join("B").unwrap();
        s.start_game(HOST, t0).unwrap();

        let (_, step) = s.submit(a, QuestionId(1), text("4"), t0 + secs(1)).unwrap();

        assert_eq!(step.events[0].0, Recipient::Player(a));
        assert!(matches!(step.events[0].1, ServerEvent::AnswerResult { points_awarded: 10, score: 10, .. }));
        assert!(matches!(
            step.events[1].1,
            ServerEvent::AnswerProgress { answered: 1, total_players: 2, .. }
        ));
        let ServerEvent::LeaderboardUpdate { entries } = &step.events[2].1 else {
            panic!("expected leaderboard");
        };
        assert!(is_sorted(entries));
        assert_eq!(entries[0].player_id, a);
    }

    #[test]
    fn test_latency_scoring_rewards_faster_answer() {
        let (mut s, t0) = session_with(
            SessionConfig {
                question_duration: secs(10),
                scoring: Arc::new(LatencyScoring::default()),
                ..SessionConfig::default()
            },
            two_questions(),
        );
        let (a, _) = s.join("A").unwrap();
        let (b, _) = s.join("B").unwrap();
        s.start_game(HOST, t0).unwrap();

        let (fast, _) = s.submit(a, QuestionId(1), text("4"), t0 + secs(1)).unwrap();
        let (slow, _) = s.submit(b, QuestionId(1), text("4"), t0 + secs(9)).unwrap();

        assert!(fast.points_awarded > slow.points_awarded);
        assert!(s.ledger().points_for_question(QuestionId(1)) <= 2 * 1000);
    }

    #[test]
    fn test_points_per_question_bounded_by_players_times_max() {
        let (mut s, t0) = ten_second_session();
        let ids: Vec<PlayerId> = (0..8).map(|i| s.join(&format!("p{i}")).unwrap().0).collect();
        s.start_game(HOST, t0).unwrap();
        for (n, id) in ids.iter().enumerate() {
            let _ = s.submit(*id, QuestionId(1), text("4"), t0 + Duration::from_millis(n as u64 * 100));
            let _ = s.submit(*id, QuestionId(1), text("4"), t0 + secs(1));
        }
        assert!(s.ledger().points_for_question(QuestionId(1)) <= ids.len() as u64 * 10);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_tie_broken_by_who_reached_score_first() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        let (b, _) = s.join("B").unwrap();
        s.start_game(HOST, t0).unwrap();

        s.submit(b, QuestionId(1), text("4"), t0 + secs(1)).unwrap();
        s.submit(a, QuestionId(1), text("4"), t0 + secs(2)).unwrap();

        let board = s.leaderboard();
        assert_eq!(board[0].player_id, b);
        assert_eq!(board[1].player_id, a);
    }

    // =====================================================================
    // Results, presence, snapshots
    // =====================================================================

    #[test]
    fn test_question_closed_lists_closest_first_and_silent_players_last() {
        let (mut s, t0) = session_with(
            SessionConfig::default(),
            vec![Question::numeric(1, "Year of the moon landing?", 1969.0)],
        );
        let (a, _) = s.join("A").unwrap();
        let (b, _) = s.join("B").unwrap();
        let (c, _) = s.join("C").unwrap();
        let (d, _) = s.join("D").unwrap();
        s.start_game(HOST, t0).unwrap();
        s.submit(a, QuestionId(1), text("1960"), t0 + secs(1)).unwrap();
        s.submit(c, QuestionId(1), text("1969"), t0 + secs(2)).unwrap();
        s.submit(d, QuestionId(1), text("1971"), t0 + secs(3)).unwrap();

        let step = s.close_question(HOST, t0 + secs(4)).unwrap();

        let ServerEvent::QuestionClosed { results, answered, total_players, .. } = &step.events[0].1 else {
            panic!("expected QuestionClosed");
        };
        let order: Vec<PlayerId> = results.iter().map(|r| r.player_id).collect();
        assert_eq!(order, vec![c, d, a, b]);
        assert_eq!((*answered, *total_players), (3, 4));
        assert!(!results[3].answered);
        assert_eq!(results[1].distance, Some(2.0));
    }

    #[test]
    fn test_set_presence_emits_left_and_reconnected_once() {
        let (mut s, _) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        assert!(s.set_presence(a, true).unwrap().is_empty());

        let left = s.set_presence(a, false).unwrap();
        assert_eq!(left.events[0].0, Recipient::AllExcept(a));
        assert!(matches!(left.events[0].1, ServerEvent::PlayerLeft { .. }));
        assert!(s.set_presence(a, false).unwrap().is_empty());

        let back = s.set_presence(a, true).unwrap();
        assert!(matches!(back.events[0].1, ServerEvent::PlayerReconnected { .. }));
        assert_eq!(s.set_presence(PlayerId(42), true).map(|_| ()), Err(QuizError::UnknownPlayer(PlayerId(42))));
    }

    #[test]
    fn test_joined_player_is_disconnected_until_first_attach() {
        let (mut s, _) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        assert_eq!(s.status(s.epoch()).connected_players, 0);
        assert!(!s.snapshot(Identity::Host).players[0].connected);

        let first = s.set_presence(a, true).unwrap();
        assert!(first.events.is_empty());
        assert_eq!(s.status(s.epoch()).connected_players, 1);
    }

    #[test]
    fn test_disconnected_player_keeps_score_and_can_answer_after_return() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        s.set_presence(a, true).unwrap();
        s.start_game(HOST, t0).unwrap();

        s.set_presence(a, false).unwrap();
        s.set_presence(a, true).unwrap();

        assert!(s.submit(a, QuestionId(1), text("4"), t0 + secs(6)).is_ok());
        assert_eq!(s.player(a).unwrap().score, 10);
    }

    #[test]
    fn test_snapshot_includes_active_question_and_own_answer() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        let (b, _) = s.join("B").unwrap();
        s.start_game(HOST, t0).unwrap();
        s.submit(a, QuestionId(1), text("4"), t0 + secs(1)).unwrap();

        let mine = s.snapshot(Identity::Player(a));
        assert_eq!(mine.state, SessionState::QuestionActive);
        assert_eq!(mine.current_question.as_ref().map(|q| q.question_id), Some(QuestionId(1)));
        assert_eq!(mine.own_answer.as_ref().map(|o| o.points), Some(10));
        assert_eq!(mine.answered, 1);
        assert_eq!(mine.players.len(), 2);

        assert!(s.snapshot(Identity::Player(b)).own_answer.is_none());
        assert!(s.snapshot(Identity::Host).own_answer.is_none());
    }

    #[test]
    fn test_status_reports_counts() {
        let (mut s, t0) = ten_second_session();
        let (a, _) = s.join("A").unwrap();
        let (b, _) = s.join("B").unwrap();
        s.set_presence(a, true).unwrap();
        s.set_presence(b, true).unwrap();
        s.set_presence(a, false).unwrap();
        s.start_game(HOST, t0).unwrap();

        let status = s.status(t0 + secs(3));
        assert_eq!(status.players, 2);
        assert_eq!(status.connected_players, 1);
        assert_eq!(status.question_index, Some(0));
        assert_eq!(status.total_questions, 2);
    }

    #[test]
    fn test_join_during_game_and_duplicate_name() {
        let (mut s, t0) = ten_second_session();
        s.join("Ada").unwrap();
        s.start_game(HOST, t0).unwrap();

        let (late, step) = s.join("Linus").unwrap();
        assert!(matches!(&step.events[0].1, ServerEvent::PlayerJoined { player_id, .. } if *player_id == late));
        assert_eq!(s.join("ADA").map(|_| ()), Err(QuizError::NameTaken("ADA".into())));
    }
}
