//! Session actor: one Tokio task per quiz session.
//!
//! The actor owns the [`QuizSession`], the question timer, and the
//! dispatcher. It is the only writer of session state: commands from
//! connection handlers and timer firings are processed one at a time, in
//! the order the actor receives them. Everything it says to clients goes
//! through the dispatcher, so every client sees events in the same order.
//!
//! # How a command flows
//!
//! ```text
//! handler ──SessionHandle──→ mailbox ──→ actor ──→ QuizSession (pure)
//!    ▲                                     │            │
//!    │                                     │          Step { events, timer }
//!    └────── oneshot reply ◄───────────────┤            │
//!                                          ▼            ▼
//!                               QuestionTimer ◄── arm / cancel
//!                                          │
//!                               Dispatcher ──→ each connection's queue
//! ```
//!
//! A [`SessionHandle`] is just the sending half of the mailbox plus a few
//! ids. Request-style methods (`join`, `submit`, `control`) carry a
//! `oneshot` sender and wait for the actor's verdict; fire-and-forget
//! ones (`detach`, `resync`) only enqueue.
//!
//! # Deadlines and answers
//!
//! The timer is polled inside the same `select!` as the mailbox, so a
//! deadline is just another event in the queue. Whichever the actor takes
//! first wins: an answer taken before the deadline is graded against its
//! `received_at`, and an answer taken after finds the question closed.
//! The mailbox usually goes first; see `next_wake` for the exception.
//!
//! # Failure isolation
//!
//! Ordinary rejections go back to the caller and the actor carries on. An
//! invariant violation is different: the actor tells every client the
//! session aborted, closes their queues, and exits. Other sessions run on
//! their own tasks and never notice. Handles to the dead session then
//! fail with [`QuizError::Unavailable`].

use std::sync::Arc;
use std::time::Duration;

use quizcast_protocol::{
    AnswerValue, Identity, PlayerId, QuestionId, Recipient, ServerEvent, SessionId, SessionSnapshot,
    SessionStatus,
};
use quizcast_registry::{ConnectionRegistry, Dispatcher, EventSender, HostAuthenticator, Registration};
use quizcast_timer::{QuestionTimer, TimerEvent};
use quizcast_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::machine::{AnswerReceipt, Step, TimerDirective};
use crate::{HealthReporter, Question, QuizError, QuizSession, SessionConfig};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Consecutive mailbox commands after which a due timer event goes first.
const TIMER_POLL_EVERY: u32 = 16;

/// A host control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    CloseQuestion,
    Next,
    End,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::CloseQuestion => "close_question",
            Self::Next => "next",
            Self::End => "end",
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, QuizError>>;

/// Commands sent to a session actor through its mailbox.
pub(crate) enum SessionCommand {
    Join {
        name: String,
        reply: Reply<PlayerId>,
    },
    AuthorizeHost {
        token: String,
        reply: Reply<()>,
    },
    Control {
        token: String,
        action: ControlAction,
        reply: Reply<()>,
    },
    Submit {
        player_id: PlayerId,
        question_id: QuestionId,
        value: AnswerValue,
        /// Stamped by the connection handler when the frame was read.
        received_at: Instant,
        reply: Reply<AnswerReceipt>,
    },
    /// Route an authenticated connection's outbound queue to `identity`.
    Attach {
        identity: Identity,
        connection: ConnectionId,
        sender: EventSender,
        reply: Reply<Registration>,
    },
    /// The connection for `identity` went away.
    Detach {
        identity: Identity,
        connection: ConnectionId,
    },
    /// Send a fresh snapshot to `identity`.
    Resync {
        identity: Identity,
    },
    Snapshot {
        identity: Identity,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

/// Handle to a running session actor.
///
/// Cheap to clone. Every method fails with [`QuizError::Unavailable`] once
/// the actor has stopped.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionCommand>,
    registry: ConnectionRegistry,
    epoch: Instant,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The session's connection registry, for resolving reconnect tokens.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Instant the session was created; event timestamps count from here.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, QuizError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| QuizError::Unavailable(self.session_id))?;
        reply_rx
            .await
            .map_err(|_| QuizError::Unavailable(self.session_id))
    }

    async fn tell(&self, command: SessionCommand) -> Result<(), QuizError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| QuizError::Unavailable(self.session_id))
    }

    /// Adds a player under `name`.
    pub async fn join(&self, name: impl Into<String>) -> Result<PlayerId, QuizError> {
        let name = name.into();
        self.request(|reply| SessionCommand::Join { name, reply }).await?
    }

    /// Checks a host token.
    pub async fn authorize_host(&self, token: impl Into<String>) -> Result<(), QuizError> {
        let token = token.into();
        self.request(|reply| SessionCommand::AuthorizeHost { token, reply })
            .await?
    }

    /// Runs a host control event.
    pub async fn control(&self, token: impl Into<String>, action: ControlAction) -> Result<(), QuizError> {
        let token = token.into();
        self.request(|reply| SessionCommand::Control { token, action, reply })
            .await?
    }

    pub async fn start_game(&self, token: impl Into<String>) -> Result<(), QuizError> {
        self.control(token, ControlAction::Start).await
    }

    pub async fn close_question(&self, token: impl Into<String>) -> Result<(), QuizError> {
        self.control(token, ControlAction::CloseQuestion).await
    }

    pub async fn next_question(&self, token: impl Into<String>) -> Result<(), QuizError> {
        self.control(token, ControlAction::Next).await
    }

    pub async fn end_game(&self, token: impl Into<String>) -> Result<(), QuizError> {
        self.control(token, ControlAction::End).await
    }

    /// Submits an answer received at `received_at`.
    pub async fn submit(
        &self,
        player_id: PlayerId,
        question_id: QuestionId,
        value: AnswerValue,
        received_at: Instant,
    ) -> Result<AnswerReceipt, QuizError> {
        self.request(|reply| SessionCommand::Submit {
            player_id,
            question_id,
            value,
            received_at,
            reply,
        })
        .await?
    }

    /// Registers `sender` as the outbound queue of `identity`. The actor
    /// queues `Welcome` and a `Snapshot` on it before any later event.
    pub async fn attach(
        &self,
        identity: Identity,
        connection: ConnectionId,
        sender: EventSender,
    ) -> Result<Registration, QuizError> {
        self.request(|reply| SessionCommand::Attach {
            identity,
            connection,
            sender,
            reply,
        })
        .await?
    }

    /// Reports that `connection` for `identity` closed.
    pub async fn detach(&self, identity: Identity, connection: ConnectionId) -> Result<(), QuizError> {
        self.tell(SessionCommand::Detach { identity, connection }).await
    }

    /// Asks for a fresh snapshot to be queued for `identity`.
    pub async fn resync(&self, identity: Identity) -> Result<(), QuizError> {
        self.tell(SessionCommand::Resync { identity }).await
    }

    pub async fn snapshot(&self, identity: Identity) -> Result<SessionSnapshot, QuizError> {
        self.request(|reply| SessionCommand::Snapshot { identity, reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, QuizError> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    /// Stops the actor. Connections stay open until their handlers notice.
    pub async fn shutdown(&self) -> Result<(), QuizError> {
        self.tell(SessionCommand::Shutdown).await
    }
}

/// Starts a session actor and returns its handle.
pub fn spawn_session(
    session_id: SessionId,
    config: SessionConfig,
    questions: Vec<Question>,
    host: Arc<dyn HostAuthenticator>,
    reporter: Arc<dyn HealthReporter>,
) -> SessionHandle {
    let (actor, handle) = SessionActor::new(session_id, config, questions, host, reporter);
    tokio::spawn(actor.run());
    handle
}

enum Wake {
    Command(Option<SessionCommand>),
    Timer(TimerEvent),
    Heartbeat,
}

/// Direct address of one identity.
fn direct(identity: Identity) -> Recipient {
    match identity {
        Identity::Host => Recipient::Host,
        Identity::Player(player_id) => Recipient::Player(player_id),
    }
}

struct SessionActor {
    session: QuizSession,
    dispatcher: Dispatcher,
    timer: QuestionTimer,
    reporter: Arc<dyn HealthReporter>,
    receiver: mpsc::Receiver<SessionCommand>,
    heartbeat_interval: Duration,
    /// Commands handled since the timer last had first pick.
    commands_in_row: u32,
}

impl SessionActor {
    fn new(
        session_id: SessionId,
        config: SessionConfig,
        questions: Vec<Question>,
        host: Arc<dyn HostAuthenticator>,
        reporter: Arc<dyn HealthReporter>,
    ) -> (Self, SessionHandle) {
        let epoch = Instant::now();
        let registry = ConnectionRegistry::new(config.registry.clone());
        let (sender, receiver) = mpsc::channel(config.mailbox_size.max(1));

        let actor = Self {
            timer: QuestionTimer::new(config.timer.clone()),
            heartbeat_interval: config.heartbeat_interval.max(MIN_HEARTBEAT),
            dispatcher: Dispatcher::new(registry.clone(), epoch),
            session: QuizSession::new(session_id, config, questions, host, epoch),
            reporter,
            receiver,
            commands_in_row: 0,
        };
        let handle = SessionHandle {
            session_id,
            sender,
            registry,
            epoch,
        };
        (actor, handle)
    }

    async fn run(mut self) {
        let session_id = self.session.id();
        tracing::info!(%session_id, "session actor started");

        let mut heartbeat = time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = self.next_wake(&mut heartbeat).await;

            let outcome = match wake {
                Wake::Command(None | Some(SessionCommand::Shutdown)) => {
                    tracing::info!(%session_id, "session shutting down");
                    break;
                }
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Timer(event) => self.handle_timer(event).await,
                Wake::Heartbeat => Ok(()),
            };

            match outcome {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    self.abort(err).await;
                    break;
                }
                Err(err) => {
                    tracing::warn!(%session_id, error = %err, "command failed");
                }
            }
            self.reporter.heartbeat(&self.session.status(Instant::now()));
        }

        self.timer.cancel();
        self.reporter.session_stopped(session_id);
        tracing::info!(%session_id, "session actor stopped");
    }

    /// Waits for the next thing to do.
    ///
    /// The mailbox is polled first, so an answer already queued when a
    /// deadline comes due is graded before the question closes. After
    /// [`TIMER_POLL_EVERY`] commands in a row the timer gets first pick
    /// once, so a busy mailbox cannot hold a deadline back for long.
    async fn next_wake(&mut self, heartbeat: &mut time::Interval) -> Wake {
        if self.commands_in_row >= TIMER_POLL_EVERY {
            self.commands_in_row = 0;
            return tokio::select! {
                biased;
                event = self.timer.next_event() => Wake::Timer(event),
                command = self.receiver.recv() => Wake::Command(command),
                _ = heartbeat.tick() => Wake::Heartbeat,
            };
        }

        let wake = tokio::select! {
            biased;
            command = self.receiver.recv() => Wake::Command(command),
            event = self.timer.next_event() => Wake::Timer(event),
            _ = heartbeat.tick() => Wake::Heartbeat,
        };
        match wake {
            Wake::Command(_) => self.commands_in_row += 1,
            Wake::Timer(_) | Wake::Heartbeat => self.commands_in_row = 0,
        }
        wake
    }

    /// Errors returned here are not the caller's; fatal ones stop the actor.
    async fn handle_command(&mut self, command: SessionCommand) -> Result<(), QuizError> {
        match command {
            SessionCommand::Join { name, reply } => {
                let result = self.session.join(&name);
                self.settle(result, reply).await
            }
            SessionCommand::AuthorizeHost { token, reply } => {
                let _ = reply.send(self.session.authorize_host(&token));
                Ok(())
            }
            SessionCommand::Control { token, action, reply } => {
                let now = Instant::now();
                let result = match action {
                    ControlAction::Start => self.session.start_game(&token, now),
                    ControlAction::CloseQuestion => self.session.close_question(&token, now),
                    ControlAction::Next => self.session.next_question(&token, now),
                    ControlAction::End => self.session.end_game(&token, now),
                };
                if let Err(err) = &result {
                    tracing::debug!(
                        session_id = %self.session.id(),
                        action = action.as_str(),
                        error = %err,
                        "control rejected"
                    );
                }
                self.settle(result.map(|step| ((), step)), reply).await
            }
            SessionCommand::Submit {
                player_id,
                question_id,
                value,
                received_at,
                reply,
            } => {
                let result = self.session.submit(player_id, question_id, value, received_at);
                if let Err(err) = &result {
                    tracing::debug!(
                        session_id = %self.session.id(),
                        %player_id,
                        %question_id,
                        error = %err,
                        "answer rejected"
                    );
                }
                self.settle(result, reply).await
            }
            SessionCommand::Attach {
                identity,
                connection,
                sender,
                reply,
            } => self.attach(identity, connection, sender, reply).await,
            SessionCommand::Detach { identity, connection } => {
                if !self.dispatcher.registry().unregister(identity, connection).await {
                    return Ok(());
                }
                match identity {
                    Identity::Player(player_id) => self.mark_disconnected(player_id).await,
                    Identity::Host => Ok(()),
                }
            }
            SessionCommand::Resync { identity } => {
                let snapshot = self.session.snapshot(identity);
                self.deliver(vec![(direct(identity), ServerEvent::Snapshot { snapshot })])
                    .await
            }
            SessionCommand::Snapshot { identity, reply } => {
                let _ = reply.send(self.session.snapshot(identity));
                Ok(())
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.session.status(Instant::now()));
                Ok(())
            }
            // Handled by the run loop.
            SessionCommand::Shutdown => Ok(()),
        }
    }

    async fn handle_timer(&mut self, event: TimerEvent) -> Result<(), QuizError> {
        let step = match event {
            TimerEvent::Countdown { question, remaining } => self.session.on_countdown(question, remaining),
            TimerEvent::Deadline { question } => self.session.on_deadline(question, Instant::now()),
        };
        self.apply(step).await
    }

    async fn attach(
        &mut self,
        identity: Identity,
        connection: ConnectionId,
        sender: EventSender,
        reply: Reply<Registration>,
    ) -> Result<(), QuizError> {
        let mut events = Vec::new();
        if let Identity::Player(player_id) = identity {
            match self.session.set_presence(player_id, true) {
                Ok(step) => events.extend(step.events),
                Err(err) => {
                    let _ = reply.send(Err(err));
                    return Ok(());
                }
            }
        }

        let registration = self
            .dispatcher
            .registry()
            .register(identity, connection, sender)
            .await;

        let recipient = direct(identity);
        events.push((
            recipient,
            ServerEvent::Welcome {
                session_id: self.session.id(),
                identity,
                reconnect_token: registration.reconnect_token.clone(),
            },
        ));
        events.push((
            recipient,
            ServerEvent::Snapshot {
                snapshot: self.session.snapshot(identity),
            },
        ));

        let delivered = self.deliver(events).await;
        let _ = reply.send(delivered.clone().map(|()| registration));
        delivered
    }

    async fn mark_disconnected(&mut self, player_id: PlayerId) -> Result<(), QuizError> {
        match self.session.set_presence(player_id, false) {
            Ok(step) => self.apply(step).await,
            Err(err) => {
                tracing::warn!(session_id = %self.session.id(), %player_id, error = %err, "presence update failed");
                Ok(())
            }
        }
    }

    /// Replies to a request and carries out its step. Ordinary rejections
    /// go to the caller only; a fatal error also stops the actor.
    async fn settle<T>(
        &mut self,
        result: Result<(T, Step), QuizError>,
        reply: Reply<T>,
    ) -> Result<(), QuizError> {
        match result {
            Ok((value, step)) => {
                let applied = self.apply(step).await;
                let _ = reply.send(applied.clone().map(|()| value));
                applied
            }
            Err(err) if err.is_fatal() => {
                let _ = reply.send(Err(err.clone()));
                Err(err)
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                Ok(())
            }
        }
    }

    async fn apply(&mut self, step: Step) -> Result<(), QuizError> {
        match step.timer {
            TimerDirective::Keep => {}
            TimerDirective::Arm { question, deadline } => self.timer.arm(question, deadline),
            TimerDirective::Cancel => {
                self.timer.cancel();
            }
        }
        self.session.check_invariants()?;
        self.deliver(step.events).await
    }

    /// Dispatches events in order. Players whose queue overflowed are marked
    /// disconnected, and the resulting notices are dispatched in turn.
    async fn deliver(&mut self, events: Vec<(Recipient, ServerEvent)>) -> Result<(), QuizError> {
        let mut pending = events;
        while !pending.is_empty() {
            let reports = self.dispatcher.dispatch_all(std::mem::take(&mut pending)).await;
            let evicted = reports
                .into_iter()
                .flat_map(|report| report.evicted)
                .filter_map(|identity| identity.player_id());
            for player_id in evicted {
                tracing::warn!(session_id = %self.session.id(), %player_id, "slow client evicted");
                match self.session.set_presence(player_id, false) {
                    Ok(step) => pending.extend(step.events),
                    Err(err) => {
                        tracing::warn!(session_id = %self.session.id(), %player_id, error = %err, "presence update failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn abort(&mut self, err: QuizError) {
        let session_id = self.session.id();
        tracing::error!(%session_id, error = %err, "session aborted");
        let _ = self
            .dispatcher
            .dispatch(
                Recipient::All,
                ServerEvent::SessionAborted {
                    reason: err.to_string(),
                },
            )
            .await;
        self.dispatcher.registry().disconnect_all().await;
    }
}
