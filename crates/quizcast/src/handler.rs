//! Per-connection handler: hello, attach, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive the hello (`HostConnect`, `Join`, or `Resume`) → identity
//!   2. Attach to the session actor → it queues `Welcome` and `Snapshot`
//!   3. Spawn the writer task that drains the connection's event queue
//!   4. Loop: receive frames → forward to the session actor
//!   5. Detach on the way out, whatever the reason
//!
//! Session events and the handler's own replies (`Rejected`, `HeartbeatAck`)
//! reach the socket through the same writer task, so the two never race on
//! the sink.

use std::sync::Arc;

use quizcast_protocol::{
    ClientMessage, Codec, Envelope, Identity, ProtocolError, RejectReason, ServerEvent,
};
use quizcast_registry::{EventReceiver, event_channel};
use quizcast_session::{ControlAction, QuizError, SessionHandle};
use quizcast_transport::{
    Connection, ConnectionId, FrameSink, FrameStream, WebSocketConnection, WebSocketSink,
    WebSocketStream,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::QuizcastError;
use crate::server::ServerState;

/// Capacity of the connection-local reply queue.
const REPLY_QUEUE: usize = 16;

/// A connection that completed its hello.
struct Attached {
    handle: SessionHandle,
    identity: Identity,
    /// Presented on every control event. Host connections only.
    host_token: Option<String>,
}

/// Whether the reader loop keeps going after a message.
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), QuizcastError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (mut sink, mut stream) = conn.split();

    // --- Step 1-2: Hello and attach ---
    let (attached, events) = match perform_hello(&mut sink, &mut stream, &state, conn_id).await {
        Ok(hello) => hello,
        Err(e) => {
            let _ = sink.close().await;
            return Err(e);
        }
    };
    let session_id = attached.handle.session_id();
    let identity = attached.identity;
    tracing::info!(%conn_id, %session_id, ?identity, "connection attached");

    // --- Step 3: Writer ---
    let (replies, reply_rx) = mpsc::channel(REPLY_QUEUE);
    let mut writer = tokio::spawn(write_loop(sink, events, reply_rx, Arc::clone(&state)));
    let mut writer_done = false;

    // --- Step 4: Reader ---
    loop {
        let received = tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                tracing::debug!(%conn_id, "writer finished, closing reader");
                break;
            }
            received = tokio::time::timeout(state.config.idle_timeout, stream.recv()) => received,
        };

        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, "connection idle, dropping");
                break;
            }
        };
        let received_at = Instant::now();

        let msg: ClientMessage = match state.codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode message");
                reject(&replies, &attached.handle, RejectReason::BadRequest, e.to_string()).await;
                continue;
            }
        };

        tracing::trace!(%conn_id, kind = msg.kind(), "message received");
        if let Flow::Close = handle_message(&attached, msg, received_at, &replies).await {
            break;
        }
    }

    // --- Step 5: Detach ---
    if let Err(e) = attached.handle.detach(identity, conn_id).await {
        tracing::debug!(%conn_id, error = %e, "detach skipped");
    }
    // Dropping the reply sender stops the writer, which closes the sink.
    drop(replies);
    if !writer_done {
        let _ = writer.await;
    }
    Ok(())
}

/// Reads the hello, resolves it to an identity, and attaches to the session.
///
/// Failures are answered with `Rejected` directly on the sink, since no
/// writer exists yet.
async fn perform_hello<C: Codec>(
    sink: &mut WebSocketSink,
    stream: &mut WebSocketStream,
    state: &ServerState<C>,
    conn_id: ConnectionId,
) -> Result<(Attached, EventReceiver), QuizcastError> {
    let data = match tokio::time::timeout(state.config.hello_timeout, stream.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage("connection closed before hello".into()).into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("hello timed out".into()).into());
        }
    };

    let result = match state.codec.decode::<ClientMessage>(&data) {
        Ok(msg) => attach(state, msg, conn_id).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(hello) => Ok(hello),
        Err(e) => {
            tracing::debug!(%conn_id, error = %e, "hello rejected");
            let envelope = Envelope {
                seq: 0,
                timestamp: 0,
                payload: ServerEvent::Rejected {
                    reason: e.reason(),
                    message: e.to_string(),
                },
            };
            let frame = state.codec.encode(&envelope)?;
            match tokio::time::timeout(state.config.send_timeout, sink.send(frame)).await {
                Ok(sent) => sent?,
                Err(_) => tracing::debug!(%conn_id, "rejection send timed out"),
            }
            Err(e)
        }
    }
}

/// What the hello asked for.
enum Hello {
    Host { token: String },
    Join { name: String },
    Resume { token: String },
}

async fn attach<C: Codec>(
    state: &ServerState<C>,
    msg: ClientMessage,
    conn_id: ConnectionId,
) -> Result<(Attached, EventReceiver), QuizcastError> {
    let (session_id, hello) = match msg {
        ClientMessage::HostConnect {
            session_id,
            host_token,
        } => (session_id, Hello::Host { token: host_token }),
        ClientMessage::Join { session_id, name } => (session_id, Hello::Join { name }),
        ClientMessage::Resume { session_id, token } => (session_id, Hello::Resume { token }),
        other => {
            return Err(ProtocolError::InvalidMessage(format!(
                "first message must be HostConnect, Join, or Resume, got {}",
                other.kind()
            ))
            .into());
        }
    };

    // Lock only for the lookup; the session does the rest.
    let handle = state.sessions.lock().await.get(session_id)?;

    let (identity, host_token) = match hello {
        Hello::Host { token } => {
            handle.authorize_host(token.as_str()).await?;
            (Identity::Host, Some(token))
        }
        Hello::Join { name } => (Identity::Player(handle.join(name).await?), None),
        Hello::Resume { token } => match handle.registry().resolve_token(&token).await? {
            // Control needs the host token, which Resume does not carry.
            Identity::Host => return Err(QuizError::NotAuthorized.into()),
            player => (player, None),
        },
    };

    let (sender, events) = event_channel(handle.registry().config());
    let registration = handle.attach(identity, conn_id, sender).await?;
    tracing::debug!(
        %conn_id,
        %session_id,
        reconnected = registration.reconnected,
        "identity registered"
    );

    Ok((
        Attached {
            handle,
            identity,
            host_token,
        },
        events,
    ))
}

/// Routes one message from an attached connection.
async fn handle_message(
    attached: &Attached,
    msg: ClientMessage,
    received_at: Instant,
    replies: &mpsc::Sender<Envelope>,
) -> Flow {
    let handle = &attached.handle;
    let kind = msg.kind();
    let result: Result<(), QuizcastError> = match msg {
        ClientMessage::HostConnect { .. } | ClientMessage::Join { .. } | ClientMessage::Resume { .. } => {
            Err(ProtocolError::InvalidMessage(format!("{kind} after hello")).into())
        }

        ClientMessage::StartGame => control(attached, ControlAction::Start).await,
        ClientMessage::CloseQuestion => control(attached, ControlAction::CloseQuestion).await,
        ClientMessage::NextQuestion => control(attached, ControlAction::Next).await,
        ClientMessage::EndGame => control(attached, ControlAction::End).await,

        ClientMessage::SubmitAnswer { question_id, value } => match attached.identity {
            Identity::Player(player_id) => handle
                .submit(player_id, question_id, value, received_at)
                .await
                .map(|_| ())
                .map_err(QuizcastError::from),
            Identity::Host => Err(QuizError::NotAuthorized.into()),
        },

        ClientMessage::Leave => {
            tracing::info!(identity = ?attached.identity, "client left");
            return Flow::Close;
        }

        ClientMessage::Resync => handle.resync(attached.identity).await.map_err(QuizcastError::from),

        ClientMessage::Heartbeat { client_time } => {
            let server_time = millis_since(handle.epoch());
            let ack = Envelope {
                seq: 0,
                timestamp: server_time,
                payload: ServerEvent::HeartbeatAck {
                    client_time,
                    server_time,
                },
            };
            let _ = replies.send(ack).await;
            Ok(())
        }
    };

    match result {
        Ok(()) => Flow::Continue,
        Err(e) => {
            let reason = e.reason();
            reject(replies, handle, reason, e.to_string()).await;
            if matches!(e, QuizcastError::Quiz(QuizError::Unavailable(_))) {
                Flow::Close
            } else {
                Flow::Continue
            }
        }
    }
}

async fn control(attached: &Attached, action: ControlAction) -> Result<(), QuizcastError> {
    match &attached.host_token {
        Some(token) => Ok(attached.handle.control(token.as_str(), action).await?),
        None => Err(QuizError::NotAuthorized.into()),
    }
}

/// Queues a connection-local `Rejected` reply.
async fn reject(
    replies: &mpsc::Sender<Envelope>,
    handle: &SessionHandle,
    reason: RejectReason,
    message: String,
) {
    let envelope = Envelope {
        seq: 0,
        timestamp: millis_since(handle.epoch()),
        payload: ServerEvent::Rejected { reason, message },
    };
    let _ = replies.send(envelope).await;
}

fn millis_since(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

/// Drains session events and local replies onto the socket.
///
/// Ends when either queue closes (the registry dropped this connection, or
/// the reader finished) or a write fails or stalls past the send timeout.
async fn write_loop<C: Codec>(
    mut sink: WebSocketSink,
    mut events: EventReceiver,
    mut replies: mpsc::Receiver<Envelope>,
    state: Arc<ServerState<C>>,
) {
    loop {
        let encoded = tokio::select! {
            event = events.recv() => match event {
                Some(envelope) => state.codec.encode(envelope.as_ref()),
                None => break,
            },
            reply = replies.recv() => match reply {
                Some(envelope) => state.codec.encode(&envelope),
                None => break,
            },
        };

        let frame = match encoded {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode event");
                continue;
            }
        };

        match tokio::time::timeout(state.config.send_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "send failed");
                break;
            }
            Err(_) => {
                tracing::debug!("send timed out");
                break;
            }
        }
    }

    let _ = sink.close().await;
}
