//! `QuizServer` builder and server loop.
//!
//! This is the entry point for running a quiz server. It ties together all
//! the layers: transport → protocol → session actors → registry.

use std::sync::Arc;
use std::time::Duration;

use quizcast_protocol::{Codec, JsonCodec, SessionId};
use quizcast_registry::HostAuthenticator;
use quizcast_session::{Question, QuizError, SessionConfig, SessionHandle, SessionManager, StatusBoard};
use quizcast_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::handler::handle_connection;
use crate::{QuizcastError, ServerConfig};

/// How often stopped sessions are swept from the manager.
const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a quiz server.
///
/// # Example
///
/// ```rust,ignore
/// use quizcast::prelude::*;
///
/// let server = QuizServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct QuizServerBuilder {
    config: ServerConfig,
}

impl QuizServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the template for sessions the server creates.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Binds the listener. Uses `JsonCodec` over `WebSocketTransport`.
    pub async fn build(self) -> Result<QuizServer<JsonCodec>, QuizcastError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let status = StatusBoard::new();

        let sessions = SessionManager::new(self.config.session.clone()).with_reporter(Arc::new(status.clone()));
        let state = Arc::new(ServerState {
            sessions: Mutex::new(sessions),
            codec: JsonCodec,
            config: self.config,
        });

        Ok(QuizServer {
            transport,
            state,
            status,
        })
    }
}

impl Default for QuizServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound quiz server.
///
/// Create sessions with [`create_session()`](Self::create_session), then
/// call [`run()`](Self::run) to start accepting connections.
pub struct QuizServer<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
    status: StatusBoard,
}

impl QuizServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> QuizServerBuilder {
        QuizServerBuilder::new()
    }
}

impl<C: Codec> QuizServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Latest status of every running session.
    pub fn status_board(&self) -> &StatusBoard {
        &self.status
    }

    /// Opens a new session in the lobby, using the server's session config.
    pub async fn create_session(
        &self,
        questions: Vec<Question>,
        host: Arc<dyn HostAuthenticator>,
    ) -> SessionHandle {
        let handle = self.state.sessions.lock().await.create_session(questions, host);
        tracing::info!(session_id = %handle.session_id(), "session opened");
        handle
    }

    /// Looks up a running session.
    pub async fn session(&self, session_id: SessionId) -> Result<SessionHandle, QuizError> {
        self.state.sessions.lock().await.get(session_id)
    }

    /// Runs the server accept loop.
    ///
    /// Spawns a handler task for each accepted connection, plus one task
    /// that periodically drops sessions whose actor has stopped. Runs until
    /// the process is terminated.
    pub async fn run(mut self) -> Result<(), QuizcastError> {
        tracing::info!(addr = %self.state.config.bind_addr, "quizcast server running");

        tokio::spawn(prune_loop(Arc::clone(&self.state)));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn prune_loop<C: Codec>(state: Arc<ServerState<C>>) {
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        prune.tick().await;
        let pruned = state.sessions.lock().await.prune();
        if pruned > 0 {
            tracing::info!(pruned, "stopped sessions removed");
        }
    }
}
