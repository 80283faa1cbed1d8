//! The connection registry: which identity is reachable through which queue.
//!
//! # Lifecycle of an entry
//!
//! ```text
//! register() ──→ [Connected] ──unregister()/evict──→ [Disconnected]
//!                     ↑                                   │
//!                     └────────register() (reconnect)─────┘
//! ```
//!
//! Entries are never removed while the session lives: a player who drops
//! keeps their reconnect token and can come back at any time.
//!
//! # Stale connections
//!
//! Each registration remembers the [`ConnectionId`] that made it. When a
//! player reconnects on a new socket before the old one has noticed it is
//! dead, the old handler's eventual `unregister` carries the old id and is
//! ignored, so it cannot knock the fresh connection offline.
//!
//! # Concurrency note
//!
//! The registry is shared: the session actor delivers through it while
//! handlers resolve reconnect tokens from their own tasks. The table sits
//! behind a Tokio `RwLock`, and delivery only takes the read lock, so
//! token lookups never wait on a broadcast. Nothing awaits a client while
//! holding the lock: queues are fed with `try_send`, and a full queue
//! gets its entry evicted rather than waited on. A slow phone therefore
//! costs the session one failed `try_send`, not a stalled broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use quizcast_protocol::{Envelope, Identity, PlayerId, Recipient};
use quizcast_transport::ConnectionId;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;

use crate::{RegistryConfig, RegistryError, generate_token};

/// An event as queued for one connection. Shared between recipients so a
/// broadcast is built once.
pub type Outbound = Arc<Envelope>;

/// Sending half of a connection's outbound queue.
pub type EventSender = mpsc::Sender<Outbound>;

/// Receiving half, drained by the connection's writer task.
pub type EventReceiver = mpsc::Receiver<Outbound>;

/// Creates a bounded outbound queue sized per the registry config.
pub fn event_channel(config: &RegistryConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.channel_capacity.max(1))
}

/// Reachability of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// Unreachable since the given instant.
    Disconnected { since: Instant },
}

/// Result of a successful [`ConnectionRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    /// Stable for the identity across reconnects.
    pub reconnect_token: String,
    /// `true` if the identity had been registered before.
    pub reconnected: bool,
}

/// What happened to one dispatched event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Queues that accepted the event.
    pub delivered: usize,
    /// Identities whose queue was full or closed; now marked Disconnected.
    pub evicted: Vec<Identity>,
}

struct Entry {
    status: ConnectionStatus,
    sender: Option<EventSender>,
    connection: Option<ConnectionId>,
    reconnect_token: String,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Identity, Entry>,
    tokens: HashMap<String, Identity>,
}

/// Maps identities to outbound queues for one session.
///
/// Cheap to clone; all clones share the same table.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers `sender` as the channel for `identity`, replacing any
    /// previous channel, and marks the identity Connected.
    ///
    /// The first registration of an identity issues its reconnect token.
    pub async fn register(
        &self,
        identity: Identity,
        connection: ConnectionId,
        sender: EventSender,
    ) -> Registration {
        let mut inner = self.inner.write().await;
        let Inner { entries, tokens } = &mut *inner;

        if let Some(entry) = entries.get_mut(&identity) {
            if let Some(previous) = entry.connection.replace(connection) {
                if previous != connection {
                    tracing::debug!(%identity, %previous, %connection, "replacing channel");
                }
            }
            entry.sender = Some(sender);
            entry.status = ConnectionStatus::Connected;
            tracing::info!(%identity, %connection, "identity reconnected");
            return Registration {
                reconnect_token: entry.reconnect_token.clone(),
                reconnected: true,
            };
        }

        let token = generate_token();
        tokens.insert(token.clone(), identity);
        entries.insert(
            identity,
            Entry {
                status: ConnectionStatus::Connected,
                sender: Some(sender),
                connection: Some(connection),
                reconnect_token: token.clone(),
            },
        );
        tracing::info!(%identity, %connection, "identity registered");
        Registration {
            reconnect_token: token,
            reconnected: false,
        }
    }

    /// Marks `identity` Disconnected if `connection` is still the channel
    /// registered for it. The identity keeps its token and history.
    ///
    /// Returns `true` if this call ended the identity's current connection,
    /// `false` if the connection had already been replaced.
    pub async fn unregister(&self, identity: Identity, connection: ConnectionId) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.entries.get_mut(&identity) else {
            return false;
        };
        if entry.connection != Some(connection) {
            tracing::debug!(%identity, %connection, "ignoring unregister from stale connection");
            return false;
        }
        entry.connection = None;
        entry.sender = None;
        if entry.status == ConnectionStatus::Connected {
            entry.status = ConnectionStatus::Disconnected {
                since: Instant::now(),
            };
        }
        tracing::info!(%identity, %connection, "identity disconnected");
        true
    }

    /// Resolves a reconnect token to the identity it was issued to.
    ///
    /// # Errors
    /// [`RegistryError::InvalidToken`] if the token is unknown.
    pub async fn resolve_token(&self, token: &str) -> Result<Identity, RegistryError> {
        self.inner
            .read()
            .await
            .tokens
            .get(token)
            .copied()
            .ok_or(RegistryError::InvalidToken)
    }

    pub async fn status(&self, identity: Identity) -> Option<ConnectionStatus> {
        self.inner.read().await.entries.get(&identity).map(|e| e.status)
    }

    pub async fn is_connected(&self, identity: Identity) -> bool {
        matches!(self.status(identity).await, Some(ConnectionStatus::Connected))
    }

    /// Players currently reachable.
    pub async fn connected_players(&self) -> Vec<PlayerId> {
        let inner = self.inner.read().await;
        let mut players: Vec<PlayerId> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.status == ConnectionStatus::Connected)
            .filter_map(|(identity, _)| identity.player_id())
            .collect();
        players.sort();
        players
    }

    /// Queues `event` for every Connected identity addressed by `recipient`.
    ///
    /// Never waits: a queue that is full or closed gets its identity marked
    /// Disconnected and dropped from this and later deliveries until it
    /// registers again. Other recipients are unaffected.
    pub async fn deliver(&self, recipient: Recipient, event: Outbound) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut failed: Vec<(Identity, Option<ConnectionId>)> = Vec::new();

        {
            let inner = self.inner.read().await;
            for (identity, entry) in &inner.entries {
                if entry.status != ConnectionStatus::Connected || !recipient.includes(*identity) {
                    continue;
                }
                let Some(sender) = &entry.sender else {
                    continue;
                };
                match sender.try_send(Arc::clone(&event)) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(%identity, seq = event.seq, "outbound queue full, evicting");
                        failed.push((*identity, entry.connection));
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(%identity, seq = event.seq, "outbound queue closed");
                        failed.push((*identity, entry.connection));
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut inner = self.inner.write().await;
            for (identity, connection) in failed {
                if let Some(entry) = inner.entries.get_mut(&identity) {
                    // Only evict the channel we failed on; a reconnect may have
                    // slipped in between the two locks.
                    if entry.connection == connection && entry.status == ConnectionStatus::Connected {
                        entry.sender = None;
                        entry.status = ConnectionStatus::Disconnected {
                            since: Instant::now(),
                        };
                        report.evicted.push(identity);
                    }
                }
            }
        }

        report
    }

    /// Drops every outbound queue and marks all identities Disconnected.
    /// Writer tasks see their queue close and end their connections.
    /// Returns how many identities were connected.
    pub async fn disconnect_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let mut closed = 0;
        for entry in inner.entries.values_mut() {
            entry.sender = None;
            entry.connection = None;
            if entry.status == ConnectionStatus::Connected {
                entry.status = ConnectionStatus::Disconnected { since: now };
                closed += 1;
            }
        }
        tracing::debug!(closed, "all connections dropped");
        closed
    }

    /// Number of identities ever registered.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}
