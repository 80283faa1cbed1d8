//! Connection registry and broadcast dispatch for quizcast.
//!
//! A quiz session talks to one host and many players, each over its own
//! duplex channel. This crate owns the mapping from [`Identity`] to channel:
//!
//! 1. **Registration**: a connection that proved who it is gets an
//!    outbound queue registered under its identity ([`ConnectionRegistry`]).
//!    Registering again (reconnect) replaces the old channel.
//! 2. **Dispatch**: the session actor stamps events with a sequence number
//!    and fans them out without ever waiting on a slow client
//!    ([`Dispatcher`]).
//! 3. **Host authorization and reconnect tokens** ([`HostAuthenticator`],
//!    [`generate_token`]).
//!
//! ```text
//! Session actor ──events──→ Dispatcher ──try_send──→ per-connection queues
//!                                                     ↓
//!                                         writer task → socket
//! ```
//!
//! The registry has its own lock, independent of the session actor, so a
//! flood of connects and disconnects never stalls game processing.
//!
//! [`Identity`]: quizcast_protocol::Identity

mod auth;
mod config;
mod dispatcher;
mod error;
mod registry;
mod token;

pub use auth::{HostAuthenticator, StaticHostToken};
pub use config::RegistryConfig;
pub use dispatcher::Dispatcher;
pub use error::RegistryError;
pub use registry::{
    ConnectionRegistry, ConnectionStatus, DeliveryReport, EventReceiver, EventSender, Outbound,
    Registration, event_channel,
};
pub use token::generate_token;
