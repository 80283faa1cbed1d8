//! Transport layer for quizcast.
//!
//! A quiz connection is duplex and both directions are busy at once: the
//! reader waits on player input while a writer drains the session's event
//! queue. So a [`Connection`] is not used directly; it is [`split`] into a
//! [`FrameSink`] and a [`FrameStream`] that can live in different tasks.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//!
//! [`split`]: Connection::split

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketSink, WebSocketStream, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for one accepted connection.
///
/// Unique for the lifetime of the process. The registry stores it next to
/// each channel so a stale connection cannot unregister its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError>;

    /// The address the listener is bound to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// An accepted duplex connection, ready to be split.
pub trait Connection: Send + 'static {
    type Sink: FrameSink;
    type Stream: FrameStream;

    fn id(&self) -> ConnectionId;

    /// Splits into independently owned write and read halves.
    fn split(self) -> (Self::Sink, Self::Stream);
}

/// Write half of a connection.
pub trait FrameSink: Send + 'static {
    /// Sends one frame. UTF-8 payloads go out as text frames.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Sends a close frame.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
pub trait FrameStream: Send + 'static {
    /// Receives the next data frame. `Ok(None)` means the peer closed cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_round_trips_raw_value() {
        assert_eq!(ConnectionId::new(42).into_inner(), 42);
        assert_ne!(ConnectionId::new(1), ConnectionId::new(2));
    }
}
