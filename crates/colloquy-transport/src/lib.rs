//! Transport abstraction layer for Colloquy.
//!
//! Provides the [`Transport`] and [`Connection`] traits that hide the socket
//! technology from the gateway. The gateway only ever sees whole frames of
//! bytes; it never touches WebSocket opcodes.
//!
//! Accepting is split in two steps. [`Transport::accept`] only takes the
//! raw socket off the listener; [`Incoming::upgrade`] runs the protocol
//! handshake. The handshake waits on the peer, so callers run it in the
//! connection's own task where a stalled peer holds up nobody else.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{IncomingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;

/// Opaque identifier for a single accepted socket.
///
/// Two sockets presented by the same participant always have different
/// ids, which is how a superseded connection is told apart from the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
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
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// An accepted socket that has not finished its handshake.
    type Incoming: Incoming<Connection = Self::Connection, Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next socket. Never waits on the peer itself.
    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error>;

    /// Returns the address the listener is bound to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// An accepted socket awaiting its handshake.
pub trait Incoming: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    fn peer_addr(&self) -> SocketAddr;

    /// Completes the handshake. Waits as long as the peer takes, so callers
    /// bound it with a timeout.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive whole frames.
///
/// Sending and receiving are independent: a task blocked in [`recv`]
/// never prevents another task from calling [`send`].
///
/// [`recv`]: Connection::recv
/// [`send`]: Connection::send
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_orders_by_accept_sequence() {
        let older = ConnectionId::new(3);
        let newer = ConnectionId::new(9);
        assert!(older < newer);
        assert_ne!(older, newer);
    }
}
