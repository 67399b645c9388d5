//! Unified error type for the Colloquy server.

use colloquy_protocol::ProtocolError;
use colloquy_room::RoomError;
use colloquy_store::StoreError;
use colloquy_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum ColloquyError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unknown envelope).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The session store could not be opened or read.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A room-level error (not found, conflict, unauthorized).
    #[error(transparent)]
    Room(#[from] RoomError),
}
