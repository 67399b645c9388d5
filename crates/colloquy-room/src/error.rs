//! Error types for the room layer.

use colloquy_protocol::SessionPin;

/// Errors that can occur during room operations.
///
/// Every variant is reported only to the connection that caused it, as an
/// `error` event carrying [`RoomError::code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No active room has this pin.
    #[error("session {0} not found")]
    NotFound(SessionPin),

    /// An active room already uses this pin.
    #[error("session {0} already exists")]
    Conflict(SessionPin),

    /// The room has no free slot for this role.
    #[error("session {0} is full")]
    RoomFull(SessionPin),

    /// The caller lacks the privilege this action needs.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The connection is not attached to a participant of this room.
    #[error("not a member of this session")]
    NotInRoom,

    /// The caller is not the room's turn producer.
    #[error("turns for this session are not produced by this connection")]
    NotYourTurn,

    /// The room's current state does not allow this operation.
    #[error("invalid session state for this operation: {0}")]
    InvalidState(String),

    /// `create_session` settings were rejected.
    #[error("invalid session settings: {0}")]
    InvalidSettings(String),

    /// The room's command channel is closed (the room just ended).
    #[error("session {0} is unavailable")]
    Unavailable(SessionPin),
}

impl RoomError {
    /// HTTP-style status code carried in the error event.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidSettings(_) => 400,
            Self::Unauthorized(_) | Self::NotInRoom => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::RoomFull(_) | Self::NotYourTurn | Self::InvalidState(_) => {
                409
            }
            Self::Unavailable(_) => 503,
        }
    }
}
