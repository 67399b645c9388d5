//! Error types for the presence layer.

/// Why a connect was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// Host plus participants already fill the room.
    #[error("room is full ({max} participants)")]
    RoomFull { max: usize },

    /// The viewer cap is reached.
    #[error("room is full ({max} viewers)")]
    ViewersFull { max: usize },
}
