//! Outbound events: everything the server pushes to clients.

use serde::{Deserialize, Serialize};

use crate::model::{
    ParticipantId, ParticipantSummary, Role, SessionPin, SessionStatus, SetupData, StoredMessage,
    TurnMessage,
};

/// A server-to-client message.
///
/// Tagged like [`Envelope`](crate::Envelope): `{"type": "turn_update", ...}`
/// with camelCase fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Reply to the host after `create_session`.
    SessionCreated {
        pin: SessionPin,
        host_id: ParticipantId,
    },

    /// Reply to the joining connection with a snapshot of the room.
    Joined {
        pin: SessionPin,
        participant_id: ParticipantId,
        role: Role,
        rejoined: bool,
        status: SessionStatus,
        exchange_count: u64,
        current_speaker: Option<String>,
        waiting_for_intervention: bool,
        participants: Vec<ParticipantSummary>,
    },

    ParticipantJoined {
        participant_id: ParticipantId,
        participant_name: String,
        role: Role,
    },

    ParticipantLeft {
        participant_id: ParticipantId,
        participant_name: String,
    },

    /// Number of currently connected sockets in the room.
    ParticipantCount {
        count: usize,
    },

    SessionStarting {
        pin: SessionPin,
    },

    /// The grace delay elapsed; automated turns may begin.
    SessionStarted {
        setup: SetupData,
    },

    TurnUpdate {
        message: TurnMessage,
        next_turn: Option<String>,
        exchange_count: u64,
        waiting_for_intervention: bool,
    },

    Intervention {
        content: String,
        author_name: String,
        target_speaker: String,
        next_turn: Option<String>,
    },

    ChatMessage {
        content: String,
        author_id: Option<ParticipantId>,
        author_name: String,
    },

    StatusChanged {
        status: SessionStatus,
    },

    /// The persisted log, oldest first. Sent to a viewer before any live event.
    MessageHistory {
        messages: Vec<StoredMessage>,
    },

    /// Final notice before the server closes the socket.
    SessionEnded {
        reason: String,
    },

    HeartbeatAck {
        client_time: u64,
        /// Server wall clock in milliseconds since the Unix epoch.
        server_time: i64,
    },

    /// A request failed. Sent only to the connection that made it.
    Error {
        code: u16,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
