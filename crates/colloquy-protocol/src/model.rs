//! Session data model shared by every layer.
//!
//! These types appear on the wire, in the durable store, and inside the
//! room state machine, so their serde shapes are part of the protocol.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The human-readable code that identifies a room, e.g. `AB12-CD34`.
///
/// Serialized as a plain JSON string. An empty pin on `create_session`
/// asks the server to generate one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionPin(String);

impl SessionPin {
    /// Wraps a pin string. Surrounding whitespace is trimmed.
    pub fn new(pin: impl Into<String>) -> Self {
        let pin: String = pin.into();
        Self(pin.trim().to_owned())
    }

    /// Returns the pin as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if no pin was supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant's identity as recognized by the external auth layer.
///
/// Serialized as a plain number: `ParticipantId(2)` is `2` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// What a participant is allowed to do in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The room's creator. Exactly one per room.
    Host,
    /// A member who may chat.
    Participant,
    /// A read-only observer that receives the replayed log on join.
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Participant => "participant",
            Self::Viewer => "viewer",
        })
    }
}

/// The live state of a participant's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// The host dropped its socket after the session began; the room waits
    /// for it to come back from the client-side navigation.
    Transitioning,
}

/// The lifecycle state of a room.
///
/// ```text
/// Waiting → Starting → Active ⇄ Paused
///    └─────────┴─────────┴────────┴──→ Ended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Starting,
    Active,
    Paused,
    Ended,
}

impl SessionStatus {
    /// The lowercase name used on the wire and in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }

    /// Returns `true` once the host has begun the session and it has not ended.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "starting" => Ok(Self::Starting),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown session status {other:?}")),
        }
    }
}

/// The kind of a persisted log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A turn produced for one of the configured speakers.
    Ai,
    /// Host guidance injected at a checkpoint.
    Intervention,
    /// Side-channel chat.
    Chat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Intervention => "intervention",
            Self::Chat => "chat",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Self::Ai),
            "intervention" => Ok(Self::Intervention),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown message kind {other:?}")),
        }
    }
}

/// Host-only session controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Resume,
    End,
}

/// Who produces speaker turns for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnAuthority {
    /// The host's connection computes turns and submits `turn_update`.
    #[default]
    Host,
    /// The room's own engine task calls the generation capability.
    Server,
}

// ---------------------------------------------------------------------------
// Room setup
// ---------------------------------------------------------------------------

/// One configured automated speaker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeakerConfig {
    /// Display name, also the value of `sender` / `nextTurn` on the wire.
    pub name: String,
    /// Model provider key understood by the generation capability.
    pub provider: String,
    pub model_id: String,
    /// Per-speaker system instructions, appended to the room instructions.
    pub instructions: String,
}

/// Setup payload fixed at creation and broadcast in `session_started`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupData {
    pub speakers: Vec<SpeakerConfig>,
    /// Instructions shared by every speaker.
    pub instructions: String,
    /// Opening content that seeds the first turn.
    pub opening: Option<String>,
}

impl SetupData {
    /// Returns the configured speaker names in turn order.
    pub fn speaker_names(&self) -> Vec<String> {
        self.speakers.iter().map(|s| s.name.clone()).collect()
    }

    /// Looks up a speaker by name.
    pub fn speaker(&self, name: &str) -> Option<&SpeakerConfig> {
        self.speakers.iter().find(|s| s.name == name)
    }
}

/// Per-room configuration supplied in `create_session.settings`.
///
/// Every field is optional on the wire. Different room "modes" are just
/// different values here; nothing is inferred from a mode name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    /// Exchanges between checkpoints. Must be at least 1.
    pub checkpoint_interval: u32,
    /// Cap on host plus participants. Viewers are not counted.
    pub max_participants: usize,
    /// Cap on viewers (0 = unlimited).
    pub max_viewers: usize,
    pub turn_authority: TurnAuthority,
    /// Whether side-channel chat is written to the durable log.
    pub persist_chat: bool,
    pub setup: SetupData,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            max_participants: 5,
            max_viewers: 0,
            turn_authority: TurnAuthority::Host,
            persist_chat: true,
            setup: SetupData::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The `message` body of a turn: who spoke and what they said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub sender: String,
    pub content: String,
    /// Set when generation failed and `content` describes the failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

/// Turn state at the moment a log entry was written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    pub exchange_count: u64,
    pub next_turn: Option<String>,
    pub waiting_for_intervention: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_speaker: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

/// A durable log entry, as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub session_pin: SessionPin,
    /// Monotonic per pin, starting at 1.
    pub sequence: u64,
    pub kind: MessageKind,
    pub sender: String,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

/// A roster line sent to a participant when it joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub role: Role,
    pub connection_status: ConnectionStatus,
}
