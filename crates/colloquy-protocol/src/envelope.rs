//! Inbound envelopes: everything a client can send to the server.
//!
//! [`Envelope`] is a closed tagged union keyed by the JSON `type` field, so
//! routing is an exhaustive `match` rather than a string lookup. Each variant
//! wraps a struct whose fields are camelCase on the wire:
//!
//! ```json
//! {"type": "join_session", "pin": "AB12-CD34", "participantId": 2, "participantName": "Ada"}
//! ```

use serde::{Deserialize, Serialize};

use crate::model::{ControlAction, ParticipantId, Role, RoomSettings, SessionPin, TurnMessage};

/// Every message a client can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    CreateSession(CreateSession),
    JoinSession(JoinSession),
    RejoinSession(RejoinSession),
    BeginSession(BeginSession),
    TurnUpdate(TurnUpdate),
    Intervention(Intervention),
    Control(Control),
    ChatMessage(ChatMessage),
    JoinViewer(JoinViewer),
    Heartbeat(Heartbeat),
}

impl Envelope {
    /// Every `type` tag this enum accepts.
    pub const KINDS: &'static [&'static str] = &[
        "create_session",
        "join_session",
        "rejoin_session",
        "begin_session",
        "turn_update",
        "intervention",
        "control",
        "chat_message",
        "join_viewer",
        "heartbeat",
    ];

    /// The wire `type` tag of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateSession(_) => "create_session",
            Self::JoinSession(_) => "join_session",
            Self::RejoinSession(_) => "rejoin_session",
            Self::BeginSession(_) => "begin_session",
            Self::TurnUpdate(_) => "turn_update",
            Self::Intervention(_) => "intervention",
            Self::Control(_) => "control",
            Self::ChatMessage(_) => "chat_message",
            Self::JoinViewer(_) => "join_viewer",
            Self::Heartbeat(_) => "heartbeat",
        }
    }

    /// The room this envelope targets, if it carries one.
    pub fn pin(&self) -> Option<&SessionPin> {
        match self {
            Self::CreateSession(m) => Some(&m.pin),
            Self::JoinSession(m) => Some(&m.pin),
            Self::RejoinSession(m) => Some(&m.pin),
            Self::BeginSession(m) => Some(&m.pin),
            Self::TurnUpdate(m) => Some(&m.pin),
            Self::Intervention(m) => Some(&m.pin),
            Self::Control(m) => Some(&m.pin),
            Self::ChatMessage(m) => Some(&m.pin),
            Self::JoinViewer(m) => Some(&m.pin),
            Self::Heartbeat(_) => None,
        }
    }
}

/// Opens a new room. An empty `pin` asks the server to generate one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSession {
    #[serde(default)]
    pub pin: SessionPin,
    pub host_id: ParticipantId,
    pub host_name: String,
    #[serde(default)]
    pub settings: RoomSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSession {
    pub pin: SessionPin,
    pub participant_id: ParticipantId,
    pub participant_name: String,
    /// Requested role; `host` is never granted from this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinSession {
    pub pin: SessionPin,
    pub participant_id: ParticipantId,
    pub participant_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginSession {
    pub pin: SessionPin,
}

/// A turn produced by the host-side process.
///
/// Only `message` is binding. The counters are what the client believes the
/// state to be; the room recomputes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnUpdate {
    pub pin: SessionPin,
    pub message: TurnMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_turn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for_intervention: Option<bool>,
}

/// Host guidance submitted at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub pin: SessionPin,
    pub content: String,
    pub author_name: String,
    pub target_speaker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    pub pin: SessionPin,
    pub action: ControlAction,
}

/// Side-channel chat. The author fields are filled from the sender's
/// identity when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub pin: SessionPin,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinViewer {
    pub pin: SessionPin,
    pub participant_id: ParticipantId,
    pub participant_name: String,
}

/// Keep-alive. Echoed back in `heartbeat_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(default)]
    pub client_time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TurnAuthority;

    #[test]
    fn test_envelope_create_session_minimal_fields() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"create_session","hostId":1,"hostName":"Grace"}"#,
        )
        .unwrap();
        let Envelope::CreateSession(create) = env else {
            panic!("expected create_session");
        };
        assert!(create.pin.is_empty());
        assert_eq!(create.host_id, ParticipantId(1));
        assert_eq!(create.settings.checkpoint_interval, 10);
    }

    #[test]
    fn test_envelope_create_session_with_settings() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"create_session","pin":"AB12-CD34","hostId":1,"hostName":"Grace",
                "settings":{"checkpointInterval":20,"turnAuthority":"server"}}"#,
        )
        .unwrap();
        let Envelope::CreateSession(create) = env else {
            panic!("expected create_session");
        };
        assert_eq!(create.pin.as_str(), "AB12-CD34");
        assert_eq!(create.settings.checkpoint_interval, 20);
        assert_eq!(create.settings.turn_authority, TurnAuthority::Server);
    }

    #[test]
    fn test_envelope_turn_update_advisory_fields_optional() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"turn_update","pin":"AB12-CD34",
                "message":{"sender":"model-a","content":"Opening statement"}}"#,
        )
        .unwrap();
        let Envelope::TurnUpdate(update) = env else {
            panic!("expected turn_update");
        };
        assert_eq!(update.message.sender, "model-a");
        assert!(update.exchange_count.is_none());
        assert!(!update.message.error);
    }

    #[test]
    fn test_envelope_heartbeat_has_no_pin() {
        let env: Envelope = serde_json::from_str(r#"{"type":"heartbeat","clientTime":5}"#).unwrap();
        assert_eq!(env.kind(), "heartbeat");
        assert!(env.pin().is_none());
    }

    #[test]
    fn test_envelope_kind_matches_serialized_tag() {
        let env = Envelope::Control(Control {
            pin: SessionPin::new("AB12-CD34"),
            action: ControlAction::Pause,
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], env.kind());
        assert_eq!(value["action"], "pause");
        assert!(Envelope::KINDS.contains(&env.kind()));
    }

    #[test]
    fn test_envelope_join_session_role_is_optional() {
        let env: Envelope = serde_json::from_str(
            r#"{"type":"join_session","pin":"P","participantId":2,"participantName":"Ada","role":"viewer"}"#,
        )
        .unwrap();
        let Envelope::JoinSession(join) = env else {
            panic!("expected join_session");
        };
        assert_eq!(join.role, Some(Role::Viewer));
    }
}
