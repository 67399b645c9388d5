//! Wire protocol for Colloquy.
//!
//! This crate defines the language that session clients and the server speak:
//!
//! - **Identity and model types** ([`SessionPin`], [`ParticipantId`],
//!   [`SessionStatus`], [`StoredMessage`], ...) shared by every layer.
//! - **Envelopes** ([`Envelope`] inbound, [`ServerEvent`] outbound): closed
//!   tagged unions keyed by the JSON `type` field.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Envelope) → Room (state machine)
//! ```

mod codec;
mod envelope;
mod error;
mod event;
mod model;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use envelope::{
    BeginSession, ChatMessage, Control, CreateSession, Envelope, Heartbeat, Intervention,
    JoinSession, JoinViewer, RejoinSession, TurnUpdate,
};
pub use error::ProtocolError;
pub use event::ServerEvent;
pub use model::{
    ConnectionStatus, ControlAction, MessageKind, MessageMetadata, ParticipantId,
    ParticipantSummary, Role, RoomSettings, SessionPin, SessionStatus, SetupData,
    SpeakerConfig, StoredMessage, TurnAuthority, TurnMessage,
};
