//! # Colloquy
//!
//! Real-time session orchestration for moderated multi-speaker
//! conversations.
//!
//! A host opens a room under a short PIN. Participants and read-only
//! viewers join it over WebSocket, speakers take turns, and every few
//! exchanges the room stops at a checkpoint until the host intervenes.
//! Each room is an isolated actor; this crate is the gateway that accepts
//! sockets and routes their envelopes to the right room.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colloquy::prelude::*;
//!
//! # async fn start() -> Result<(), ColloquyError> {
//! let server = ColloquyServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .database(Database::File("colloquy.db".into()))
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{Database, ServerConfig};
pub use error::ColloquyError;
pub use server::{ColloquyServer, ColloquyServerBuilder};

/// Everything needed to embed a server, in one import.
pub mod prelude {
    pub use crate::{ColloquyError, ColloquyServer, ColloquyServerBuilder, Database, ServerConfig};
    pub use colloquy_protocol::{
        ControlAction, Envelope, ParticipantId, Role, RoomSettings, ServerEvent, SessionPin,
        SessionStatus, SetupData, SpeakerConfig, TurnAuthority, TurnMessage,
    };
    pub use colloquy_room::{
        Generation, GenerationError, GenerationRequest, Generator, RoomTimings, SessionRegistry,
        TokenUsage, UsageRecord, UsageRecorder,
    };
    pub use colloquy_store::{SessionLog, SqliteLog};
}
