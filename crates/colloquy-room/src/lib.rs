//! Room lifecycle management for Colloquy.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! presence table, turn state, timers and journal.
//!
//! # Key types
//!
//! - [`SessionRegistry`]: creates rooms and resolves pins to them
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`TurnController`]: turn order and checkpoint cadence
//! - [`Generator`]: the capability behind server-produced turns
//! - [`RoomTimings`]: grace periods and turn pacing

mod config;
mod engine;
mod error;
mod fanout;
mod journal;
mod registry;
mod room;
mod timer;
mod turn;

pub use config::RoomTimings;
pub use engine::{
    Generation, GenerationError, GenerationRequest, Generator, LogUsageRecorder, TokenUsage,
    UsageRecord, UsageRecorder,
};
pub use error::RoomError;
pub use fanout::{DeliveryReport, deliver};
pub use registry::{SessionRegistry, generate_pin};
pub use room::{JoinOutcome, RoomHandle, RoomInfo};
pub use turn::{Exchange, TurnController};
