//! Presence and reconnection bookkeeping for Colloquy rooms.
//!
//! This crate tracks who is in a room and how to reach them:
//!
//! 1. **Membership**: the [`Presence`] table of [`Participant`] records,
//!    with role assignment and capacity limits.
//! 2. **Reconnection**: a known id presenting a new socket is a rejoin;
//!    the newest socket wins and the superseded one is handed back.
//! 3. **Links**: the bounded [`Outbound`] queue a room uses to reach a
//!    connection task without ever blocking on it.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)      ← owns one Presence per room
//!     ↕
//! Presence Layer (this crate)
//!     ↕
//! Protocol + Transport (below) ← ParticipantId, Role, ConnectionId
//! ```

mod error;
mod link;
mod presence;

pub use error::PresenceError;
pub use link::{
    DeliveryFailure, Link, Outbound, OutboundReceiver, OutboundSender, SharedEvent, outbound_channel,
};
pub use presence::{Connected, Departure, Participant, Presence, PresenceLimits};
