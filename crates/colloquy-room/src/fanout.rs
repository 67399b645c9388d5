//! Broadcast fanout: one event to every live connection of a room.
//!
//! Delivery never waits. Each recipient has a bounded queue; a full queue
//! drops the event for that recipient only, and a closed one is skipped.
//! One slow client therefore never stalls the room or its other members.

use std::sync::Arc;

use colloquy_presence::{DeliveryFailure, Outbound, Presence};
use colloquy_protocol::{ParticipantId, ServerEvent, SessionPin};

/// What happened during one [`deliver`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Recipients whose queue was full.
    pub dropped: Vec<ParticipantId>,
    /// Recipients whose connection task is already gone.
    pub closed: Vec<ParticipantId>,
}

/// Pushes `event` to every connected participant except `exclude`.
///
/// Best-effort and at most once per recipient per call.
pub fn deliver(
    pin: &SessionPin,
    presence: &Presence,
    event: ServerEvent,
    exclude: Option<ParticipantId>,
) -> DeliveryReport {
    let event = Arc::new(event);
    let mut report = DeliveryReport::default();

    for (id, link) in presence.links() {
        if Some(id) == exclude {
            continue;
        }
        match link.try_deliver(Outbound::Event(Arc::clone(&event))) {
            Ok(()) => report.delivered += 1,
            Err(DeliveryFailure::Full) => {
                tracing::warn!(%pin, participant = %id, conn_id = %link.conn_id(), "outbound queue full, event dropped");
                report.dropped.push(id);
            }
            Err(DeliveryFailure::Closed) => {
                tracing::debug!(%pin, participant = %id, "connection gone, event skipped");
                report.closed.push(id);
            }
        }
    }
    report
}
