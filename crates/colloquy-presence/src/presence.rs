//! The participant table of one room.
//!
//! `Presence` is plain data owned by the room task, so it needs no locking.
//! It answers three questions: who belongs to the room, which of them have
//! a live socket right now, and what role each one holds.
//!
//! ```text
//!   connect() ──→ Connected ──(disconnect)──→ Disconnected
//!                     ↑                            │
//!                     └──────(connect again)───────┘
//!                              (a rejoin)
//! ```
//!
//! A participant record outlives its socket. Closing the socket only drops
//! the [`Link`]; the record, its role and its place in the room stay.

use std::collections::BTreeMap;
use std::time::Instant;

use colloquy_protocol::{ConnectionStatus, ParticipantId, ParticipantSummary, Role};
use colloquy_transport::ConnectionId;

use crate::{Link, PresenceError};

/// Capacity limits for one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceLimits {
    /// Cap on host plus participants.
    pub max_participants: usize,
    /// Cap on viewers. 0 means unlimited.
    pub max_viewers: usize,
}

impl Default for PresenceLimits {
    fn default() -> Self {
        Self {
            max_participants: 5,
            max_viewers: 0,
        }
    }
}

/// One member of a room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub status: ConnectionStatus,
    /// The live socket, if any. Owned by the room for the link's lifetime.
    pub link: Option<Link>,
    pub joined_at: Instant,
    pub last_activity: Instant,
}

impl Participant {
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            participant_id: self.id,
            participant_name: self.display_name.clone(),
            role: self.role,
            connection_status: self.status,
        }
    }
}

/// The outcome of a successful [`Presence::connect`].
#[derive(Debug)]
pub struct Connected {
    pub role: Role,
    /// `true` if the id was already known to the room.
    pub rejoined: bool,
    /// The link this connect replaced. The caller closes it.
    pub superseded: Option<Link>,
}

/// The outcome of a [`Presence::disconnect`] that detached a live link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
}

/// All participants of one room, keyed by id.
///
/// `BTreeMap` keeps iteration in id order, so fanout order and roster
/// listings are stable.
#[derive(Debug)]
pub struct Presence {
    participants: BTreeMap<ParticipantId, Participant>,
    host_id: ParticipantId,
    limits: PresenceLimits,
}

impl Presence {
    pub fn new(host_id: ParticipantId, limits: PresenceLimits) -> Self {
        Self {
            participants: BTreeMap::new(),
            host_id,
            limits,
        }
    }

    pub fn host_id(&self) -> ParticipantId {
        self.host_id
    }

    /// Attaches `link` to participant `id`.
    ///
    /// A known id is a rejoin: its link is replaced and its role kept. The
    /// most recent connect always wins, so any previous link comes back in
    /// [`Connected::superseded`] for the caller to close.
    ///
    /// An unknown id is inserted. It becomes the host iff it equals the
    /// room's host id; otherwise it gets `requested`, with `Host` downgraded
    /// to `Participant`.
    ///
    /// # Errors
    /// [`PresenceError::RoomFull`] or [`PresenceError::ViewersFull`] when a
    /// new member would exceed the limits. The host's slot is held open
    /// until it connects, so rejoins and the host are never refused.
    pub fn connect(
        &mut self,
        id: ParticipantId,
        display_name: &str,
        requested: Role,
        link: Link,
    ) -> Result<Connected, PresenceError> {
        let now = Instant::now();

        if let Some(existing) = self.participants.get_mut(&id) {
            let new_conn = link.conn_id();
            let superseded = existing
                .link
                .replace(link)
                .filter(|old| old.conn_id() != new_conn);
            existing.status = ConnectionStatus::Connected;
            existing.last_activity = now;
            if !display_name.is_empty() {
                existing.display_name = display_name.to_owned();
            }
            tracing::info!(
                participant = %id,
                role = %existing.role,
                superseded = superseded.is_some(),
                "participant rejoined"
            );
            return Ok(Connected {
                role: existing.role,
                rejoined: true,
                superseded,
            });
        }

        let role = if id == self.host_id {
            Role::Host
        } else if requested == Role::Viewer {
            Role::Viewer
        } else {
            Role::Participant
        };

        match role {
            Role::Host => {}
            Role::Participant => {
                let host_slot = usize::from(!self.participants.contains_key(&self.host_id));
                if self.member_count() + host_slot >= self.limits.max_participants {
                    return Err(PresenceError::RoomFull {
                        max: self.limits.max_participants,
                    });
                }
            }
            Role::Viewer => {
                let max = self.limits.max_viewers;
                if max > 0 && self.viewer_count() >= max {
                    return Err(PresenceError::ViewersFull { max });
                }
            }
        }

        self.participants.insert(
            id,
            Participant {
                id,
                display_name: display_name.to_owned(),
                role,
                status: ConnectionStatus::Connected,
                link: Some(link),
                joined_at: now,
                last_activity: now,
            },
        );
        tracing::info!(participant = %id, %role, "participant joined");

        Ok(Connected {
            role,
            rejoined: false,
            superseded: None,
        })
    }

    /// Detaches the link of `id` if it is still `conn_id`.
    ///
    /// A stale `conn_id` (a socket that was already superseded) is ignored
    /// and returns `None`, so a late close from an old socket never marks a
    /// reconnected participant as gone.
    pub fn disconnect(&mut self, id: ParticipantId, conn_id: ConnectionId) -> Option<Departure> {
        let participant = self.participants.get_mut(&id)?;
        if participant.link.as_ref().map(Link::conn_id) != Some(conn_id) {
            return None;
        }
        participant.link = None;
        participant.status = ConnectionStatus::Disconnected;
        tracing::info!(participant = %id, role = %participant.role, "participant disconnected");

        Some(Departure {
            id,
            display_name: participant.display_name.clone(),
            role: participant.role,
        })
    }

    /// Overrides the status of a detached participant, e.g. to mark the
    /// host as `Transitioning`.
    pub fn set_status(&mut self, id: ParticipantId, status: ConnectionStatus) {
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.status = status;
        }
    }

    /// Records activity from `id`.
    pub fn touch(&mut self, id: ParticipantId) {
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.last_activity = Instant::now();
        }
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn host(&self) -> Option<&Participant> {
        self.participants.get(&self.host_id)
    }

    /// Number of records holding the host role.
    pub fn host_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.role == Role::Host)
            .count()
    }

    /// Host plus participants, connected or not.
    pub fn member_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.role != Role::Viewer)
            .count()
    }

    pub fn viewer_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.role == Role::Viewer)
            .count()
    }

    /// Number of participants with a live socket.
    pub fn connected_count(&self) -> usize {
        self.participants.values().filter(|p| p.is_connected()).count()
    }

    /// Every live link, in participant id order.
    pub fn links(&self) -> impl Iterator<Item = (ParticipantId, &Link)> {
        self.participants
            .values()
            .filter_map(|p| p.link.as_ref().map(|link| (p.id, link)))
    }

    /// Detaches and returns every live link. Used when the room ends.
    pub fn take_links(&mut self) -> Vec<Link> {
        self.participants
            .values_mut()
            .filter_map(|p| {
                p.status = ConnectionStatus::Disconnected;
                p.link.take()
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<ParticipantSummary> {
        self.participants.values().map(Participant::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
