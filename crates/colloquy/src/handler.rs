//! Per-connection handler: envelope decoding and routing.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that drains the connection's outbound queue:
//!
//! ```text
//!  socket ──recv──→ reader (this task) ──RoomHandle──→ room actor
//!     ↑                   │                               │
//!     └──send── writer ←──┴──── outbound queue ←──────────┘
//! ```
//!
//! Everything a client receives, direct replies included, goes through
//! the one queue, so the client sees events in the order they were queued.
//! A socket is attached to at most one participant of one room at a time.
//!
//! The WebSocket handshake also runs here, bounded by the handshake
//! timeout, so a peer that never upgrades only ties up its own task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colloquy_presence::{Link, Outbound, OutboundReceiver, OutboundSender, outbound_channel};
use colloquy_protocol::{
    Codec, Envelope, JsonCodec, ParticipantId, ProtocolError, Role, ServerEvent, SessionPin,
};
use colloquy_room::{RoomError, RoomHandle};
use colloquy_transport::{Connection, ConnectionId, Incoming, IncomingWebSocket, WebSocketConnection};

use crate::ColloquyError;
use crate::server::ServerState;

/// How long a finished reader waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The room identity this socket acts as.
struct Attachment {
    room: RoomHandle,
    id: ParticipantId,
}

/// Reader-side state of one connection.
struct ConnectionSession {
    conn_id: ConnectionId,
    state: Arc<ServerState>,
    outbound: OutboundSender,
    attached: Option<Attachment>,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    incoming: IncomingWebSocket,
    state: Arc<ServerState>,
) -> Result<(), ColloquyError> {
    let peer = incoming.peer_addr();
    let conn = match tokio::time::timeout(state.handshake_timeout, incoming.upgrade()).await {
        Ok(upgraded) => Arc::new(upgraded?),
        Err(_) => {
            tracing::debug!(%peer, "handshake timed out, dropping socket");
            return Ok(());
        }
    };
    let conn_id = conn.id();
    tracing::debug!(%conn_id, %peer, "handling new connection");

    let (outbound, queue) = outbound_channel(state.outbound_capacity);
    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), queue, state.codec));

    let mut session = ConnectionSession {
        conn_id,
        state,
        outbound,
        attached: None,
    };
    let result = session.read_loop(&conn).await;
    session.detach().await;
    drop(session);

    // The writer ends once the room has dropped its copy of our queue.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        tracing::debug!(%conn_id, "writer did not drain in time");
        writer.abort();
    }
    result
}

/// Drains the outbound queue onto the socket.
///
/// A pending slot (viewer history) is awaited in place, so nothing queued
/// after it can overtake it. A close item, queued or signalled, is written
/// and then the socket is closed.
async fn write_loop(conn: Arc<WebSocketConnection>, mut queue: OutboundReceiver, codec: JsonCodec) {
    let conn_id = conn.id();
    while let Some(item) = queue.recv().await {
        let (event, closing) = match item {
            Outbound::Event(event) => (event, false),
            Outbound::Close(event) => (event, true),
            Outbound::Pending(slot) => match slot.await {
                Ok(event) => (Arc::new(event), false),
                Err(_) => continue,
            },
        };

        if let Err(e) = send_event(&conn, &codec, &event).await {
            tracing::debug!(%conn_id, error = %e, "send failed, writer stopping");
            break;
        }
        if closing {
            tracing::debug!(%conn_id, "closing connection");
            let _ = conn.close().await;
            break;
        }
    }
}

async fn send_event(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    event: &ServerEvent,
) -> Result<(), ColloquyError> {
    let bytes = codec.encode(event)?;
    conn.send(&bytes).await?;
    Ok(())
}

impl ConnectionSession {
    async fn read_loop(&mut self, conn: &WebSocketConnection) -> Result<(), ColloquyError> {
        let conn_id = self.conn_id;
        loop {
            let received = tokio::select! {
                received = tokio::time::timeout(self.state.idle_timeout, conn.recv()) => received,
                () = self.outbound.shutdown_requested() => {
                    tracing::debug!(%conn_id, "connection shut down by its room");
                    return Ok(());
                }
            };
            let data = match received {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => {
                    tracing::debug!(%conn_id, "connection closed cleanly");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::debug!(%conn_id, error = %e, "recv error");
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::info!(%conn_id, "connection idle, closing");
                    return Ok(());
                }
            };

            let envelope = match self.state.codec.decode_envelope(&data) {
                Ok(envelope) => envelope,
                Err(ProtocolError::UnknownType(kind)) => {
                    tracing::warn!(%conn_id, %kind, "unknown envelope type dropped");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                    continue;
                }
            };

            let kind = envelope.kind();
            tracing::debug!(%conn_id, kind, pin = ?envelope.pin(), "envelope received");
            if let Err(e) = self.dispatch(envelope).await {
                tracing::debug!(%conn_id, kind, error = %e, "request rejected");
                self.reply(ServerEvent::error(e.code(), e.to_string())).await;
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), RoomError> {
        match envelope {
            Envelope::CreateSession(m) => {
                let room = self
                    .state
                    .registry
                    .create(m.pin, m.host_id, m.settings)
                    .await?;
                self.reply(ServerEvent::SessionCreated {
                    pin: room.pin().clone(),
                    host_id: m.host_id,
                })
                .await;
                self.attach(room, m.host_id, m.host_name, Role::Host).await
            }
            Envelope::JoinSession(m) => {
                let room = self.lookup(&m.pin).await?;
                let role = m.role.unwrap_or(Role::Participant);
                self.attach(room, m.participant_id, m.participant_name, role)
                    .await
            }
            Envelope::RejoinSession(m) => {
                let room = self.lookup(&m.pin).await?;
                self.attach(room, m.participant_id, m.participant_name, Role::Participant)
                    .await
            }
            Envelope::JoinViewer(m) => {
                let room = self.lookup(&m.pin).await?;
                self.attach(room, m.participant_id, m.participant_name, Role::Viewer)
                    .await
            }
            Envelope::BeginSession(m) => {
                let (room, id) = self.acting(&m.pin).await?;
                room.begin(id).await
            }
            Envelope::TurnUpdate(m) => {
                let (room, id) = self.acting(&m.pin).await?;
                room.turn_update(id, m.message).await
            }
            Envelope::Intervention(m) => {
                let (room, id) = self.acting(&m.pin).await?;
                room.intervene(id, m.content, m.author_name, m.target_speaker)
                    .await
            }
            Envelope::Control(m) => {
                let (room, id) = self.acting(&m.pin).await?;
                room.control(id, m.action).await
            }
            Envelope::ChatMessage(m) => {
                let (room, id) = self.acting(&m.pin).await?;
                room.chat(id, m.content, m.author_name).await
            }
            Envelope::Heartbeat(m) => {
                if let Some(attached) = &self.attached {
                    attached.room.touch(attached.id).await;
                }
                self.reply(ServerEvent::HeartbeatAck {
                    client_time: m.client_time,
                    server_time: Utc::now().timestamp_millis(),
                })
                .await;
                Ok(())
            }
        }
    }

    async fn lookup(&self, pin: &SessionPin) -> Result<RoomHandle, RoomError> {
        self.state
            .registry
            .get(pin)
            .await
            .ok_or_else(|| RoomError::NotFound(pin.clone()))
    }

    /// The room and participant this socket acts as for `pin`.
    async fn acting(&self, pin: &SessionPin) -> Result<(RoomHandle, ParticipantId), RoomError> {
        match &self.attached {
            Some(attached) if attached.room.pin() == pin => {
                Ok((attached.room.clone(), attached.id))
            }
            _ => {
                // Tell an unknown pin apart from a room this socket never joined.
                self.lookup(pin).await?;
                Err(RoomError::NotInRoom)
            }
        }
    }

    /// Connects this socket to `room` as `id`, leaving any previous room.
    async fn attach(
        &mut self,
        room: RoomHandle,
        id: ParticipantId,
        name: String,
        role: Role,
    ) -> Result<(), RoomError> {
        let same = self
            .attached
            .as_ref()
            .is_some_and(|a| a.room.pin() == room.pin() && a.id == id);
        if !same {
            self.detach().await;
        }

        let link = Link::new(self.conn_id, self.outbound.clone());
        let outcome = room.connect(id, name, role, link).await?;
        tracing::info!(
            conn_id = %self.conn_id,
            pin = %room.pin(),
            participant = %id,
            role = %outcome.role,
            rejoined = outcome.rejoined,
            "connection attached"
        );
        self.attached = Some(Attachment { room, id });
        Ok(())
    }

    async fn detach(&mut self) {
        if let Some(attached) = self.attached.take() {
            attached.room.disconnect(attached.id, self.conn_id).await;
        }
    }

    /// Queues a direct reply behind everything already queued.
    async fn reply(&self, event: ServerEvent) {
        if self
            .outbound
            .send(Outbound::Event(Arc::new(event)))
            .await
            .is_err()
        {
            tracing::debug!(conn_id = %self.conn_id, "writer gone, reply dropped");
        }
    }
}
