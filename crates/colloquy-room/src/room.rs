//! Room actor: an isolated Tokio task that owns one session.
//!
//! Each room runs in its own task and is reached only through its bounded
//! command channel. Every mutation of a room (joins, turns, interventions,
//! controls) is a command processed one at a time by that task, so they
//! can never interleave. Rooms share nothing with each other.
//!
//! ```text
//!  RoomHandle ──(RoomCommand)──→ RoomActor ──(fanout)──→ participant links
//!                                    │
//!                                    └──(write-behind)──→ Journal ──→ SessionLog
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use colloquy_presence::{Link, Outbound, Participant, Presence, PresenceLimits};
use colloquy_protocol::{
    ConnectionStatus, ControlAction, MessageKind, MessageMetadata, ParticipantId, Role,
    RoomSettings, ServerEvent, SessionPin, SessionStatus, TurnAuthority, TurnMessage,
};
use colloquy_store::{NewMessage, SessionLog, SessionRecord};
use colloquy_transport::ConnectionId;
use tokio::sync::{RwLock, mpsc, oneshot};
use uuid::Uuid;

use crate::engine::{GenerationRequest, Generator, Produced, TurnEngine, UsageRecorder};
use crate::fanout;
use crate::journal::Journal;
use crate::timer::RoomTimer;
use crate::turn::TurnController;
use crate::{RoomError, RoomTimings};

/// Source of the per-room sequence that tells two rooms with the same pin
/// apart.
static NEXT_ROOM_SEQ: AtomicU64 = AtomicU64::new(1);

/// Command channel size for room actors.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Pin → handle map shared by the registry and every room it spawned.
pub(crate) type RoomTable = Arc<RwLock<HashMap<SessionPin, RoomHandle>>>;

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    Connect {
        id: ParticipantId,
        name: String,
        role: Role,
        link: Link,
        reply: Reply<JoinOutcome>,
    },
    Disconnect {
        id: ParticipantId,
        conn_id: ConnectionId,
    },
    Begin {
        caller: ParticipantId,
        reply: Reply<()>,
    },
    TurnUpdate {
        caller: ParticipantId,
        message: TurnMessage,
        reply: Reply<()>,
    },
    Intervene {
        caller: ParticipantId,
        content: String,
        author_name: String,
        target_speaker: String,
        reply: Reply<()>,
    },
    Control {
        caller: ParticipantId,
        action: ControlAction,
        reply: Reply<()>,
    },
    Chat {
        caller: ParticipantId,
        content: String,
        author_name: Option<String>,
        reply: Reply<()>,
    },
    Touch {
        caller: ParticipantId,
    },
    Info {
        reply: Reply<RoomInfo>,
    },
    Shutdown {
        reason: String,
    },
}

/// The result of a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub role: Role,
    pub rejoined: bool,
}

/// A snapshot of room state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub pin: SessionPin,
    pub host_id: ParticipantId,
    pub status: SessionStatus,
    pub exchange_count: u64,
    pub current_speaker: String,
    pub waiting_for_intervention: bool,
    pub turn_authority: TurnAuthority,
    /// Every known participant, connected or not, viewers included.
    pub participant_count: usize,
    pub connected_count: usize,
    pub viewer_count: usize,
    pub host_count: usize,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pin: SessionPin,
    seq: u64,
    sender: mpsc::Sender<RoomCommand>,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect { .. } => "Connect",
            Self::Disconnect { .. } => "Disconnect",
            Self::Begin { .. } => "Begin",
            Self::TurnUpdate { .. } => "TurnUpdate",
            Self::Intervene { .. } => "Intervene",
            Self::Control { .. } => "Control",
            Self::Chat { .. } => "Chat",
            Self::Touch { .. } => "Touch",
            Self::Info { .. } => "Info",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl RoomHandle {
    pub fn pin(&self) -> &SessionPin {
        &self.pin
    }

    /// Returns `true` if the actor behind this handle has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.pin.clone())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| self.unavailable())?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Attaches `link` as participant `id`: a join, or a rejoin if the id
    /// is already known. `role` is the requested role; the room decides.
    pub async fn connect(
        &self,
        id: ParticipantId,
        name: impl Into<String>,
        role: Role,
        link: Link,
    ) -> Result<JoinOutcome, RoomError> {
        let name = name.into();
        self.request(|reply| RoomCommand::Connect {
            id,
            name,
            role,
            link,
            reply,
        })
        .await
    }

    /// Reports that `conn_id` closed. Stale connections are ignored.
    pub async fn disconnect(&self, id: ParticipantId, conn_id: ConnectionId) {
        let _ = self
            .sender
            .send(RoomCommand::Disconnect { id, conn_id })
            .await;
    }

    pub async fn begin(&self, caller: ParticipantId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Begin { caller, reply }).await
    }

    /// Submits a turn produced by the host-side process.
    pub async fn turn_update(
        &self,
        caller: ParticipantId,
        message: TurnMessage,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::TurnUpdate {
            caller,
            message,
            reply,
        })
        .await
    }

    pub async fn intervene(
        &self,
        caller: ParticipantId,
        content: impl Into<String>,
        author_name: impl Into<String>,
        target_speaker: impl Into<String>,
    ) -> Result<(), RoomError> {
        let (content, author_name, target_speaker) =
            (content.into(), author_name.into(), target_speaker.into());
        self.request(|reply| RoomCommand::Intervene {
            caller,
            content,
            author_name,
            target_speaker,
            reply,
        })
        .await
    }

    pub async fn control(
        &self,
        caller: ParticipantId,
        action: ControlAction,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Control {
            caller,
            action,
            reply,
        })
        .await
    }

    pub async fn chat(
        &self,
        caller: ParticipantId,
        content: impl Into<String>,
        author_name: Option<String>,
    ) -> Result<(), RoomError> {
        let content = content.into();
        self.request(|reply| RoomCommand::Chat {
            caller,
            content,
            author_name,
            reply,
        })
        .await
    }

    /// Records activity (a heartbeat) from `caller`.
    pub async fn touch(&self, caller: ParticipantId) {
        let _ = self.sender.send(RoomCommand::Touch { caller }).await;
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Ends the room, notifying and disconnecting everyone.
    pub async fn shutdown(&self, reason: impl Into<String>) {
        let _ = self
            .sender
            .send(RoomCommand::Shutdown {
                reason: reason.into(),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Everything a new room needs.
pub(crate) struct RoomParams {
    pub(crate) pin: SessionPin,
    pub(crate) host_id: ParticipantId,
    pub(crate) settings: RoomSettings,
    pub(crate) timings: RoomTimings,
    pub(crate) log: Arc<dyn SessionLog>,
    pub(crate) generator: Option<Arc<dyn Generator>>,
    pub(crate) usage: Arc<dyn UsageRecorder>,
    pub(crate) table: RoomTable,
}

struct RoomActor {
    pin: SessionPin,
    seq: u64,
    host_id: ParticipantId,
    settings: RoomSettings,
    status: SessionStatus,
    /// This room instance in the durable log; a reused pin gets a new one.
    session_id: Uuid,
    created_at: DateTime<Utc>,
    presence: Presence,
    turns: TurnController,
    /// AI turns and interventions so far, fed to the generator.
    transcript: Vec<TurnMessage>,
    journal: Journal,
    engine: Option<TurnEngine>,
    timings: RoomTimings,
    start_timer: RoomTimer,
    empty_timer: RoomTimer,
    receiver: mpsc::Receiver<RoomCommand>,
    produced: mpsc::Receiver<Produced>,
    table: RoomTable,
}

/// Spawns a room actor task and returns a handle to it.
///
/// The session record is written as `waiting` right away, and the empty-room
/// timer starts running until the host connects.
pub(crate) fn spawn_room(params: RoomParams) -> RoomHandle {
    let RoomParams {
        pin,
        host_id,
        settings,
        timings,
        log,
        generator,
        usage,
        table,
    } = params;

    let seq = NEXT_ROOM_SEQ.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let (produced_tx, produced_rx) = mpsc::channel(1);

    let engine = match (settings.turn_authority, generator) {
        (TurnAuthority::Server, Some(generator)) => Some(TurnEngine::new(
            generator,
            usage,
            timings.turn_delay,
            produced_tx,
        )),
        _ => None,
    };

    let record = SessionRecord::new(pin.clone(), host_id, settings.setup.clone());
    let session_id = record.session_id;
    let created_at = record.created_at;
    let journal = Journal::spawn(pin.clone(), session_id, log);
    journal.upsert_session(record);

    let mut empty_timer = RoomTimer::default();
    empty_timer.arm(timings.empty_room_grace);

    let actor = RoomActor {
        pin: pin.clone(),
        seq,
        host_id,
        presence: Presence::new(
            host_id,
            PresenceLimits {
                max_participants: settings.max_participants,
                max_viewers: settings.max_viewers,
            },
        ),
        turns: TurnController::new(settings.setup.speaker_names(), settings.checkpoint_interval),
        settings,
        status: SessionStatus::Waiting,
        session_id,
        created_at,
        transcript: Vec::new(),
        journal,
        engine,
        timings,
        start_timer: RoomTimer::default(),
        empty_timer,
        receiver: rx,
        produced: produced_rx,
        table,
    };
    tokio::spawn(actor.run());

    RoomHandle {
        pin,
        seq,
        sender: tx,
    }
}

impl RoomActor {
    /// Runs the actor loop until the room ends.
    async fn run(mut self) {
        tracing::info!(pin = %self.pin, "room actor started");

        while self.status != SessionStatus::Ended {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => self.end("session closed"),
                },
                Some(produced) = self.produced.recv() => self.on_produced(produced),
                () = self.start_timer.fired() => self.on_start_grace_elapsed(),
                () = self.empty_timer.fired() => self.on_empty_room(),
            }
        }

        self.leave_table().await;
        tracing::info!(pin = %self.pin, "room actor stopped");
    }

    fn handle(&mut self, cmd: RoomCommand) {
        tracing::trace!(pin = %self.pin, ?cmd, "room command");
        match cmd {
            RoomCommand::Connect {
                id,
                name,
                role,
                link,
                reply,
            } => {
                let result = self.handle_connect(id, &name, role, link);
                let _ = reply.send(result);
            }
            RoomCommand::Disconnect { id, conn_id } => self.handle_disconnect(id, conn_id),
            RoomCommand::Begin { caller, reply } => {
                let _ = reply.send(self.handle_begin(caller));
            }
            RoomCommand::TurnUpdate {
                caller,
                message,
                reply,
            } => {
                let _ = reply.send(self.handle_turn_update(caller, message));
            }
            RoomCommand::Intervene {
                caller,
                content,
                author_name,
                target_speaker,
                reply,
            } => {
                let result = self.handle_intervene(caller, content, author_name, target_speaker);
                let _ = reply.send(result);
            }
            RoomCommand::Control {
                caller,
                action,
                reply,
            } => {
                let _ = reply.send(self.handle_control(caller, action));
            }
            RoomCommand::Chat {
                caller,
                content,
                author_name,
                reply,
            } => {
                let _ = reply.send(self.handle_chat(caller, content, author_name));
            }
            RoomCommand::Touch { caller } => self.presence.touch(caller),
            RoomCommand::Info { reply } => {
                let _ = reply.send(Ok(self.info()));
            }
            RoomCommand::Shutdown { reason } => self.end(&reason),
        }
    }

    // -- Presence ---------------------------------------------------------

    fn handle_connect(
        &mut self,
        id: ParticipantId,
        name: &str,
        requested: Role,
        link: Link,
    ) -> Result<JoinOutcome, RoomError> {
        let connected = self
            .presence
            .connect(id, name, requested, link)
            .map_err(|e| {
                tracing::debug!(pin = %self.pin, participant = %id, error = %e, "join refused");
                RoomError::RoomFull(self.pin.clone())
            })?;

        if let Some(old) = connected.superseded {
            tracing::info!(pin = %self.pin, participant = %id, conn_id = %old.conn_id(), "closing superseded connection");
            old.close(Arc::new(ServerEvent::error(
                409,
                "connection replaced by a newer one",
            )));
        }
        self.empty_timer.cancel();

        self.send_to(
            id,
            ServerEvent::Joined {
                pin: self.pin.clone(),
                participant_id: id,
                role: connected.role,
                rejoined: connected.rejoined,
                status: self.status,
                exchange_count: self.turns.exchange_count(),
                current_speaker: Some(self.turns.current_speaker().to_owned()),
                waiting_for_intervention: self.turns.intervention_pending(),
                participants: self.presence.summaries(),
            },
        );
        if connected.role == Role::Viewer {
            self.queue_backlog(id);
        }
        if !connected.rejoined {
            self.broadcast(
                ServerEvent::ParticipantJoined {
                    participant_id: id,
                    participant_name: name.to_owned(),
                    role: connected.role,
                },
                Some(id),
            );
        }
        self.broadcast_count();

        Ok(JoinOutcome {
            role: connected.role,
            rejoined: connected.rejoined,
        })
    }

    /// Queues the persisted log ahead of any later event for `id`.
    ///
    /// The slot is reserved in the viewer's queue now; the journal fills it
    /// once every write issued so far is durable.
    fn queue_backlog(&self, id: ParticipantId) {
        let Some(link) = self.presence.get(id).and_then(|p| p.link.as_ref()) else {
            return;
        };
        let (slot_tx, slot_rx) = oneshot::channel();
        if link.try_deliver(Outbound::Pending(slot_rx)).is_err() {
            tracing::warn!(pin = %self.pin, participant = %id, "could not queue message history");
            return;
        }

        let replay = self.journal.replay();
        let pin = self.pin.clone();
        tokio::spawn(async move {
            match replay.await {
                Ok(Ok(messages)) => {
                    tracing::debug!(%pin, participant = %id, count = messages.len(), "replaying history");
                    let _ = slot_tx.send(ServerEvent::MessageHistory { messages });
                }
                Ok(Err(e)) => {
                    tracing::error!(%pin, error = %e, alarm = true, "history read failed");
                    let _ = slot_tx.send(ServerEvent::error(500, "message history unavailable"));
                }
                Err(_) => {
                    tracing::warn!(%pin, "journal closed before history was read");
                }
            }
        });
    }

    fn handle_disconnect(&mut self, id: ParticipantId, conn_id: ConnectionId) {
        let Some(departure) = self.presence.disconnect(id, conn_id) else {
            return;
        };

        if departure.role == Role::Host {
            match self.status {
                SessionStatus::Waiting => {
                    self.end("host disconnected");
                    return;
                }
                SessionStatus::Starting | SessionStatus::Active | SessionStatus::Paused => {
                    self.presence.set_status(id, ConnectionStatus::Transitioning);
                    tracing::info!(pin = %self.pin, status = %self.status, "host transitioning, room kept alive");
                }
                SessionStatus::Ended => {}
            }
        } else {
            self.broadcast(
                ServerEvent::ParticipantLeft {
                    participant_id: departure.id,
                    participant_name: departure.display_name,
                },
                None,
            );
        }
        self.broadcast_count();

        if self.presence.connected_count() == 0 {
            self.empty_timer.arm(self.timings.empty_room_grace);
        }
    }

    // -- Lifecycle --------------------------------------------------------

    fn handle_begin(&mut self, caller: ParticipantId) -> Result<(), RoomError> {
        self.require_host(caller, "begin the session")?;
        self.require_status(&[SessionStatus::Waiting], "begin")?;

        self.status = SessionStatus::Starting;
        self.journal.upsert_session(SessionRecord {
            status: SessionStatus::Active,
            session_id: self.session_id,
            created_at: self.created_at,
            ..SessionRecord::new(self.pin.clone(), self.host_id, self.settings.setup.clone())
        });
        self.start_timer.arm(self.timings.start_grace);

        tracing::info!(pin = %self.pin, grace = ?self.timings.start_grace, "session starting");
        self.broadcast(
            ServerEvent::SessionStarting {
                pin: self.pin.clone(),
            },
            None,
        );
        Ok(())
    }

    fn on_start_grace_elapsed(&mut self) {
        if self.status != SessionStatus::Starting {
            return;
        }
        self.status = SessionStatus::Active;
        tracing::info!(pin = %self.pin, "session started");
        self.broadcast(
            ServerEvent::SessionStarted {
                setup: self.settings.setup.clone(),
            },
            None,
        );
        self.schedule_turn();
    }

    fn on_empty_room(&mut self) {
        if self.presence.connected_count() == 0 {
            tracing::info!(pin = %self.pin, "no connections left, reaping room");
            self.end("session abandoned");
        }
    }

    fn handle_control(&mut self, caller: ParticipantId, action: ControlAction) -> Result<(), RoomError> {
        self.require_host(caller, "control the session")?;
        match action {
            ControlAction::Pause => {
                self.require_status(&[SessionStatus::Active], "pause")?;
                self.status = SessionStatus::Paused;
                if let Some(engine) = self.engine.as_mut() {
                    engine.cancel();
                }
            }
            ControlAction::Resume => {
                self.require_status(&[SessionStatus::Paused], "resume")?;
                self.status = SessionStatus::Active;
            }
            ControlAction::End => {
                self.end("ended by host");
                return Ok(());
            }
        }

        tracing::info!(pin = %self.pin, status = %self.status, "status changed");
        self.journal.set_status(self.status);
        self.broadcast(ServerEvent::StatusChanged { status: self.status }, None);
        self.schedule_turn();
        Ok(())
    }

    /// Ends the room: cancels its timers and producer, persists the end,
    /// and closes every socket with a final notice.
    fn end(&mut self, reason: &str) {
        if self.status == SessionStatus::Ended {
            return;
        }
        self.status = SessionStatus::Ended;
        self.start_timer.cancel();
        self.empty_timer.cancel();
        if let Some(engine) = self.engine.as_mut() {
            engine.cancel();
        }
        self.journal.end_session(Utc::now());

        let notice = Arc::new(ServerEvent::SessionEnded {
            reason: reason.to_owned(),
        });
        let links = self.presence.take_links();
        let closed = links.len();
        for link in links {
            link.close(Arc::clone(&notice));
        }
        tracing::info!(pin = %self.pin, reason, closed, "session ended");
    }

    async fn leave_table(&self) {
        let mut table = self.table.write().await;
        if table.get(&self.pin).is_some_and(|h| h.seq == self.seq) {
            table.remove(&self.pin);
        }
    }

    // -- Turns ------------------------------------------------------------

    fn handle_turn_update(&mut self, caller: ParticipantId, message: TurnMessage) -> Result<(), RoomError> {
        self.member(caller)?;
        if self.settings.turn_authority != TurnAuthority::Host || caller != self.host_id {
            return Err(RoomError::NotYourTurn);
        }
        self.require_status(&[SessionStatus::Active], "record an exchange")?;
        self.apply_exchange(message)
    }

    fn on_produced(&mut self, produced: Produced) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if !engine.finish(produced.epoch) {
            tracing::debug!(pin = %self.pin, epoch = produced.epoch, "stale turn discarded");
            return;
        }
        if self.status != SessionStatus::Active {
            tracing::debug!(pin = %self.pin, status = %self.status, "turn arrived while not active, discarded");
            return;
        }

        let message = match produced.result {
            Ok(generation) => TurnMessage {
                sender: produced.speaker,
                content: generation.text,
                error: false,
            },
            Err(e) => {
                tracing::warn!(pin = %self.pin, speaker = %produced.speaker, error = %e, "generation failed");
                TurnMessage {
                    sender: produced.speaker,
                    content: e.to_string(),
                    error: true,
                }
            }
        };
        if let Err(e) = self.apply_exchange(message) {
            tracing::warn!(pin = %self.pin, error = %e, "produced turn rejected");
        }
    }

    /// Records one exchange, persists it, broadcasts it, and lines up the
    /// next turn.
    fn apply_exchange(&mut self, message: TurnMessage) -> Result<(), RoomError> {
        let exchange = self.turns.record_exchange(&message.sender)?;

        self.journal.append(NewMessage::new(
            self.pin.clone(),
            self.session_id,
            MessageKind::Ai,
            message.sender.clone(),
            message.content.clone(),
            MessageMetadata {
                exchange_count: exchange.exchange_count,
                next_turn: Some(exchange.next_turn.clone()),
                waiting_for_intervention: exchange.waiting_for_intervention,
                target_speaker: None,
                error: message.error,
            },
        ));
        self.transcript.push(message.clone());

        tracing::debug!(
            pin = %self.pin,
            speaker = %message.sender,
            exchange_count = exchange.exchange_count,
            "exchange recorded"
        );
        if exchange.waiting_for_intervention {
            tracing::info!(pin = %self.pin, exchange_count = exchange.exchange_count, "checkpoint reached");
        }

        self.broadcast(
            ServerEvent::TurnUpdate {
                message,
                next_turn: Some(exchange.next_turn),
                exchange_count: exchange.exchange_count,
                waiting_for_intervention: exchange.waiting_for_intervention,
            },
            None,
        );
        self.schedule_turn();
        Ok(())
    }

    fn handle_intervene(
        &mut self,
        caller: ParticipantId,
        content: String,
        author_name: String,
        target_speaker: String,
    ) -> Result<(), RoomError> {
        self.require_host(caller, "intervene")?;
        self.require_status(&[SessionStatus::Active, SessionStatus::Paused], "intervene")?;
        let next = self.turns.intervene(&target_speaker)?;

        let author = if author_name.trim().is_empty() {
            self.display_name(caller)
        } else {
            author_name
        };
        self.journal.append(NewMessage::new(
            self.pin.clone(),
            self.session_id,
            MessageKind::Intervention,
            author.clone(),
            content.clone(),
            MessageMetadata {
                exchange_count: self.turns.exchange_count(),
                next_turn: Some(next.clone()),
                waiting_for_intervention: false,
                target_speaker: Some(target_speaker.clone()),
                error: false,
            },
        ));
        self.transcript.push(TurnMessage {
            sender: author.clone(),
            content: content.clone(),
            error: false,
        });

        tracing::info!(pin = %self.pin, target = %target_speaker, next = %next, "intervention accepted");
        self.broadcast(
            ServerEvent::Intervention {
                content,
                author_name: author,
                target_speaker,
                next_turn: Some(next),
            },
            None,
        );
        self.schedule_turn();
        Ok(())
    }

    /// Starts the engine on the current speaker if this room produces its
    /// own turns and may do so now.
    fn schedule_turn(&mut self) {
        if self.status != SessionStatus::Active || self.turns.intervention_pending() {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.is_busy() {
            return;
        }
        engine.start(GenerationRequest::for_speaker(
            &self.pin,
            &self.settings.setup,
            self.turns.current_speaker(),
            &self.transcript,
        ));
    }

    // -- Chat -------------------------------------------------------------

    fn handle_chat(
        &mut self,
        caller: ParticipantId,
        content: String,
        author_name: Option<String>,
    ) -> Result<(), RoomError> {
        let participant = self.member(caller)?;
        if participant.role == Role::Viewer {
            return Err(RoomError::Unauthorized("viewers cannot chat".into()));
        }
        let author = author_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| participant.display_name.clone());

        if self.settings.persist_chat {
            self.journal.append(NewMessage::new(
                self.pin.clone(),
                self.session_id,
                MessageKind::Chat,
                author.clone(),
                content.clone(),
                MessageMetadata {
                    exchange_count: self.turns.exchange_count(),
                    next_turn: Some(self.turns.current_speaker().to_owned()),
                    waiting_for_intervention: self.turns.intervention_pending(),
                    ..Default::default()
                },
            ));
        }
        self.broadcast(
            ServerEvent::ChatMessage {
                content,
                author_id: Some(caller),
                author_name: author,
            },
            None,
        );
        Ok(())
    }

    // -- Helpers ----------------------------------------------------------

    fn member(&self, caller: ParticipantId) -> Result<&Participant, RoomError> {
        self.presence.get(caller).ok_or(RoomError::NotInRoom)
    }

    fn require_host(&self, caller: ParticipantId, action: &str) -> Result<(), RoomError> {
        self.member(caller)?;
        if caller != self.host_id {
            return Err(RoomError::Unauthorized(format!("only the host can {action}")));
        }
        Ok(())
    }

    fn require_status(&self, allowed: &[SessionStatus], action: &str) -> Result<(), RoomError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(RoomError::InvalidState(format!(
                "cannot {action} while the session is {}",
                self.status
            )))
        }
    }

    fn display_name(&self, id: ParticipantId) -> String {
        self.presence
            .get(id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn send_to(&self, id: ParticipantId, event: ServerEvent) {
        let Some(link) = self.presence.get(id).and_then(|p| p.link.as_ref()) else {
            return;
        };
        if let Err(failure) = link.try_deliver(Outbound::Event(Arc::new(event))) {
            tracing::warn!(pin = %self.pin, participant = %id, ?failure, "direct send failed");
        }
    }

    fn broadcast(&self, event: ServerEvent, exclude: Option<ParticipantId>) {
        fanout::deliver(&self.pin, &self.presence, event, exclude);
    }

    fn broadcast_count(&self) {
        self.broadcast(
            ServerEvent::ParticipantCount {
                count: self.presence.connected_count(),
            },
            None,
        );
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            pin: self.pin.clone(),
            host_id: self.host_id,
            status: self.status,
            exchange_count: self.turns.exchange_count(),
            current_speaker: self.turns.current_speaker().to_owned(),
            waiting_for_intervention: self.turns.intervention_pending(),
            turn_authority: self.settings.turn_authority,
            participant_count: self.presence.len(),
            connected_count: self.presence.connected_count(),
            viewer_count: self.presence.viewer_count(),
            host_count: self.presence.host_count(),
        }
    }
}
