//! Session registry: creates rooms and resolves pins to them.

use std::collections::HashMap;
use std::sync::Arc;

use colloquy_protocol::{ParticipantId, RoomSettings, SessionPin, TurnAuthority};
use colloquy_store::{SessionLog, SessionRecord, StoreError};
use rand::Rng;
use tokio::sync::RwLock;

use crate::config::validate_settings;
use crate::engine::{Generator, LogUsageRecorder, UsageRecorder};
use crate::room::{RoomParams, RoomTable, spawn_room};
use crate::{RoomError, RoomHandle, RoomTimings};

const PIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PIN_HALF_LEN: usize = 4;

/// Generates a random pin of the form `XXXX-XXXX`.
///
/// The alphabet leaves out `0`, `O`, `1` and `I`, which are easy to
/// misread when a pin is shared by voice.
pub fn generate_pin() -> SessionPin {
    let mut rng = rand::rng();
    let mut half = || -> String {
        (0..PIN_HALF_LEN)
            .map(|_| PIN_ALPHABET[rng.random_range(0..PIN_ALPHABET.len())] as char)
            .collect()
    };
    let first = half();
    let second = half();
    SessionPin::new(format!("{first}-{second}"))
}

/// All active rooms, keyed by pin.
///
/// Cheap to clone; clones share the same rooms. A room removes itself from
/// the registry when it ends, which frees its pin.
#[derive(Clone)]
pub struct SessionRegistry {
    rooms: RoomTable,
    log: Arc<dyn SessionLog>,
    generator: Option<Arc<dyn Generator>>,
    usage: Arc<dyn UsageRecorder>,
    timings: RoomTimings,
}

impl SessionRegistry {
    pub fn new(log: Arc<dyn SessionLog>) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            log,
            generator: None,
            usage: Arc::new(LogUsageRecorder),
            timings: RoomTimings::default(),
        }
    }

    /// Enables `server` turn authority by supplying the text generator.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_usage_recorder(mut self, usage: Arc<dyn UsageRecorder>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_timings(mut self, timings: RoomTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn timings(&self) -> RoomTimings {
        self.timings
    }

    pub fn log(&self) -> &Arc<dyn SessionLog> {
        &self.log
    }

    /// Creates a room owned by `host_id`.
    ///
    /// An empty `pin` gets a freshly generated one.
    ///
    /// # Errors
    /// [`RoomError::Conflict`] if an active room already uses the pin,
    /// [`RoomError::InvalidSettings`] if `settings` are rejected.
    pub async fn create(
        &self,
        pin: SessionPin,
        host_id: ParticipantId,
        settings: RoomSettings,
    ) -> Result<RoomHandle, RoomError> {
        let mut rooms = self.rooms.write().await;

        let pin = if pin.is_empty() {
            loop {
                let candidate = generate_pin();
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            }
        } else {
            pin
        };
        if rooms.contains_key(&pin) {
            return Err(RoomError::Conflict(pin));
        }

        validate_settings(&pin, &settings)?;
        if settings.turn_authority == TurnAuthority::Server && self.generator.is_none() {
            return Err(RoomError::InvalidSettings(
                "server turn authority is not available on this server".into(),
            ));
        }

        let handle = spawn_room(RoomParams {
            pin: pin.clone(),
            host_id,
            settings,
            timings: self.timings,
            log: Arc::clone(&self.log),
            generator: self.generator.clone(),
            usage: Arc::clone(&self.usage),
            table: Arc::clone(&self.rooms),
        });
        rooms.insert(pin.clone(), handle.clone());
        tracing::info!(%pin, host = %host_id, "session created");
        Ok(handle)
    }

    pub async fn get(&self, pin: &SessionPin) -> Option<RoomHandle> {
        self.rooms.read().await.get(pin).cloned()
    }

    /// Unmaps `pin` and ends its room.
    pub async fn remove(&self, pin: &SessionPin) -> Option<RoomHandle> {
        let handle = self.rooms.write().await.remove(pin)?;
        handle.shutdown("session removed").await;
        tracing::info!(%pin, "session removed");
        Some(handle)
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    pub async fn pins(&self) -> Vec<SessionPin> {
        self.rooms.read().await.keys().cloned().collect()
    }

    /// Ends every active room with `reason`.
    pub async fn shutdown_all(&self, reason: &str) {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        tracing::info!(rooms = handles.len(), reason, "shutting down all sessions");
        for handle in handles {
            handle.shutdown(reason).await;
        }
    }

    /// Past and present sessions of `host_id`, newest first.
    pub async fn sessions_for_host(
        &self,
        host_id: ParticipantId,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || log.list_sessions(host_id))
            .await
            .map_err(|_| StoreError::Poisoned)?
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("timings", &self.timings)
            .field("server_turns", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}
