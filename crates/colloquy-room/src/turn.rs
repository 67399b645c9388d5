//! The turn controller: which speaker acts next, and when to stop for a
//! checkpoint.
//!
//! Pure state, no I/O. The room actor owns one and feeds it every accepted
//! exchange and intervention, so the same sequence of calls always yields
//! the same state. [`TurnController::replay`] relies on that to rebuild a
//! room's turn state from its persisted log.
//!
//! ```text
//!  record_exchange ──→ exchangeCount % interval == 0 ? ──→ checkpoint pending
//!        ↑                                                         │
//!        └───────────────────── intervene(target) ←────────────────┘
//! ```

use colloquy_protocol::{MessageKind, StoredMessage};

use crate::RoomError;

/// The result of an accepted exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub exchange_count: u64,
    pub next_turn: String,
    pub waiting_for_intervention: bool,
}

/// Turn order and checkpoint cadence for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnController {
    speakers: Vec<String>,
    /// Index into `speakers`.
    current: usize,
    exchange_count: u64,
    checkpoint_interval: u64,
    intervention_pending: bool,
}

impl TurnController {
    /// Starts at exchange 0 with `speakers[0]` to speak.
    ///
    /// The caller guarantees at least one speaker and an interval of at
    /// least 1 (see settings validation).
    pub fn new(speakers: Vec<String>, checkpoint_interval: u32) -> Self {
        Self {
            speakers,
            current: 0,
            exchange_count: 0,
            checkpoint_interval: u64::from(checkpoint_interval.max(1)),
            intervention_pending: false,
        }
    }

    /// Rebuilds turn state by reapplying a persisted log in order.
    ///
    /// `ai` entries replay as exchanges, `intervention` entries as
    /// interventions on their recorded target. Chat is skipped.
    pub fn replay(
        speakers: Vec<String>,
        checkpoint_interval: u32,
        log: &[StoredMessage],
    ) -> Result<Self, RoomError> {
        let mut turns = Self::new(speakers, checkpoint_interval);
        for message in log {
            match message.kind {
                MessageKind::Ai => {
                    turns.record_exchange(&message.sender)?;
                }
                MessageKind::Intervention => {
                    let target = message.metadata.target_speaker.as_deref().ok_or_else(|| {
                        RoomError::InvalidState(format!(
                            "intervention #{} has no target speaker",
                            message.sequence
                        ))
                    })?;
                    turns.intervene(target)?;
                }
                MessageKind::Chat => {}
            }
        }
        Ok(turns)
    }

    pub fn current_speaker(&self) -> &str {
        self.speakers
            .get(self.current)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn exchange_count(&self) -> u64 {
        self.exchange_count
    }

    pub fn intervention_pending(&self) -> bool {
        self.intervention_pending
    }

    pub fn speakers(&self) -> &[String] {
        &self.speakers
    }

    /// Accepts one exchange by `speaker` and advances the turn.
    ///
    /// # Errors
    /// [`RoomError::InvalidState`] while a checkpoint is pending or when
    /// `speaker` is not the current speaker.
    pub fn record_exchange(&mut self, speaker: &str) -> Result<Exchange, RoomError> {
        if self.intervention_pending {
            return Err(RoomError::InvalidState(
                "waiting for an intervention at the checkpoint".into(),
            ));
        }
        if speaker != self.current_speaker() {
            return Err(RoomError::InvalidState(format!(
                "it is {}'s turn, not {speaker}'s",
                self.current_speaker()
            )));
        }

        self.exchange_count += 1;
        self.current = self.after(self.current);
        self.intervention_pending = self.exchange_count % self.checkpoint_interval == 0;

        Ok(Exchange {
            exchange_count: self.exchange_count,
            next_turn: self.current_speaker().to_owned(),
            waiting_for_intervention: self.intervention_pending,
        })
    }

    /// Clears the pending checkpoint. The speaker after `target` responds
    /// next; its name is returned.
    ///
    /// # Errors
    /// [`RoomError::InvalidState`] if no checkpoint is pending or `target`
    /// is not a configured speaker.
    pub fn intervene(&mut self, target: &str) -> Result<String, RoomError> {
        if !self.intervention_pending {
            return Err(RoomError::InvalidState("no checkpoint is pending".into()));
        }
        let index = self
            .speakers
            .iter()
            .position(|s| s == target)
            .ok_or_else(|| RoomError::InvalidState(format!("unknown speaker {target:?}")))?;

        self.current = self.after(index);
        self.intervention_pending = false;
        Ok(self.current_speaker().to_owned())
    }

    fn after(&self, index: usize) -> usize {
        (index + 1) % self.speakers.len().max(1)
    }
}
