//! Room timing configuration and settings validation.

use std::collections::HashSet;
use std::time::Duration;

use colloquy_protocol::{RoomSettings, SessionPin};

use crate::RoomError;

// ---------------------------------------------------------------------------
// RoomTimings
// ---------------------------------------------------------------------------

/// Server-wide delays every room uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomTimings {
    /// How long a begun room stays `Starting` before it goes `Active`.
    ///
    /// The host's client navigates from the lobby to the live view right
    /// after `begin_session`, dropping and re-opening its socket. The room
    /// waits this long before it starts producing turns.
    pub start_grace: Duration,

    /// How long a room may sit with no connected socket before it is
    /// destroyed.
    pub empty_room_grace: Duration,

    /// Pause before each server-produced turn.
    pub turn_delay: Duration,
}

impl Default for RoomTimings {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_secs(3),
            empty_room_grace: Duration::from_secs(30),
            turn_delay: Duration::from_secs(1),
        }
    }
}

impl RoomTimings {
    pub fn with_start_grace(mut self, grace: Duration) -> Self {
        self.start_grace = grace;
        self
    }

    pub fn with_empty_room_grace(mut self, grace: Duration) -> Self {
        self.empty_room_grace = grace;
        self
    }

    pub fn with_turn_delay(mut self, delay: Duration) -> Self {
        self.turn_delay = delay;
        self
    }
}

// ---------------------------------------------------------------------------
// Settings validation
// ---------------------------------------------------------------------------

/// Checks the settings a `create_session` supplied.
///
/// Rules:
/// - `checkpointInterval` is at least 1.
/// - `maxParticipants` is at least 1 (the host).
/// - at least two speakers are configured, with unique, non-empty names.
pub(crate) fn validate_settings(pin: &SessionPin, settings: &RoomSettings) -> Result<(), RoomError> {
    if settings.checkpoint_interval == 0 {
        return Err(RoomError::InvalidSettings(
            "checkpointInterval must be at least 1".into(),
        ));
    }
    if settings.max_participants == 0 {
        return Err(RoomError::InvalidSettings(
            "maxParticipants must be at least 1".into(),
        ));
    }

    let speakers = &settings.setup.speakers;
    if speakers.len() < 2 {
        return Err(RoomError::InvalidSettings(format!(
            "session {pin} needs at least two speakers, got {}",
            speakers.len()
        )));
    }
    let mut seen = HashSet::new();
    for speaker in speakers {
        if speaker.name.trim().is_empty() {
            return Err(RoomError::InvalidSettings("speaker name is empty".into()));
        }
        if !seen.insert(speaker.name.as_str()) {
            return Err(RoomError::InvalidSettings(format!(
                "duplicate speaker name {:?}",
                speaker.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use colloquy_protocol::{SetupData, SpeakerConfig};

    use super::*;

    fn speaker(name: &str) -> SpeakerConfig {
        SpeakerConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    fn settings(names: &[&str]) -> RoomSettings {
        RoomSettings {
            setup: SetupData {
                speakers: names.iter().map(|n| speaker(n)).collect(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pin() -> SessionPin {
        SessionPin::new("AB12-CD34")
    }

    #[test]
    fn test_validate_settings_two_speakers_ok() {
        assert!(validate_settings(&pin(), &settings(&["model-a", "model-b"])).is_ok());
    }

    #[test]
    fn test_validate_settings_single_speaker_rejected() {
        let err = validate_settings(&pin(), &settings(&["model-a"])).unwrap_err();
        assert!(matches!(err, RoomError::InvalidSettings(_)));
    }

    #[test]
    fn test_validate_settings_duplicate_speaker_rejected() {
        let err = validate_settings(&pin(), &settings(&["model-a", "model-a"])).unwrap_err();
        assert!(matches!(err, RoomError::InvalidSettings(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_validate_settings_zero_checkpoint_interval_rejected() {
        let mut s = settings(&["model-a", "model-b"]);
        s.checkpoint_interval = 0;
        assert!(validate_settings(&pin(), &s).is_err());
    }

    #[test]
    fn test_room_timings_builder_overrides() {
        let timings = RoomTimings::default()
            .with_start_grace(Duration::from_millis(10))
            .with_turn_delay(Duration::ZERO);
        assert_eq!(timings.start_grace, Duration::from_millis(10));
        assert_eq!(timings.turn_delay, Duration::ZERO);
        assert_eq!(timings.empty_room_grace, Duration::from_secs(30));
    }
}
