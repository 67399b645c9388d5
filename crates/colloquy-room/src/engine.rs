//! Server-side turn production.
//!
//! When a room's turn authority is `server`, the room itself produces
//! speaker turns by calling an external text-generation capability. The
//! capability is hidden behind [`Generator`]; the room never knows which
//! provider answers.
//!
//! At most one generation is in flight per room. The room starts one when
//! it is `Active` with no checkpoint pending, and the result comes back to
//! the room as a [`Produced`] message that the room applies like any other
//! exchange. Pausing or ending the room aborts the in-flight call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_protocol::{SessionPin, SetupData, TurnMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Capability contracts
// ---------------------------------------------------------------------------

/// Tokens consumed by one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// The generation capability failed. The room turns this into a visible
/// error entry in the transcript and moves on to the next speaker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generation timed out")]
    Timeout,
}

/// Everything a provider needs to produce one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub pin: SessionPin,
    pub speaker: String,
    pub provider: String,
    pub model_id: String,
    pub system_instructions: String,
    /// The conversation so far, oldest first.
    pub history: Vec<TurnMessage>,
}

impl GenerationRequest {
    /// Builds the request for `speaker` from the room setup and transcript.
    ///
    /// System instructions are the room instructions followed by the
    /// speaker's own. The opening content, if any, leads the history.
    pub fn for_speaker(
        pin: &SessionPin,
        setup: &SetupData,
        speaker: &str,
        transcript: &[TurnMessage],
    ) -> Self {
        let config = setup.speaker(speaker);
        let system_instructions = [
            setup.instructions.trim(),
            config.map(|c| c.instructions.trim()).unwrap_or_default(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

        let opening = setup.opening.iter().map(|content| TurnMessage {
            sender: "opening".into(),
            content: content.clone(),
            error: false,
        });
        let history = opening
            .chain(transcript.iter().filter(|m| !m.error).cloned())
            .collect();

        Self {
            pin: pin.clone(),
            speaker: speaker.to_owned(),
            provider: config.map(|c| c.provider.clone()).unwrap_or_default(),
            model_id: config.map(|c| c.model_id.clone()).unwrap_or_default(),
            system_instructions,
            history,
        }
    }
}

/// The external text-generation capability.
///
/// Rooms hold it as an `Arc<dyn Generator>` and never learn which provider
/// answers. Latency and failures both surface as [`GenerationError`].
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError>;
}

/// One produced turn's token consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub pin: SessionPin,
    pub speaker: String,
    pub provider: String,
    pub model_id: String,
    pub usage: TokenUsage,
}

/// Fire-and-forget sink for token usage. Called once per produced turn;
/// implementations must not block.
pub trait UsageRecorder: Send + Sync + 'static {
    fn record(&self, record: UsageRecord);
}

/// A [`UsageRecorder`] that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUsageRecorder;

impl UsageRecorder for LogUsageRecorder {
    fn record(&self, record: UsageRecord) {
        tracing::info!(
            pin = %record.pin,
            speaker = %record.speaker,
            provider = %record.provider,
            model = %record.model_id,
            input_tokens = record.usage.input_tokens,
            output_tokens = record.usage.output_tokens,
            "token usage"
        );
    }
}

// ---------------------------------------------------------------------------
// TurnEngine
// ---------------------------------------------------------------------------

/// A finished generation on its way back to the room.
#[derive(Debug)]
pub(crate) struct Produced {
    pub(crate) epoch: u64,
    pub(crate) speaker: String,
    pub(crate) result: Result<Generation, GenerationError>,
}

/// The single turn producer of a server-authority room.
pub(crate) struct TurnEngine {
    generator: Arc<dyn Generator>,
    usage: Arc<dyn UsageRecorder>,
    delay: Duration,
    results: mpsc::Sender<Produced>,
    /// Bumped on every start, so a result from an aborted call is ignored.
    epoch: u64,
    in_flight: Option<(u64, JoinHandle<()>)>,
}

impl TurnEngine {
    pub(crate) fn new(
        generator: Arc<dyn Generator>,
        usage: Arc<dyn UsageRecorder>,
        delay: Duration,
        results: mpsc::Sender<Produced>,
    ) -> Self {
        Self {
            generator,
            usage,
            delay,
            results,
            epoch: 0,
            in_flight: None,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Starts producing the next turn unless one is already in flight.
    pub(crate) fn start(&mut self, request: GenerationRequest) {
        if self.is_busy() {
            return;
        }
        self.epoch += 1;
        let epoch = self.epoch;
        let generator = Arc::clone(&self.generator);
        let usage = Arc::clone(&self.usage);
        let results = self.results.clone();
        let delay = self.delay;

        tracing::debug!(pin = %request.pin, speaker = %request.speaker, epoch, "producing turn");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let speaker = request.speaker.clone();
            let record = UsageRecord {
                pin: request.pin.clone(),
                speaker: speaker.clone(),
                provider: request.provider.clone(),
                model_id: request.model_id.clone(),
                usage: TokenUsage::default(),
            };

            let result = generator.generate(request).await;
            if let Ok(generation) = &result {
                usage.record(UsageRecord {
                    usage: generation.usage,
                    ..record
                });
            }
            let _ = results
                .send(Produced {
                    epoch,
                    speaker,
                    result,
                })
                .await;
        });
        self.in_flight = Some((epoch, handle));
    }

    /// Accepts a result if it belongs to the call in flight.
    pub(crate) fn finish(&mut self, epoch: u64) -> bool {
        match &self.in_flight {
            Some((current, _)) if *current == epoch => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Aborts the call in flight, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some((epoch, handle)) = self.in_flight.take() {
            handle.abort();
            tracing::debug!(epoch, "turn production cancelled");
        }
    }
}

impl Drop for TurnEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}
