//! Interrupt handler for barge-in and preemption decisions
//!
//! Decides what a speech-capture signal means for the conversation:
//! - Speech that starts before any sentence of the current turn was
//!   delivered preempts the turn; its user text is kept as a candidate
//! - An empty transcript replays the candidate, or counts as noise
//! - A new transcript is merged with the candidate, or starts a new turn
//! - A timeout ends the listening session
//!
//! The handler owns only the candidate. Reading and aborting the turn
//! happens atomically on the engine side; the result is passed in here.

use parking_lot::Mutex;
use voice_turn_config::{NoisePolicy, SessionConfig};
use voice_turn_core::Transcript;

/// Outcome of a speech-started signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BargeInAction {
    /// The turn was preempted before speaking; its text is now the candidate
    Preempted,
    /// The assistant was already speaking; stop speech and generation
    Interrupt,
    /// Nothing to interrupt, or barge-in disabled
    Ignore,
}

/// Outcome of a final transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptAction {
    /// Start an ordinary turn with this text
    StartTurn(String),
    /// Regenerate the preempted turn with its original text
    RetryPreempted(String),
    /// Replace the preempted user text with the merged utterance and regenerate
    MergeWithPreempted(String),
    /// Empty transcript without a candidate
    Noise(NoisePolicy),
    /// Listening session timed out
    EndSession,
}

/// Preemption rules with the pending candidate utterance
pub struct InterruptHandler {
    config: SessionConfig,
    /// User text of a turn aborted before any sentence was delivered
    candidate: Mutex<Option<String>>,
}

impl InterruptHandler {
    /// Create a new interrupt handler
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            candidate: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current preempt candidate
    pub fn candidate(&self) -> Option<String> {
        self.candidate.lock().clone()
    }

    /// Handle speech starting.
    ///
    /// `preempted` is the user text of the turn the engine just aborted
    /// because nothing had been delivered yet, if any.
    pub fn on_speech_started(&self, preempted: Option<String>, generating: bool) -> BargeInAction {
        match preempted {
            Some(text) => {
                tracing::debug!(chars = text.len(), "Turn preempted before first sentence");
                *self.candidate.lock() = Some(text);
                BargeInAction::Preempted
            }
            None if generating && self.config.barge_in_enabled => BargeInAction::Interrupt,
            None => BargeInAction::Ignore,
        }
    }

    /// Handle a final transcript
    pub fn on_final_transcript(&self, transcript: &Transcript) -> TranscriptAction {
        let mut candidate = self.candidate.lock();
        match transcript {
            Transcript::Timeout => {
                *candidate = None;
                TranscriptAction::EndSession
            }
            Transcript::Empty => match candidate.take() {
                Some(text) => TranscriptAction::RetryPreempted(text),
                None => TranscriptAction::Noise(self.config.noise_policy),
            },
            Transcript::Text(text) => match candidate.take() {
                Some(previous) => {
                    TranscriptAction::MergeWithPreempted(format!("{} {}", previous, text))
                }
                None => TranscriptAction::StartTurn(text.clone()),
            },
        }
    }

    /// Drop any pending candidate
    pub fn reset(&self) {
        *self.candidate.lock() = None;
    }
}
