//! Voice session
//!
//! Connects speech capture, the turn engine and speech playback for one
//! conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  SpeechSignal  ┌─────────────┐  TurnEvent  ┌─────────────┐
//! │   Capture   │───────────────▶│   Session   │◀────────────│ TurnEngine  │
//! │ (VAD + STT) │                │ (interrupt  │────────────▶│             │
//! └─────────────┘◀───reset/stop──│  handler)   │ start/abort └─────────────┘
//!                                └──────┬──────┘
//!                                       │ sentences
//!                                       ▼
//!                                ┌─────────────┐
//!                                │   Speaker   │──▶ SpeechSink
//!                                └─────────────┘
//! ```
//!
//! Sentences are spoken in order by a dedicated speaker task. Barge-in and
//! preemption raise a floor below which turn ids are never spoken, so
//! sentences already queued for an interrupted turn are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use voice_turn_config::{NoisePolicy, SessionConfig};
use voice_turn_core::{SpeechCapture, SpeechSignal, SpeechSink, Transcript};
use voice_turn_pipeline::{BargeInAction, InterruptHandler, TranscriptAction};

use crate::turn_engine::{TurnEngine, TurnEvent, TurnId};
use crate::AgentError;

/// Voice session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSessionState {
    /// Session not started
    Idle,
    /// Waiting for user speech
    Listening,
    /// A turn is generating
    Processing,
    /// Session ended
    Ended,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Capture reported a listening timeout
    Timeout,
    /// Noise with `NoisePolicy::StopListening`
    NoSpeech,
    /// The signal channel closed
    CaptureClosed,
}

/// Voice session events
#[derive(Debug, Clone)]
pub enum VoiceSessionEvent {
    Started {
        session_id: String,
    },
    StateChanged {
        old: VoiceSessionState,
        new: VoiceSessionState,
    },
    /// Recognized user speech
    FinalTranscript {
        text: String,
    },
    /// A sentence went to the speech sink
    Speaking {
        turn_id: TurnId,
        text: String,
    },
    /// A turn was aborted before speaking; its text waits for the next utterance
    Preempted {
        text: String,
    },
    /// The user talked over the assistant
    BargedIn,
    /// Empty transcript with nothing pending
    Noise,
    /// Engine event of the current turn
    Turn(TurnEvent),
    Error(String),
    Ended {
        reason: SessionEnd,
    },
}

/// Voice session for a single conversation
pub struct VoiceSession {
    session_id: String,
    engine: Arc<TurnEngine>,
    handler: InterruptHandler,
    sink: Arc<dyn SpeechSink>,
    capture: Arc<dyn SpeechCapture>,
    /// Model for every turn; empty selects the engine default
    model: String,
    state: Mutex<VoiceSessionState>,
    event_tx: broadcast::Sender<VoiceSessionEvent>,
    /// Turns with a lower id are never spoken
    speak_floor: Arc<AtomicU64>,
}

impl VoiceSession {
    pub fn new(
        engine: Arc<TurnEngine>,
        config: SessionConfig,
        sink: Arc<dyn SpeechSink>,
        capture: Arc<dyn SpeechCapture>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            engine,
            handler: InterruptHandler::new(config),
            sink,
            capture,
            model: String::new(),
            state: Mutex::new(VoiceSessionState::Idle),
            event_tx,
            speak_floor: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceSessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> VoiceSessionState {
        *self.state.lock()
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    pub fn handler(&self) -> &InterruptHandler {
        &self.handler
    }

    /// Run the session until capture times out, noise ends it, or the
    /// signal channel closes.
    ///
    /// A turn still generating when listening ends is allowed to finish
    /// and is spoken before this returns.
    pub async fn run(
        &self,
        mut signals: mpsc::Receiver<SpeechSignal>,
        mut turn_events: mpsc::UnboundedReceiver<TurnEvent>,
    ) -> Result<SessionEnd, AgentError> {
        self.set_state(VoiceSessionState::Listening);
        let _ = self.event_tx.send(VoiceSessionEvent::Started {
            session_id: self.session_id.clone(),
        });
        tracing::info!(session_id = %self.session_id, "Voice session started");

        let (speak_tx, speak_rx) = mpsc::unbounded_channel();
        let speaker = tokio::spawn(speak_loop(
            Arc::clone(&self.sink),
            speak_rx,
            Arc::clone(&self.speak_floor),
            self.event_tx.clone(),
        ));

        let reason = loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        if let Some(reason) = self.on_signal(signal) {
                            break reason;
                        }
                    }
                    None => break SessionEnd::CaptureClosed,
                },
                Some(event) = turn_events.recv() => self.on_turn_event(event, &speak_tx),
            }
        };

        if reason != SessionEnd::CaptureClosed {
            self.capture.stop();
        }
        self.set_state(VoiceSessionState::Ended);
        tracing::info!(session_id = %self.session_id, reason = ?reason, "Listening ended");

        // Let an in-flight turn finish and be spoken
        let current = self.engine.current_turn_id();
        if self.engine.is_active() {
            while let Some(event) = turn_events.recv().await {
                let done = matches!(event, TurnEvent::Finished { turn_id, .. } if turn_id == current);
                self.on_turn_event(event, &speak_tx);
                if done {
                    break;
                }
            }
        }
        while let Ok(event) = turn_events.try_recv() {
            self.on_turn_event(event, &speak_tx);
        }

        drop(speak_tx);
        speaker
            .await
            .map_err(|e| AgentError::Speech(format!("Speaker task failed: {}", e)))?;

        let _ = self.event_tx.send(VoiceSessionEvent::Ended { reason });
        Ok(reason)
    }

    fn on_signal(&self, signal: SpeechSignal) -> Option<SessionEnd> {
        match signal {
            SpeechSignal::SpeechStarted => {
                let preempted = self.engine.try_preempt();
                let generating = self.engine.is_active();
                match self.handler.on_speech_started(preempted, generating) {
                    BargeInAction::Preempted => {
                        self.silence();
                        let text = self.handler.candidate().unwrap_or_default();
                        tracing::info!(session_id = %self.session_id, "Turn preempted by new speech");
                        let _ = self.event_tx.send(VoiceSessionEvent::Preempted { text });
                        self.set_state(VoiceSessionState::Listening);
                    }
                    BargeInAction::Interrupt => {
                        self.silence();
                        self.engine.abort(true);
                        tracing::info!(session_id = %self.session_id, "Barge-in");
                        let _ = self.event_tx.send(VoiceSessionEvent::BargedIn);
                        self.set_state(VoiceSessionState::Listening);
                    }
                    BargeInAction::Ignore => {}
                }
                None
            }
            SpeechSignal::FinalTranscript(transcript) => {
                if let Transcript::Text(text) = &transcript {
                    let _ = self
                        .event_tx
                        .send(VoiceSessionEvent::FinalTranscript { text: text.clone() });
                }
                self.on_transcript(self.handler.on_final_transcript(&transcript))
            }
        }
    }

    fn on_transcript(&self, action: TranscriptAction) -> Option<SessionEnd> {
        match action {
            TranscriptAction::StartTurn(text) => {
                self.engine.start_turn(&text, &self.model);
                self.set_state(VoiceSessionState::Processing);
            }
            TranscriptAction::RetryPreempted(text) => self.restart(&text),
            TranscriptAction::MergeWithPreempted(text) => {
                self.engine.replace_last_user_message(&text);
                self.restart(&text);
            }
            TranscriptAction::Noise(NoisePolicy::ResumeListening) => {
                tracing::debug!(session_id = %self.session_id, "Noise, listening again");
                let _ = self.event_tx.send(VoiceSessionEvent::Noise);
                self.capture.reset();
            }
            TranscriptAction::Noise(NoisePolicy::StopListening) => {
                let _ = self.event_tx.send(VoiceSessionEvent::Noise);
                return Some(SessionEnd::NoSpeech);
            }
            TranscriptAction::EndSession => return Some(SessionEnd::Timeout),
        }
        None
    }

    /// Regenerate the pending user message, or start afresh with `text`
    fn restart(&self, text: &str) {
        if let Err(err) = self.engine.start_turn_with_current_history(&self.model) {
            tracing::debug!(error = %err, "Starting a new turn instead");
            self.engine.start_turn(text, &self.model);
        }
        self.set_state(VoiceSessionState::Processing);
    }

    /// Stop playback and drop queued sentences of the current turn
    fn silence(&self) {
        self.speak_floor
            .store(self.engine.current_turn_id() + 1, Ordering::SeqCst);
        self.sink.stop();
    }

    fn on_turn_event(&self, event: TurnEvent, speak_tx: &mpsc::UnboundedSender<(TurnId, String)>) {
        let turn_id = event.turn_id();
        if turn_id != self.engine.current_turn_id() {
            tracing::trace!(turn_id, "Dropping event of a replaced turn");
            return;
        }

        if turn_id >= self.speak_floor.load(Ordering::SeqCst) {
            for sentence in event.speakable() {
                let _ = speak_tx.send((turn_id, sentence));
            }
        }

        match &event {
            TurnEvent::Error { error, .. } => {
                let _ = self.event_tx.send(VoiceSessionEvent::Error(error.to_string()));
            }
            TurnEvent::Finished { .. } if self.state() == VoiceSessionState::Processing => {
                self.set_state(VoiceSessionState::Listening);
            }
            _ => {}
        }
        let _ = self.event_tx.send(VoiceSessionEvent::Turn(event));
    }

    fn set_state(&self, new: VoiceSessionState) {
        let old = {
            let mut state = self.state.lock();
            if *state == new || *state == VoiceSessionState::Ended {
                return;
            }
            std::mem::replace(&mut *state, new)
        };
        let _ = self
            .event_tx
            .send(VoiceSessionEvent::StateChanged { old, new });
    }
}

/// Speak queued sentences in order, skipping interrupted turns
async fn speak_loop(
    sink: Arc<dyn SpeechSink>,
    mut rx: mpsc::UnboundedReceiver<(TurnId, String)>,
    floor: Arc<AtomicU64>,
    event_tx: broadcast::Sender<VoiceSessionEvent>,
) {
    while let Some((turn_id, text)) = rx.recv().await {
        if turn_id < floor.load(Ordering::SeqCst) {
            continue;
        }
        let _ = event_tx.send(VoiceSessionEvent::Speaking {
            turn_id,
            text: text.clone(),
        });
        if let Err(err) = sink.speak(&text).await {
            tracing::warn!(turn_id, error = %err, "Speech sink failed");
            let _ = event_tx.send(VoiceSessionEvent::Error(err.to_string()));
        }
    }
}
