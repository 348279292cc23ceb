//! Turn engine
//!
//! Owns the conversation history and the single active turn. A turn runs
//! on its own task: cooldown pre-check, throttle, then the generation
//! strategy. Everything the caller observes arrives as `TurnEvent`s on one
//! control channel.
//!
//! ## Ordering
//!
//! Every event is sent while holding the turn-control lock, after checking
//! that the turn is still the active, generating one. `abort` takes the same
//! lock, so nothing of an aborted turn is delivered past the abort point and
//! `Finished` is always the turn's last event.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use voice_turn_config::TurnConfig;
use voice_turn_core::{ConfigProvider, History, Message};
use voice_turn_llm::{
    fast_variant, Citation, Delivery, ErrorKind, GenerationStrategy, ProviderError,
    StrategyEvent, StrategyExecutor, StrategyOutcome, StrategyRequest, SystemNotice,
};
use voice_turn_pipeline::{normalize, SentenceDetector, SentenceSplitter};

use crate::AgentError;

/// Monotonic turn identifier, starting at 1
pub type TurnId = u64;

/// Turn state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// No turn started yet
    Idle,
    Generating,
    /// Stopped by `abort` or preemption
    Aborted,
    Finished,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Generation ran to completion (soft failures included)
    Completed,
    Aborted,
    /// A hard provider error ended the turn
    Failed,
}

/// Provider failure as reported to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider} {kind} ({model}): {message}")]
pub struct TurnError {
    pub kind: ErrorKind,
    pub provider: String,
    pub model: String,
    pub message: String,
}

impl From<&ProviderError> for TurnError {
    fn from(err: &ProviderError) -> Self {
        Self {
            kind: err.kind,
            provider: err.provider.clone(),
            model: err.model.clone(),
            message: err.message.clone(),
        }
    }
}

/// Events on the engine's control channel
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Started {
        turn_id: TurnId,
        model: String,
        strategy: GenerationStrategy,
    },
    /// Raw streamed text
    StreamDelta { turn_id: TurnId, text: String },
    /// Sentence carved from the stream; `index` counts from 0 within the turn
    StreamSentence {
        turn_id: TurnId,
        index: usize,
        text: String,
    },
    FirstSentence { turn_id: TurnId, text: String },
    RemainingSentences {
        turn_id: TurnId,
        sentences: Vec<String>,
    },
    /// Complete answer text, sent once before `Finished`
    FinalResponse {
        turn_id: TurnId,
        text: String,
        grounding: Vec<Citation>,
    },
    System {
        turn_id: TurnId,
        notice: SystemNotice,
    },
    Error { turn_id: TurnId, error: TurnError },
    Finished {
        turn_id: TurnId,
        outcome: TurnOutcome,
    },
}

impl TurnEvent {
    pub fn turn_id(&self) -> TurnId {
        match self {
            TurnEvent::Started { turn_id, .. }
            | TurnEvent::StreamDelta { turn_id, .. }
            | TurnEvent::StreamSentence { turn_id, .. }
            | TurnEvent::FirstSentence { turn_id, .. }
            | TurnEvent::RemainingSentences { turn_id, .. }
            | TurnEvent::FinalResponse { turn_id, .. }
            | TurnEvent::System { turn_id, .. }
            | TurnEvent::Error { turn_id, .. }
            | TurnEvent::Finished { turn_id, .. } => *turn_id,
        }
    }

    /// Sentences this event hands to speech, in order
    pub fn speakable(&self) -> Vec<String> {
        match self {
            TurnEvent::StreamSentence { text, .. } | TurnEvent::FirstSentence { text, .. } => {
                vec![text.clone()]
            }
            TurnEvent::RemainingSentences { sentences, .. } => sentences.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct TurnControl {
    turn_id: TurnId,
    state: TurnState,
    /// User text the turn answers
    user_text: String,
    /// Sentences already handed to the caller
    delivered: Vec<String>,
    abort_handle: Option<AbortHandle>,
}

impl TurnControl {
    fn idle() -> Self {
        Self {
            turn_id: 0,
            state: TurnState::Idle,
            user_text: String::new(),
            delivered: Vec::new(),
            abort_handle: None,
        }
    }

    fn accepts(&self, turn_id: TurnId) -> bool {
        self.turn_id == turn_id && self.state == TurnState::Generating
    }
}

/// Minimum spacing between request starts
#[derive(Debug)]
struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next request slot and return how long to wait for it
    fn reserve(&self) -> Duration {
        let now = Instant::now();
        let mut last = self.next_slot.lock();
        let slot = match *last {
            Some(previous) => (previous + self.interval).max(now),
            None => now,
        };
        *last = Some(slot);
        slot - now
    }
}

/// State shared between the engine handle and turn tasks
struct EngineShared {
    control: Mutex<TurnControl>,
    history: Mutex<History>,
    events: mpsc::UnboundedSender<TurnEvent>,
    throttle: Throttle,
}

impl EngineShared {
    /// Send `event` if `turn_id` is still generating
    fn emit(&self, turn_id: TurnId, event: TurnEvent) -> bool {
        let control = self.control.lock();
        if !control.accepts(turn_id) {
            return false;
        }
        self.events.send(event).is_ok()
    }

    /// Like `emit`, recording `sentences` as delivered
    fn deliver(&self, turn_id: TurnId, sentences: &[String], event: TurnEvent) -> bool {
        let mut control = self.control.lock();
        if !control.accepts(turn_id) {
            return false;
        }
        control.delivered.extend_from_slice(sentences);
        self.events.send(event).is_ok()
    }

    /// End a turn normally; writes history and sends the final events
    fn finish(
        &self,
        turn_id: TurnId,
        outcome: TurnOutcome,
        full_text: String,
        grounding: Vec<Citation>,
    ) {
        let mut control = self.control.lock();
        if !control.accepts(turn_id) {
            return;
        }

        if !full_text.is_empty() {
            self.history.lock().complete_turn(full_text.clone());
            let _ = self.events.send(TurnEvent::FinalResponse {
                turn_id,
                text: full_text,
                grounding,
            });
        } else if !control.delivered.is_empty() {
            self.history.lock().complete_turn(control.delivered.join(" "));
        }

        control.state = TurnState::Finished;
        control.abort_handle = None;
        let _ = self.events.send(TurnEvent::Finished { turn_id, outcome });
    }

    fn abort_locked(&self, control: &mut TurnControl, silent: bool) {
        let turn_id = control.turn_id;
        control.state = TurnState::Aborted;

        if !control.delivered.is_empty() {
            self.history.lock().complete_turn(control.delivered.join(" "));
        }
        if !silent {
            let _ = self.events.send(TurnEvent::System {
                turn_id,
                notice: SystemNotice::stopped(),
            });
        }
        let _ = self.events.send(TurnEvent::Finished {
            turn_id,
            outcome: TurnOutcome::Aborted,
        });

        if let Some(handle) = control.abort_handle.take() {
            handle.abort();
        }
        tracing::info!(turn_id, silent, delivered = control.delivered.len(), "Turn aborted");
    }
}

/// Drives turns against a strategy executor
pub struct TurnEngine {
    shared: Arc<EngineShared>,
    executor: Arc<StrategyExecutor>,
    default_model: String,
    system_prompt: RwLock<String>,
    max_sentences: AtomicUsize,
    faster_first: AtomicBool,
}

impl TurnEngine {
    /// Create an engine and the receiving end of its control channel
    pub fn new(
        executor: StrategyExecutor,
        config: &TurnConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = EngineShared {
            control: Mutex::new(TurnControl::idle()),
            history: Mutex::new(History::new(config.max_history_turns)),
            events,
            throttle: Throttle::new(Duration::from_millis(config.min_request_interval_ms)),
        };

        let engine = Self {
            shared: Arc::new(shared),
            executor: Arc::new(executor),
            default_model: config.default_model.clone(),
            system_prompt: RwLock::new(config.system_prompt.clone()),
            max_sentences: AtomicUsize::new(TurnConfig::clamp_sentences(config.max_sentences)),
            faster_first: AtomicBool::new(config.faster_first),
        };
        (engine, rx)
    }

    /// Take system prompt, sentence budget and strategy from `prefs`
    pub fn with_preferences(self, prefs: &dyn ConfigProvider) -> Self {
        *self.system_prompt.write() = prefs.system_prompt();
        self.set_max_sentences(prefs.sentence_budget());
        self.set_faster_first(prefs.faster_first());
        self
    }

    /// Start a turn answering `text`.
    ///
    /// An active turn is aborted silently first. An empty `model` selects
    /// the configured default. Must be called within a tokio runtime.
    pub fn start_turn(&self, text: &str, model: &str) -> TurnId {
        self.abort(true);
        self.shared.history.lock().push_user(text.trim());
        self.begin(model)
    }

    /// Start a turn answering the pending user message already in history
    pub fn start_turn_with_current_history(&self, model: &str) -> Result<TurnId, AgentError> {
        self.abort(true);
        if !self.shared.history.lock().has_pending_user() {
            return Err(AgentError::NoPendingUser);
        }
        Ok(self.begin(model))
    }

    /// Replace the text of the most recent user message
    pub fn replace_last_user_message(&self, text: &str) -> bool {
        self.shared.history.lock().replace_last_user(text.trim())
    }

    /// Set the sentence budget, clamped to 1..=10
    pub fn set_max_sentences(&self, n: usize) {
        self.max_sentences
            .store(TurnConfig::clamp_sentences(n), Ordering::SeqCst);
    }

    pub fn max_sentences(&self) -> usize {
        self.max_sentences.load(Ordering::SeqCst)
    }

    pub fn set_faster_first(&self, enabled: bool) {
        self.faster_first.store(enabled, Ordering::SeqCst);
    }

    pub fn faster_first(&self) -> bool {
        self.faster_first.load(Ordering::SeqCst)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Abort the active turn.
    ///
    /// Returns false when no turn is generating. Unless `silent`, a
    /// `Stopped` notice precedes the `Finished` event.
    pub fn abort(&self, silent: bool) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != TurnState::Generating {
            return false;
        }
        self.shared.abort_locked(&mut control, silent);
        true
    }

    /// Abort the active turn only if nothing of it was delivered yet.
    ///
    /// Returns the user text of the aborted turn.
    pub fn try_preempt(&self) -> Option<String> {
        let mut control = self.shared.control.lock();
        if control.state != TurnState::Generating || !control.delivered.is_empty() {
            return None;
        }
        self.shared.abort_locked(&mut control, true);
        Some(control.user_text.clone())
    }

    pub fn is_active(&self) -> bool {
        self.shared.control.lock().state == TurnState::Generating
    }

    pub fn state(&self) -> TurnState {
        self.shared.control.lock().state
    }

    /// Id of the most recently started turn (0 before the first)
    pub fn current_turn_id(&self) -> TurnId {
        self.shared.control.lock().turn_id
    }

    /// Sentences delivered by the current turn so far
    pub fn delivered_sentences(&self) -> usize {
        self.shared.control.lock().delivered.len()
    }

    /// Snapshot of the conversation
    pub fn history(&self) -> Vec<Message> {
        self.shared.history.lock().messages().to_vec()
    }

    /// Abort any active turn and forget the conversation
    pub fn clear_history(&self) {
        self.abort(true);
        self.shared.history.lock().clear();
    }

    fn begin(&self, model: &str) -> TurnId {
        let model = match model.trim() {
            "" => self.default_model.clone(),
            m => m.to_string(),
        };
        let strategy = if self.faster_first() {
            GenerationStrategy::FastFirst
        } else {
            GenerationStrategy::Regular
        };
        let budget = self.max_sentences();

        let (history, user_text) = {
            let history = self.shared.history.lock();
            (
                history.prompt_messages(),
                history.last_user().unwrap_or_default().to_string(),
            )
        };
        let request = StrategyRequest {
            model: model.clone(),
            system_prompt: self.system_prompt.read().clone(),
            history,
            max_sentences: budget,
            strategy,
        };

        let turn_id = {
            let mut control = self.shared.control.lock();
            let turn_id = control.turn_id + 1;
            *control = TurnControl {
                turn_id,
                state: TurnState::Generating,
                user_text,
                delivered: Vec::new(),
                abort_handle: None,
            };
            let _ = self.shared.events.send(TurnEvent::Started {
                turn_id,
                model: model.clone(),
                strategy,
            });
            turn_id
        };
        tracing::info!(turn_id, model = %model, strategy = ?strategy, max_sentences = budget, "Turn started");

        let task = TurnTask {
            shared: Arc::clone(&self.shared),
            executor: Arc::clone(&self.executor),
            turn_id,
            budget,
            splitter: *self.executor.splitter(),
        };
        let handle = tokio::spawn(task.run(request));

        let mut control = self.shared.control.lock();
        if control.accepts(turn_id) {
            control.abort_handle = Some(handle.abort_handle());
        }
        turn_id
    }
}

impl Drop for TurnEngine {
    fn drop(&mut self) {
        self.abort(true);
    }
}

/// Per-turn stream bookkeeping
struct StreamState {
    detector: SentenceDetector,
    /// Sentences delivered by this turn
    delivered: usize,
    /// Stream sentences held back by the budget
    overflow: Vec<String>,
    /// Deliver past the budget
    release: bool,
}

/// One turn's background work
struct TurnTask {
    shared: Arc<EngineShared>,
    executor: Arc<StrategyExecutor>,
    turn_id: TurnId,
    budget: usize,
    splitter: SentenceSplitter,
}

impl TurnTask {
    async fn run(self, request: StrategyRequest) {
        let turn_id = self.turn_id;

        if let Some(notice) = self.cooldown_notice(&request) {
            tracing::info!(turn_id, notice = %notice, "Turn skipped during cooldown");
            self.shared.emit(turn_id, TurnEvent::System { turn_id, notice });
            self.shared
                .finish(turn_id, TurnOutcome::Completed, String::new(), Vec::new());
            return;
        }

        let wait = self.shared.throttle.reserve();
        if !wait.is_zero() {
            tracing::debug!(turn_id, wait_ms = wait.as_millis() as u64, "Throttling request");
            tokio::time::sleep(wait).await;
        }

        let mut stream = StreamState {
            detector: SentenceDetector::new(self.splitter),
            delivered: 0,
            overflow: Vec::new(),
            release: false,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let generate = self.executor.run(request, tx);
        let drain = async {
            while let Some(event) = rx.recv().await {
                self.on_strategy_event(&mut stream, event);
            }
        };
        let (result, ()) = tokio::join!(generate, drain);

        match result {
            Ok(outcome) => self.complete(stream, outcome),
            Err(err) => {
                tracing::warn!(turn_id, error = %err, "Turn failed");
                self.shared.emit(
                    turn_id,
                    TurnEvent::Error {
                        turn_id,
                        error: TurnError::from(&err),
                    },
                );
                self.shared
                    .finish(turn_id, TurnOutcome::Failed, String::new(), Vec::new());
            }
        }
    }

    fn cooldown_notice(&self, request: &StrategyRequest) -> Option<SystemNotice> {
        let mut models = vec![request.model.clone()];
        if request.strategy == GenerationStrategy::FastFirst {
            models.insert(0, fast_variant(&request.model));
        }
        models
            .iter()
            .find_map(|model| self.executor.cooldown_for(model))
            .map(|(provider, remaining)| SystemNotice::cooling_down(&provider, remaining))
    }

    fn on_strategy_event(&self, stream: &mut StreamState, event: StrategyEvent) {
        let turn_id = self.turn_id;
        match event {
            StrategyEvent::Delta(text) => {
                let sentences = stream.detector.push(&text);
                self.shared
                    .emit(turn_id, TurnEvent::StreamDelta { turn_id, text });
                for sentence in sentences {
                    self.offer(stream, sentence);
                }
            }
            StrategyEvent::FirstSentence(text) => {
                stream.delivered += 1;
                self.shared.deliver(
                    turn_id,
                    std::slice::from_ref(&text),
                    TurnEvent::FirstSentence { turn_id, text: text.clone() },
                );
            }
            StrategyEvent::Remaining(sentences) => {
                stream.delivered += sentences.len();
                self.shared.deliver(
                    turn_id,
                    &sentences,
                    TurnEvent::RemainingSentences {
                        turn_id,
                        sentences: sentences.clone(),
                    },
                );
            }
            StrategyEvent::Notice(notice) => {
                self.shared.emit(turn_id, TurnEvent::System { turn_id, notice });
            }
        }
    }

    /// Deliver a stream sentence, or hold it back once the budget is spent
    fn offer(&self, stream: &mut StreamState, sentence: String) {
        if stream.delivered >= self.budget && !stream.release {
            stream.overflow.push(sentence);
            return;
        }
        let turn_id = self.turn_id;
        let index = stream.delivered;
        stream.delivered += 1;
        self.shared.deliver(
            turn_id,
            std::slice::from_ref(&sentence),
            TurnEvent::StreamSentence {
                turn_id,
                index,
                text: sentence.clone(),
            },
        );
    }

    fn complete(&self, mut stream: StreamState, outcome: StrategyOutcome) {
        // Held-back sentences and the unfinished tail of a broken stream are
        // never spoken; only what was already delivered reaches history
        if let Delivery::Interrupted { chunks } = outcome.delivery {
            tracing::info!(
                turn_id = self.turn_id,
                chunks,
                delivered = stream.delivered,
                held_back = stream.overflow.len(),
                "Stream interrupted"
            );
            self.shared
                .finish(self.turn_id, TurnOutcome::Completed, String::new(), Vec::new());
            return;
        }

        let tail = stream.detector.finish();

        // A single chunk carried the whole answer; pacing has nothing to pace
        if let Delivery::Streamed { chunks } = outcome.delivery {
            if chunks <= 1 {
                stream.release = true;
                let held = std::mem::take(&mut stream.overflow);
                for sentence in held {
                    self.offer(&mut stream, sentence);
                }
            }
        }
        for sentence in tail {
            self.offer(&mut stream, sentence);
        }

        let full_text = if outcome.full_text.is_empty() {
            normalize(&stream.detector.text())
        } else {
            outcome.full_text
        };

        tracing::info!(
            turn_id = self.turn_id,
            delivery = ?outcome.delivery,
            delivered = stream.delivered,
            held_back = stream.overflow.len(),
            chars = full_text.len(),
            "Turn completed"
        );
        self.shared.finish(
            self.turn_id,
            TurnOutcome::Completed,
            full_text,
            outcome.citations,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_requests() {
        let throttle = Throttle::new(Duration::from_millis(1200));
        assert_eq!(throttle.reserve(), Duration::ZERO);
        assert_eq!(throttle.reserve(), Duration::from_millis(1200));
        assert_eq!(throttle.reserve(), Duration::from_millis(2400));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(throttle.reserve(), Duration::ZERO);
    }

    #[test]
    fn test_turn_error_from_provider_error() {
        let err = ProviderError::new("anthropic", "claude-sonnet-4-20250514", ErrorKind::Auth, "bad key");
        let turn_error = TurnError::from(&err);
        assert_eq!(turn_error.kind, ErrorKind::Auth);
        assert_eq!(turn_error.provider, "anthropic");
        assert!(turn_error.to_string().contains("bad key"));
    }

    #[test]
    fn test_event_accessors() {
        let event = TurnEvent::RemainingSentences {
            turn_id: 7,
            sentences: vec!["One sentence here.".into(), "Another one here.".into()],
        };
        assert_eq!(event.turn_id(), 7);
        assert_eq!(event.speakable().len(), 2);

        let event = TurnEvent::Finished {
            turn_id: 7,
            outcome: TurnOutcome::Completed,
        };
        assert!(event.speakable().is_empty());
    }

    #[test]
    fn test_control_accepts_only_generating_turn() {
        let mut control = TurnControl::idle();
        assert!(!control.accepts(0));

        control.turn_id = 3;
        control.state = TurnState::Generating;
        assert!(control.accepts(3));
        assert!(!control.accepts(2));

        control.state = TurnState::Aborted;
        assert!(!control.accepts(3));
    }
}
