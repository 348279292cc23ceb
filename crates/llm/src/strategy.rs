//! Generation strategies
//!
//! `Regular` makes one request per turn and streams it when the provider
//! can. `FastFirst` asks a cheaper model for the opening sentence first,
//! then lets the requested model continue after it.
//!
//! The executor never touches engine state. Progress is reported as
//! `StrategyEvent`s over a channel and the run returns a `StrategyOutcome`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use voice_turn_config::TurnConfig;
use voice_turn_core::Message;
use voice_turn_pipeline::{normalize, SentenceSplitter};

use crate::backend::{ChatProvider, ChatRequest, ChatResponse};
use crate::error::{ErrorKind, ProviderError};
use crate::factory::ProviderRegistry;
use crate::grounding::{Citation, GroundingSet};
use crate::models;
use crate::prompt::{parse_first_sentence_reply, PromptBuilder};
use crate::retry::RetryPolicy;

/// Capacity of the per-request delta channel
const DELTA_BUFFER: usize = 64;

/// Which strategy runs a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStrategy {
    /// One request
    #[default]
    Regular,
    /// Fast first sentence, then continuation
    FastFirst,
}

/// Kind of a user-visible system notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    RateLimited,
    Overloaded,
    CoolingDown,
    EmptyResponse,
    Stopped,
}

/// Informational message that is not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub kind: NoticeKind,
    pub message: String,
}

impl SystemNotice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Notice for a soft provider failure
    pub fn from_error(err: &ProviderError) -> Self {
        let kind = match err.kind {
            ErrorKind::Overloaded => NoticeKind::Overloaded,
            _ => NoticeKind::RateLimited,
        };
        Self::new(kind, err.notice_text())
    }

    pub fn cooling_down(provider: &str, remaining: Duration) -> Self {
        Self::new(
            NoticeKind::CoolingDown,
            format!(
                "{} is rate limited; try again in {}s",
                provider,
                remaining.as_secs().max(1)
            ),
        )
    }

    pub fn empty_response(model: &str) -> Self {
        Self::new(NoticeKind::EmptyResponse, format!("{} returned an empty response", model))
    }

    pub fn stopped() -> Self {
        Self::new(NoticeKind::Stopped, "Stopped")
    }
}

impl fmt::Display for SystemNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Progress reported while a strategy runs
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyEvent {
    /// Raw streamed text
    Delta(String),
    /// Opening sentence, ready to speak
    FirstSentence(String),
    /// Sentences after the first
    Remaining(Vec<String>),
    Notice(SystemNotice),
}

/// How the answer text reached us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Raw deltas were streamed
    Streamed { chunks: usize },
    /// Single body(ies), sentences reported as first/remaining
    OneShot,
    /// The stream produced nothing and a one-shot request replaced it
    Fallback,
    /// The stream failed softly after forwarding `chunks` deltas; the text
    /// they carried is incomplete
    Interrupted { chunks: usize },
}

/// Final result of a strategy run
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// Complete answer text; empty after a soft failure or blank response
    pub full_text: String,
    pub citations: Vec<Citation>,
    pub delivery: Delivery,
}

impl StrategyOutcome {
    fn empty(delivery: Delivery) -> Self {
        Self {
            full_text: String::new(),
            citations: Vec::new(),
            delivery,
        }
    }
}

/// Inputs of one strategy run
#[derive(Debug, Clone)]
pub struct StrategyRequest {
    pub model: String,
    pub system_prompt: String,
    /// Conversation ending with the user message to answer
    pub history: Vec<Message>,
    pub max_sentences: usize,
    pub strategy: GenerationStrategy,
}

/// Tunables shared by both strategies
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub first_sentence_temperature: f32,
    pub continuation_temperature: f32,
    pub first_sentence_attempts: u32,
    pub max_tokens: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::from(&TurnConfig::default())
    }
}

impl From<&TurnConfig> for StrategyConfig {
    fn from(config: &TurnConfig) -> Self {
        Self {
            first_sentence_temperature: config.first_sentence_temperature,
            continuation_temperature: config.continuation_temperature,
            first_sentence_attempts: config.first_sentence_attempts.max(1),
            max_tokens: config.max_tokens,
        }
    }
}

type EventSender = mpsc::UnboundedSender<StrategyEvent>;

/// Runs either strategy against the provider registry
#[derive(Debug, Clone)]
pub struct StrategyExecutor {
    registry: Arc<ProviderRegistry>,
    retry: RetryPolicy,
    splitter: SentenceSplitter,
    config: StrategyConfig,
}

impl StrategyExecutor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        retry: RetryPolicy,
        splitter: SentenceSplitter,
        config: StrategyConfig,
    ) -> Self {
        Self {
            registry,
            retry,
            splitter,
            config,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn splitter(&self) -> &SentenceSplitter {
        &self.splitter
    }

    /// Provider serving `model` and its remaining cooldown, if any
    pub fn cooldown_for(&self, model: &str) -> Option<(String, Duration)> {
        let provider = self.registry.route(model).provider;
        let remaining = self.retry.cooldowns().remaining(&provider)?;
        Some((provider, remaining))
    }

    /// Run one turn.
    ///
    /// Soft failures (rate limits, overload, cooldown) are reported as a
    /// notice and yield an empty outcome; hard failures are returned.
    pub async fn run(
        &self,
        request: StrategyRequest,
        events: EventSender,
    ) -> Result<StrategyOutcome, ProviderError> {
        tracing::debug!(
            model = %request.model,
            strategy = ?request.strategy,
            max_sentences = request.max_sentences,
            history = request.history.len(),
            "Running generation strategy"
        );

        match request.strategy {
            GenerationStrategy::Regular => self.run_regular(&request, &events).await,
            GenerationStrategy::FastFirst => self.run_fast_first(&request, &events).await,
        }
    }

    async fn run_regular(
        &self,
        request: &StrategyRequest,
        events: &EventSender,
    ) -> Result<StrategyOutcome, ProviderError> {
        let (provider, route) = self.registry.resolve(&request.model)?;
        if let Some(notice) = self.cooldown_notice(&route.provider) {
            let _ = events.send(StrategyEvent::Notice(notice));
            return Ok(StrategyOutcome::empty(Delivery::OneShot));
        }

        let messages = PromptBuilder::new()
            .system_prompt(&request.system_prompt, request.max_sentences)
            .with_history(&request.history)
            .build();
        let chat = ChatRequest::new(&route.model, messages)
            .with_temperature(self.config.continuation_temperature)
            .with_max_tokens(self.config.max_tokens);

        let provider = provider.as_ref();
        let (response, delivery) = if provider.supports_streaming() {
            let forwarded = AtomicUsize::new(0);
            match self.stream_with_retry(provider, &chat, events, &forwarded).await {
                Ok(response) if response.chunks > 0 => {
                    let chunks = response.chunks;
                    (response, Delivery::Streamed { chunks })
                }
                Ok(_) => {
                    tracing::warn!(
                        provider = provider.name(),
                        model = %chat.model,
                        "Stream produced no tokens, falling back to one-shot request"
                    );
                    match self.call_with_retry(provider, &chat).await {
                        Ok(response) => (response, Delivery::Fallback),
                        Err(err) => return self.soft_fail(err, events, Delivery::Fallback),
                    }
                }
                Err(err) => {
                    let chunks = forwarded.load(Ordering::SeqCst);
                    return self.soft_fail(err, events, Delivery::Interrupted { chunks });
                }
            }
        } else {
            match self.call_with_retry(provider, &chat).await {
                Ok(response) => (response, Delivery::OneShot),
                Err(err) => return self.soft_fail(err, events, Delivery::OneShot),
            }
        };

        let mut grounding = GroundingSet::new();
        grounding.extend(&response.grounding);

        if response.is_blank() {
            let _ = events.send(StrategyEvent::Notice(SystemNotice::empty_response(&chat.model)));
            return Ok(StrategyOutcome::empty(delivery));
        }

        if !matches!(delivery, Delivery::Streamed { .. }) {
            let mut sentences = self.splitter.split(&response.text).into_iter();
            if let Some(first) = sentences.next() {
                let _ = events.send(StrategyEvent::FirstSentence(first));
            }
            let rest: Vec<String> = sentences.collect();
            if !rest.is_empty() {
                let _ = events.send(StrategyEvent::Remaining(rest));
            }
        }

        Ok(StrategyOutcome {
            full_text: normalize(&response.text),
            citations: grounding.citations(),
            delivery,
        })
    }

    async fn run_fast_first(
        &self,
        request: &StrategyRequest,
        events: &EventSender,
    ) -> Result<StrategyOutcome, ProviderError> {
        let budget = request.max_sentences.max(1);
        let mut grounding = GroundingSet::new();

        // Phase 1: opening sentence from the fast sibling model
        let fast_model = models::fast_variant(&request.model);
        let (fast_provider, fast_route) = self.registry.resolve(&fast_model)?;
        if let Some(notice) = self.cooldown_notice(&fast_route.provider) {
            let _ = events.send(StrategyEvent::Notice(notice));
            return Ok(StrategyOutcome::empty(Delivery::OneShot));
        }

        let messages = PromptBuilder::new()
            .system_prompt(&request.system_prompt, budget)
            .first_sentence_instruction()
            .with_history(&request.history)
            .build();
        let chat = ChatRequest::new(&fast_route.model, messages)
            .with_temperature(self.config.first_sentence_temperature)
            .with_max_tokens(self.config.max_tokens);

        let mut first: Option<String> = None;
        for attempt in 1..=self.config.first_sentence_attempts {
            let response = match self.call_with_retry(fast_provider.as_ref(), &chat).await {
                Ok(response) => response,
                Err(err) => return self.soft_fail(err, events, Delivery::OneShot),
            };
            grounding.extend(&response.grounding);

            let reply = parse_first_sentence_reply(&response.text);
            if reply.is_empty() {
                tracing::debug!(model = %chat.model, attempt, "Blank first sentence");
                continue;
            }
            let (sentence, _) = self.splitter.extract_first(&reply);
            first = Some(sentence);
            break;
        }

        if let Some(sentence) = &first {
            let _ = events.send(StrategyEvent::FirstSentence(sentence.clone()));
            if budget == 1 {
                return Ok(StrategyOutcome {
                    full_text: sentence.clone(),
                    citations: grounding.citations(),
                    delivery: Delivery::OneShot,
                });
            }
        } else {
            tracing::info!(model = %fast_model, "No first sentence, continuing with a full answer");
        }

        // Phase 2: the requested model continues (or answers in full)
        let first_text = first.clone().unwrap_or_default();
        let done = |grounding: &GroundingSet| StrategyOutcome {
            full_text: first_text.clone(),
            citations: grounding.citations(),
            delivery: Delivery::OneShot,
        };

        let (provider, route) = self.registry.resolve(&request.model)?;
        if let Some(notice) = self.cooldown_notice(&route.provider) {
            let _ = events.send(StrategyEvent::Notice(notice));
            return Ok(done(&grounding));
        }

        let remaining = if first.is_some() { budget - 1 } else { budget };
        let builder = PromptBuilder::new().system_prompt(&request.system_prompt, budget);
        let messages = match &first {
            Some(sentence) => builder
                .continuation_instruction(remaining)
                .with_history(&request.history)
                .with_assistant(sentence)
                .build(),
            None => builder.with_history(&request.history).build(),
        };
        let chat = ChatRequest::new(&route.model, messages)
            .with_temperature(self.config.continuation_temperature)
            .with_max_tokens(self.config.max_tokens);

        let response = match self.call_with_retry(provider.as_ref(), &chat).await {
            Ok(response) => response,
            Err(err) if err.kind.is_soft() => {
                tracing::warn!(error = %err, "Continuation failed softly");
                let _ = events.send(StrategyEvent::Notice(SystemNotice::from_error(&err)));
                return Ok(done(&grounding));
            }
            Err(err) => return Err(err),
        };
        grounding.extend(&response.grounding);

        let mut sentences = self.splitter.split(&response.text);
        if let (Some(sentence), Some(leading)) = (&first, sentences.first()) {
            if same_sentence(sentence, leading) {
                sentences.remove(0);
            }
        }
        sentences.truncate(remaining);

        if !sentences.is_empty() {
            let _ = events.send(StrategyEvent::Remaining(sentences.clone()));
        }

        let full_text = first.into_iter().chain(sentences).collect::<Vec<_>>().join(" ");
        if full_text.is_empty() {
            let _ = events.send(StrategyEvent::Notice(SystemNotice::empty_response(&chat.model)));
        }

        Ok(StrategyOutcome {
            full_text,
            citations: grounding.citations(),
            delivery: Delivery::OneShot,
        })
    }

    fn cooldown_notice(&self, provider: &str) -> Option<SystemNotice> {
        let remaining = self.retry.cooldowns().remaining(provider)?;
        tracing::info!(provider, remaining_ms = remaining.as_millis() as u64, "Skipping request during cooldown");
        Some(SystemNotice::cooling_down(provider, remaining))
    }

    /// Report a soft failure as a notice, propagate anything else
    fn soft_fail(
        &self,
        err: ProviderError,
        events: &EventSender,
        delivery: Delivery,
    ) -> Result<StrategyOutcome, ProviderError> {
        if !err.kind.is_soft() {
            return Err(err);
        }
        tracing::warn!(error = %err, "Provider failed softly");
        let _ = events.send(StrategyEvent::Notice(SystemNotice::from_error(&err)));
        Ok(StrategyOutcome::empty(delivery))
    }

    async fn call_with_retry(
        &self,
        provider: &dyn ChatProvider,
        chat: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        self.retry.execute(move |_| provider.call(chat)).await
    }

    /// Stream with retries, unless deltas were already forwarded
    async fn stream_with_retry(
        &self,
        provider: &dyn ChatProvider,
        chat: &ChatRequest,
        events: &EventSender,
        delivered: &AtomicUsize,
    ) -> Result<ChatResponse, ProviderError> {
        self.retry
            .execute_if(
                move |_| stream_once(provider, chat, events, delivered),
                move |_| delivered.load(Ordering::SeqCst) == 0,
            )
            .await
    }
}

/// One streaming attempt, forwarding deltas as `StrategyEvent::Delta`
async fn stream_once(
    provider: &dyn ChatProvider,
    chat: &ChatRequest,
    events: &EventSender,
    delivered: &AtomicUsize,
) -> Result<ChatResponse, ProviderError> {
    let (tx, mut rx) = mpsc::channel::<String>(DELTA_BUFFER);

    let forward = async {
        while let Some(delta) = rx.recv().await {
            delivered.fetch_add(1, Ordering::SeqCst);
            if events.send(StrategyEvent::Delta(delta)).is_err() {
                break;
            }
        }
    };

    let (result, ()) = tokio::join!(provider.stream_call(chat, tx), forward);
    result
}

fn same_sentence(a: &str, b: &str) -> bool {
    let clean = |s: &str| {
        normalize(s)
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_lowercase()
    };
    clean(a) == clean(b)
}
