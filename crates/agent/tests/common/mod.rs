//! Shared fixtures: a scripted chat provider, recording speech doubles and
//! engine construction

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use voice_turn_agent::{TurnEngine, TurnEvent};
use voice_turn_config::TurnConfig;
use voice_turn_core::{SpeechCapture, SpeechSink};
use voice_turn_llm::{
    ChatProvider, ChatRequest, ChatResponse, ErrorKind, FinishReason, ProviderError,
    ProviderRegistry, RetryConfig, RetryPolicy, StrategyConfig, StrategyExecutor,
};
use voice_turn_pipeline::SentenceSplitter;

pub enum Reply {
    Text(&'static str),
    Chunks(Vec<&'static str>),
    Fail(ErrorKind),
    /// Wait for `release`, then answer
    Hold(&'static str),
    /// Stream the chunks, then wait for `release`
    StreamThenHold(Vec<&'static str>),
    /// Stream the chunks, then fail
    StreamThenFail(Vec<&'static str>, ErrorKind),
}

pub struct ScriptedProvider {
    streaming: bool,
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub started: Mutex<Vec<Instant>>,
    calls: AtomicUsize,
    /// Notified when a held reply starts waiting
    pub entered: Notify,
    pub release: Notify,
}

impl ScriptedProvider {
    pub fn new(streaming: bool, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            streaming,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Last message of the `n`th request
    pub fn last_message(&self, n: usize) -> String {
        self.requests.lock()[n]
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn next(&self, request: &ChatRequest) -> Option<Reply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.started.lock().push(Instant::now());
        self.replies.lock().pop_front()
    }

    async fn hold(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

fn response(text: String, chunks: usize) -> ChatResponse {
    ChatResponse {
        text,
        grounding: Vec::new(),
        chunks,
        time_to_first_token_ms: 0,
        total_time_ms: 0,
        finish_reason: FinishReason::Stop,
    }
}

fn fail(kind: ErrorKind, request: &ChatRequest) -> ProviderError {
    ProviderError::new("openai", &request.model, kind, "scripted failure")
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn call(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.next(request) {
            Some(Reply::Text(text)) => Ok(response(text.to_string(), 0)),
            Some(Reply::Chunks(chunks)) | Some(Reply::StreamThenHold(chunks)) => {
                Ok(response(chunks.concat(), 0))
            }
            Some(Reply::Fail(kind)) | Some(Reply::StreamThenFail(_, kind)) => {
                Err(fail(kind, request))
            }
            Some(Reply::Hold(text)) => {
                self.hold().await;
                Ok(response(text.to_string(), 0))
            }
            None => Ok(response(String::new(), 0)),
        }
    }

    async fn stream_call(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse, ProviderError> {
        let (chunks, hold, failure) = match self.next(request) {
            Some(Reply::Text(text)) => (vec![text], false, None),
            Some(Reply::Chunks(chunks)) => (chunks, false, None),
            Some(Reply::StreamThenHold(chunks)) => (chunks, true, None),
            Some(Reply::StreamThenFail(chunks, kind)) => (chunks, false, Some(kind)),
            Some(Reply::Hold(text)) => {
                self.hold().await;
                (vec![text], false, None)
            }
            Some(Reply::Fail(kind)) => return Err(fail(kind, request)),
            None => (Vec::new(), false, None),
        };

        let mut sent = 0;
        for chunk in &chunks {
            if chunk.is_empty() {
                continue;
            }
            if tx.send(chunk.to_string()).await.is_err() {
                break;
            }
            sent += 1;
        }
        if hold {
            self.hold().await;
        }
        if let Some(kind) = failure {
            return Err(fail(kind, request));
        }
        Ok(response(chunks.concat(), sent))
    }
}

/// Turn settings without throttling
pub fn turn_config() -> TurnConfig {
    TurnConfig {
        min_request_interval_ms: 0,
        ..Default::default()
    }
}

/// Engine over `provider`, with the retry policy (and its cooldowns) it uses
pub fn build_engine(
    provider: &Arc<ScriptedProvider>,
    config: &TurnConfig,
) -> (TurnEngine, mpsc::UnboundedReceiver<TurnEvent>, RetryPolicy) {
    let registry = ProviderRegistry::new("openai").with_provider(provider.clone());
    let retry = RetryPolicy::new(RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        backoff_factor: 2.0,
        max_delay: Duration::from_millis(100),
        jitter: Duration::ZERO,
        default_cooldown: Duration::from_secs(30),
    });
    let executor = StrategyExecutor::new(
        Arc::new(registry),
        retry.clone(),
        SentenceSplitter::new(config.min_sentence_chars),
        StrategyConfig::from(config),
    );
    let (engine, events) = TurnEngine::new(executor, config);
    (engine, events, retry)
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> TurnEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a turn event")
        .expect("turn event channel closed")
}

/// Events up to and including the next `Finished`
pub async fn until_finished(rx: &mut mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, TurnEvent::Finished { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

pub async fn wait_entered(provider: &ScriptedProvider) {
    tokio::time::timeout(Duration::from_secs(5), provider.entered.notified())
        .await
        .expect("provider was never called");
}

/// Speech sink that records what it was asked to say
#[derive(Default)]
pub struct RecordingSink {
    pub spoken: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

#[async_trait]
impl SpeechSink for RecordingSink {
    async fn speak(&self, text: &str) -> voice_turn_core::Result<()> {
        self.spoken.lock().push(text.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Speech capture that counts control calls
#[derive(Default)]
pub struct CountingCapture {
    pub resets: AtomicUsize,
    pub stops: AtomicUsize,
}

impl SpeechCapture for CountingCapture {
    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
