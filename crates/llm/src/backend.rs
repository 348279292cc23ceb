//! Chat provider capability and the OpenAI-compatible client
//!
//! `OpenAIBackend` speaks the `/chat/completions` dialect shared by OpenAI,
//! Groq, Gemini's compatibility endpoint, Perplexity and local servers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use voice_turn_core::{GroundingSource, Message, Role};

use crate::error::{ErrorKind, ProviderError};
use crate::streaming::{SseEvent, SseReader};

/// Provider-neutral chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model id as the provider knows it (no `provider/` prefix)
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    /// The receiver went away mid-stream
    Cancelled,
}

impl FinishReason {
    fn from_wire(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }
}

/// Completed chat response
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    /// Web sources attached by search-capable models
    pub grounding: Vec<GroundingSource>,
    /// Non-empty deltas delivered (0 for one-shot calls)
    pub chunks: usize,
    pub time_to_first_token_ms: u64,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    /// Whether the model produced any visible text
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A remote chat-completion backend
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id used for routing and cooldowns
    fn name(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Whether `model` grounds its answers in web search
    fn supports_web_search(&self, _model: &str) -> bool {
        false
    }

    /// One-shot request returning a single body
    async fn call(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Streaming request; every text delta is sent to `tx` as it arrives
    async fn stream_call(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Accumulates a response while it streams in
pub(crate) struct ResponseAccumulator {
    start: Instant,
    first_token: Option<Duration>,
    text: String,
    grounding: Vec<GroundingSource>,
    chunks: usize,
}

impl ResponseAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            start: Instant::now(),
            first_token: None,
            text: String::new(),
            grounding: Vec::new(),
            chunks: 0,
        }
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        if self.first_token.is_none() {
            self.first_token = Some(self.start.elapsed());
        }
        self.text.push_str(text);
        self.chunks += 1;
    }

    /// Append one-shot body text; not counted as a streamed chunk
    pub(crate) fn push_body(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub(crate) fn push_source(&mut self, source: GroundingSource) {
        if !self.grounding.iter().any(|s| s.url == source.url) {
            self.grounding.push(source);
        }
    }

    pub(crate) fn finish(self, finish_reason: FinishReason) -> ChatResponse {
        let total = self.start.elapsed();
        ChatResponse {
            text: self.text,
            grounding: self.grounding,
            chunks: self.chunks,
            time_to_first_token_ms: self.first_token.unwrap_or(total).as_millis() as u64,
            total_time_ms: total.as_millis() as u64,
            finish_reason,
        }
    }
}

/// Turn a non-success response into a `ProviderError`
pub(crate) async fn check_status(
    provider: &str,
    model: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    Err(ProviderError::from_http(
        provider,
        model,
        status.as_u16(),
        retry_after.as_deref(),
        &body,
    ))
}

pub(crate) fn build_client(provider: &str, timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder().timeout(timeout).build().map_err(|e| {
        ProviderError::new(
            provider,
            "",
            ErrorKind::Configuration,
            format!("Failed to create HTTP client: {}", e),
        )
    })
}

/// OpenAI-compatible endpoint configuration
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Provider id ("openai", "groq", ...)
    pub provider: String,
    /// Base URL; `/chat/completions` is appended
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client for OpenAI-compatible chat completion APIs
#[derive(Clone)]
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self, ProviderError> {
        let client = build_client(&config.provider, config.timeout)?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = OpenAIRequest {
            model: &request.model,
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        tracing::debug!(
            provider = %self.config.provider,
            model = %request.model,
            stream,
            messages = body.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.config.provider, &request.model, &e))?;

        check_status(&self.config.provider, &request.model, response).await
    }

    fn stream_error(&self, model: &str, error: OpenAIErrorBody) -> ProviderError {
        let code = error.code.as_ref().map(|c| match c {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        ProviderError::from_stream_event(
            &self.config.provider,
            model,
            code.as_deref().or(error.kind.as_deref()),
            &error.message,
        )
    }
}

#[async_trait]
impl ChatProvider for OpenAIBackend {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn supports_web_search(&self, model: &str) -> bool {
        self.config.provider == "perplexity" || model.contains("search")
    }

    async fn call(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut acc = ResponseAccumulator::new();
        let response = self.send(request, false).await?;

        let body: OpenAIResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                &self.config.provider,
                &request.model,
                ErrorKind::InvalidResponse,
                e.to_string(),
            )
        })?;

        if let Some(error) = body.error {
            return Err(self.stream_error(&request.model, error));
        }

        body.collect_sources(&mut acc);

        let mut finish = FinishReason::Stop;
        if let Some(choice) = body.choices.into_iter().next() {
            if let Some(message) = choice.message {
                message.collect_sources(&mut acc);
                if let Some(text) = message.content {
                    acc.push_body(&text);
                }
            }
            if let Some(reason) = choice.finish_reason {
                finish = FinishReason::from_wire(&reason);
            }
        }

        Ok(acc.finish(finish))
    }

    async fn stream_call(
        &self,
        request: &ChatRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<ChatResponse, ProviderError> {
        let mut acc = ResponseAccumulator::new();
        let response = self.send(request, true).await?;
        let mut reader = SseReader::new(Box::pin(response.bytes_stream()));
        let mut finish = FinishReason::Stop;

        loop {
            let event = reader
                .next_event()
                .await
                .map_err(|e| ProviderError::from_reqwest(&self.config.provider, &request.model, &e))?;

            let data = match event {
                Some(SseEvent::Data(data)) => data,
                Some(SseEvent::Done) | None => break,
            };

            let chunk: OpenAIResponse = match serde_json::from_str(&data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unparseable stream chunk");
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                return Err(self.stream_error(&request.model, error));
            }

            chunk.collect_sources(&mut acc);

            for choice in chunk.choices {
                if let Some(reason) = choice.finish_reason.as_deref() {
                    finish = FinishReason::from_wire(reason);
                }
                let Some(delta) = choice.delta else { continue };
                delta.collect_sources(&mut acc);

                let Some(text) = delta.content.filter(|t| !t.is_empty()) else {
                    continue;
                };
                acc.push_text(&text);
                if tx.send(text).await.is_err() {
                    return Ok(acc.finish(FinishReason::Cancelled));
                }
            }
        }

        Ok(acc.finish(finish))
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: Role,
    content: String,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// Shape shared by one-shot bodies and stream chunks
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    /// Perplexity: bare URL list
    #[serde(default)]
    citations: Vec<String>,
    /// Perplexity: titled results
    #[serde(default)]
    search_results: Vec<OpenAISearchResult>,
    error: Option<OpenAIErrorBody>,
}

impl OpenAIResponse {
    fn collect_sources(&self, acc: &mut ResponseAccumulator) {
        for result in &self.search_results {
            let source = GroundingSource::new(&result.url);
            acc.push_source(match &result.title {
                Some(title) => source.with_title(title),
                None => source,
            });
        }
        for url in &self.citations {
            acc.push_source(GroundingSource::new(url));
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    delta: Option<OpenAIContent>,
    message: Option<OpenAIContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIContent {
    content: Option<String>,
    #[serde(default)]
    annotations: Vec<OpenAIAnnotation>,
}

impl OpenAIContent {
    fn collect_sources(&self, acc: &mut ResponseAccumulator) {
        for annotation in &self.annotations {
            if annotation.kind != "url_citation" {
                continue;
            }
            if let Some(citation) = &annotation.url_citation {
                let source = GroundingSource::new(&citation.url);
                acc.push_source(match &citation.title {
                    Some(title) => source.with_title(title),
                    None => source,
                });
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIAnnotation {
    #[serde(rename = "type")]
    kind: String,
    url_citation: Option<OpenAIUrlCitation>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUrlCitation {
    url: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAISearchResult {
    url: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
    code: Option<serde_json::Value>,
    #[serde(rename = "type")]
    kind: Option<String>,
}
