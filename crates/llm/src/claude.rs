//! Anthropic Messages API client
//!
//! System messages are lifted out of the conversation into the top-level
//! `system` field. Streaming uses typed SSE events; an `error` event inside
//! an otherwise successful stream becomes a `ProviderError`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use voice_turn_core::{Message, Role};

use crate::backend::{
    build_client, check_status, ChatProvider, ChatRequest, ChatResponse, FinishReason,
    ResponseAccumulator,
};
use crate::error::{ErrorKind, ProviderError};
use crate::streaming::{SseEvent, SseReader};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
/// `max_tokens` is mandatory for this API
const DEFAULT_MAX_TOKENS: usize = 1024;

/// Configuration for the Claude backend
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    /// API endpoint (for testing or proxy)
    pub endpoint: String,
    pub timeout: Duration,
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Claude backend
pub struct ClaudeBackend {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::new(
                PROVIDER,
                "",
                ErrorKind::Auth,
                "ANTHROPIC_API_KEY not set. Set it via environment or config.",
            ));
        }

        let client = build_client(PROVIDER, config.timeout)?;
        Ok(Self { config, client })
    }

    fn build_request<'a>(&self, request: &'a ChatRequest, stream: bool) -> ClaudeRequest<'a> {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        ClaudeRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: convert_messages(&request.messages),
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            temperature: request.temperature.map(|t| t.clamp(0.0, 1.0)),
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let body = self.build_request(request, stream);

        tracing::debug!(
            model = %request.model,
            stream,
            messages = body.messages.len(),
            "Sending Claude messages request"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint.trim_end_matches('/')))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(PROVIDER, &request.model, &e))?;

        check_status(PROVIDER, &request.model, response).await
    }
}

#[async_trait]
impl ChatProvider for ClaudeBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn call(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut acc = ResponseAccumulator::new();
        let response = self.send(request, false).await?;

        let body: ClaudeApiResponse = response.json().await.map_err(|e| {
            ProviderError::new(PROVIDER, &request.model, ErrorKind::InvalidResponse, e.to_string())
        })?;

        let text: String = body
            .content
            .into_iter()
            .filter_map(|block| match block {
                ClaudeContentBlock::Text { text } => Some(text),
                ClaudeContentBlock::Other => None,
            })
            .collect();
        acc.push_body(&text);

        Ok(acc.finish(body.stop_reason.unwrap_or_default().into()))
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
                .map_err(|e| ProviderError::from_reqwest(PROVIDER, &request.model, &e))?;

            let data = match event {
                Some(SseEvent::Data(data)) => data,
                Some(SseEvent::Done) | None => break,
            };

            let event: ClaudeStreamEvent = match serde_json::from_str(&data) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unknown Claude stream event");
                    continue;
                }
            };

            match event {
                ClaudeStreamEvent::ContentBlockDelta {
                    delta: ClaudeDelta::TextDelta { text },
                } => {
                    if text.is_empty() {
                        continue;
                    }
                    acc.push_text(&text);
                    if tx.send(text).await.is_err() {
                        return Ok(acc.finish(FinishReason::Cancelled));
                    }
                }
                ClaudeStreamEvent::MessageDelta { delta } => {
                    if let Some(reason) = delta.stop_reason {
                        finish = reason.into();
                    }
                }
                ClaudeStreamEvent::MessageStop => break,
                ClaudeStreamEvent::Error { error } => {
                    return Err(ProviderError::from_stream_event(
                        PROVIDER,
                        &request.model,
                        Some(&error.kind),
                        &error.message,
                    ));
                }
                _ => {}
            }
        }

        Ok(acc.finish(finish))
    }
}

/// Non-system messages in Claude's format; consecutive same-role messages
/// are merged into one.
fn convert_messages(messages: &[Message]) -> Vec<ClaudeMessage> {
    let mut converted: Vec<ClaudeMessage> = Vec::new();
    for msg in messages.iter().filter(|m| m.role != Role::System) {
        match converted.last_mut() {
            Some(last) if last.role == msg.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&msg.content);
            }
            _ => converted.push(ClaudeMessage {
                role: msg.role,
                content: msg.content.clone(),
            }),
        }
    }
    converted
}

// =============================================================================
// Claude API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiResponse {
    content: Vec<ClaudeContentBlock>,
    stop_reason: Option<ClaudeStopReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum ClaudeStopReason {
    #[default]
    EndTurn,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

impl From<ClaudeStopReason> for FinishReason {
    fn from(reason: ClaudeStopReason) -> Self {
        match reason {
            ClaudeStopReason::MaxTokens => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeStreamEvent {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta { delta: ClaudeDelta },
    ContentBlockStop,
    MessageDelta { delta: ClaudeMessageDeltaBody },
    MessageStop,
    Ping,
    Error { error: ClaudeError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessageDeltaBody {
    stop_reason: Option<ClaudeStopReason>,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ClaudeBackend {
        ClaudeBackend::new(ClaudeConfig::new("test-key")).unwrap()
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let err = ClaudeBackend::new(ClaudeConfig::new(" ")).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[test]
    fn test_system_prompt_lifted() {
        let request = ChatRequest::new(
            "claude-sonnet-4-20250514",
            vec![
                Message::system("Speak plainly."),
                Message::user("Who was the 44th president?"),
                Message::assistant("Barack Obama."),
                Message::user("How long"),
                Message::user("did he serve?"),
            ],
        )
        .with_temperature(1.4);

        let body = backend().build_request(&request, true);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["system"], "Speak plainly.");
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(json["temperature"], 1.0);
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[2]["content"], "How long\n\ndid he serve?");
    }

    #[test]
    fn test_stream_events_parse() {
        let delta: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            ClaudeStreamEvent::ContentBlockDelta { delta: ClaudeDelta::TextDelta { ref text } } if text == "Hi"
        ));

        let start: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":12}}}"#,
        )
        .unwrap();
        assert!(matches!(start, ClaudeStreamEvent::MessageStart));

        let error: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap();
        assert!(matches!(error, ClaudeStreamEvent::Error { ref error } if error.kind == "overloaded_error"));
    }

    #[test]
    fn test_response_body_parse() {
        let body: ClaudeApiResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello."},{"type":"tool_use","id":"t","name":"x","input":{}}],
                "stop_reason":"max_tokens","usage":{"input_tokens":1,"output_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(body.content.len(), 2);
        assert_eq!(FinishReason::from(body.stop_reason.unwrap()), FinishReason::Length);
    }
}
