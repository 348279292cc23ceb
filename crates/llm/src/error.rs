//! Normalized provider errors
//!
//! Every client maps HTTP failures, transport failures and in-stream error
//! events into one `ProviderError` shape. Callers only look at `kind`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum characters of a response body kept for diagnostics
pub const BODY_SNIPPET_CHARS: usize = 300;

static RETRY_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:retry|try again)\s+(?:in|after)\s+(\d+(?:\.\d+)?)\s*(ms|s|sec|secs|seconds?)?\b")
        .expect("valid retry phrase regex")
});

static RETRY_DELAY_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#).expect("valid retryDelay regex")
});

/// Error classes the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing credentials
    Auth,
    /// Unknown model or endpoint
    NotFound,
    /// Request rejected as malformed
    BadRequest,
    /// 429
    RateLimited,
    /// 503/529 or an "overloaded" message
    Overloaded,
    /// Transport failure or unexpected 5xx
    Network,
    Timeout,
    /// Body could not be understood
    InvalidResponse,
    /// Client could not be built
    Configuration,
}

impl ErrorKind {
    /// Classify an HTTP status, looking at the body for overload hints
    pub fn from_status(status: u16, body: &str) -> Self {
        let overloaded = body.to_lowercase().contains("overloaded");
        match status {
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::Timeout,
            503 | 529 => ErrorKind::Overloaded,
            500..=599 if overloaded => ErrorKind::Overloaded,
            500..=599 => ErrorKind::Network,
            _ => ErrorKind::BadRequest,
        }
    }

    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Overloaded | ErrorKind::Network | ErrorKind::Timeout
        )
    }

    /// Reported as a notice instead of an error once retries are exhausted
    pub fn is_soft(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Overloaded)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::Auth => "authentication failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::BadRequest => "bad request",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Network => "network error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidResponse => "invalid response",
            ErrorKind::Configuration => "configuration error",
        };
        f.write_str(text)
    }
}

/// Provider failure in normalized form
#[derive(Error, Debug, Clone)]
#[error("{provider} {kind} ({model}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ErrorKind,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Machine-readable code from the error body
    pub code: Option<String>,
    pub model: String,
    pub message: String,
    /// How long the provider asked us to wait
    pub retry_after: Option<Duration>,
    pub body_snippet: String,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            status: None,
            code: None,
            model: model.into(),
            message: message.into(),
            retry_after: None,
            body_snippet: String::new(),
        }
    }

    /// Build from a non-success HTTP response
    pub fn from_http(
        provider: &str,
        model: &str,
        status: u16,
        retry_after_header: Option<&str>,
        body: &str,
    ) -> Self {
        let (message, code) = parse_error_body(body);
        let kind = match code.as_deref() {
            Some(c) if c.contains("overloaded") => ErrorKind::Overloaded,
            _ => ErrorKind::from_status(status, body),
        };

        Self {
            provider: provider.to_string(),
            kind,
            status: Some(status),
            code,
            model: model.to_string(),
            message: message.unwrap_or_else(|| format!("HTTP {}", status)),
            retry_after: parse_retry_hint(retry_after_header, body),
            body_snippet: snippet(body),
        }
    }

    /// Build from an error event inside an otherwise successful stream
    pub fn from_stream_event(provider: &str, model: &str, code: Option<&str>, message: &str) -> Self {
        let lowered = format!("{} {}", code.unwrap_or(""), message).to_lowercase();
        let kind = if lowered.contains("overloaded") {
            ErrorKind::Overloaded
        } else if lowered.contains("rate_limit") || lowered.contains("rate limit") {
            ErrorKind::RateLimited
        } else {
            ErrorKind::InvalidResponse
        };

        Self {
            code: code.map(str::to_string),
            retry_after: parse_retry_hint(None, message),
            body_snippet: snippet(message),
            ..Self::new(provider, model, kind, message)
        }
    }

    /// Build from a transport error
    pub fn from_reqwest(provider: &str, model: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Network
        };
        Self {
            status: err.status().map(|s| s.as_u16()),
            ..Self::new(provider, model, kind, err.to_string())
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Short user-facing description including the retry hint
    pub fn notice_text(&self) -> String {
        let mut text = format!("{} is {} for {}", self.provider, self.kind, self.model);
        if let Some(wait) = self.retry_after {
            text.push_str(&format!("; retry in {}s", wait.as_secs().max(1)));
        }
        text
    }
}

/// Extract a retry hint from a `Retry-After` header or the error body
pub fn parse_retry_hint(header: Option<&str>, body: &str) -> Option<Duration> {
    if let Some(secs) = header.and_then(|h| h.trim().parse::<f64>().ok()) {
        if secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
    }

    if let Some(caps) = RETRY_DELAY_FIELD.captures(body) {
        if let Ok(secs) = caps[1].parse::<f64>() {
            return Some(Duration::from_secs_f64(secs));
        }
    }

    let caps = RETRY_PHRASE.captures(body)?;
    let value: f64 = caps[1].parse().ok()?;
    match caps.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(unit) if unit == "ms" => Some(Duration::from_millis(value as u64)),
        _ => Some(Duration::from_secs_f64(value)),
    }
}

/// Pull `(message, code)` out of the common error body shapes
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };

    let error = value.get("error").unwrap_or(&value);
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string);

    let code = ["code", "type", "status"]
        .iter()
        .filter_map(|key| error.get(*key))
        .find_map(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

    (message, code)
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(401, ""), ErrorKind::Auth);
        assert_eq!(ErrorKind::from_status(404, ""), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_status(400, ""), ErrorKind::BadRequest);
        assert_eq!(ErrorKind::from_status(429, ""), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(503, ""), ErrorKind::Overloaded);
        assert_eq!(ErrorKind::from_status(500, "The server is overloaded"), ErrorKind::Overloaded);
        assert_eq!(ErrorKind::from_status(502, "bad gateway"), ErrorKind::Network);
    }

    #[test]
    fn test_openai_rate_limit_body() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 7.5s.","type":"requests","code":"rate_limit_exceeded"}}"#;
        let err = ProviderError::from_http("openai", "gpt-4o", 429, None, body);

        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(err.retry_after, Some(Duration::from_millis(7500)));
        assert!(err.message.starts_with("Rate limit reached"));
    }

    #[test]
    fn test_anthropic_overloaded_body() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = ProviderError::from_http("anthropic", "claude-sonnet-4-20250514", 529, None, body);
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert!(err.kind.is_soft());
        assert!(err.kind.is_transient());
    }

    #[test]
    fn test_retry_after_header_wins() {
        let err = ProviderError::from_http("groq", "llama-3.3-70b-versatile", 429, Some("12"), "{}");
        assert_eq!(err.retry_after, Some(Duration::from_secs(12)));
        assert_eq!(err.message, "HTTP 429");
    }

    #[test]
    fn test_gemini_retry_delay() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED","details":[{"retryDelay":"21s"}]}}"#;
        assert_eq!(parse_retry_hint(None, body), Some(Duration::from_secs(21)));
        let err = ProviderError::from_http("gemini", "gemini-2.5-pro", 429, None, body);
        assert_eq!(err.code.as_deref(), Some("429"));
    }

    #[test]
    fn test_retry_phrase_units() {
        assert_eq!(
            parse_retry_hint(None, "Please retry in 250ms"),
            Some(Duration::from_millis(250))
        );
        assert_eq!(parse_retry_hint(None, "retry after 3 seconds"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_hint(None, "no hint here"), None);
    }

    #[test]
    fn test_auth_is_hard() {
        let err = ProviderError::from_http("openai", "gpt-4o", 401, None, "Unauthorized");
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!err.kind.is_soft());
        assert!(!err.kind.is_transient());
        assert_eq!(err.body_snippet, "Unauthorized");
    }

    #[test]
    fn test_stream_event_classification() {
        let err = ProviderError::from_stream_event("anthropic", "claude", Some("overloaded_error"), "Overloaded");
        assert_eq!(err.kind, ErrorKind::Overloaded);
    }

    #[test]
    fn test_notice_text() {
        let err = ProviderError::new("openai", "gpt-4o", ErrorKind::RateLimited, "slow down")
            .with_retry_after(Duration::from_secs(20));
        assert_eq!(err.notice_text(), "openai is rate limited for gpt-4o; retry in 20s");
    }
}
