//! Provider endpoints, credentials and retry settings

use serde::{Deserialize, Serialize};

/// Connection settings for one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Base URL of the API
    pub endpoint: String,

    /// API key; falls back to the provider's conventional environment variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Whether the provider should be registered at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ProviderEntry {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            enabled: true,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

fn default_true() -> bool {
    true
}

/// All supported providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_openai")]
    pub openai: ProviderEntry,

    #[serde(default = "default_anthropic")]
    pub anthropic: ProviderEntry,

    #[serde(default = "default_groq")]
    pub groq: ProviderEntry,

    #[serde(default = "default_gemini")]
    pub gemini: ProviderEntry,

    #[serde(default = "default_perplexity")]
    pub perplexity: ProviderEntry,

    /// Provider used for model ids no routing rule recognizes
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// HTTP request timeout (ms)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_openai() -> ProviderEntry {
    ProviderEntry::new("https://api.openai.com/v1")
}
fn default_anthropic() -> ProviderEntry {
    ProviderEntry::new("https://api.anthropic.com")
}
fn default_groq() -> ProviderEntry {
    ProviderEntry::new("https://api.groq.com/openai/v1")
}
fn default_gemini() -> ProviderEntry {
    ProviderEntry::new("https://generativelanguage.googleapis.com/v1beta/openai")
}
fn default_perplexity() -> ProviderEntry {
    ProviderEntry::new("https://api.perplexity.ai")
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_request_timeout() -> u64 {
    30_000
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: default_openai(),
            anthropic: default_anthropic(),
            groq: default_groq(),
            gemini: default_gemini(),
            perplexity: default_perplexity(),
            default_provider: default_provider(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ProvidersConfig {
    /// Look up a provider entry by id
    pub fn entry(&self, provider: &str) -> Option<&ProviderEntry> {
        match provider {
            "openai" => Some(&self.openai),
            "anthropic" => Some(&self.anthropic),
            "groq" => Some(&self.groq),
            "gemini" => Some(&self.gemini),
            "perplexity" => Some(&self.perplexity),
            _ => None,
        }
    }

    /// Ids of all known providers
    pub fn ids() -> &'static [&'static str] {
        &["openai", "anthropic", "groq", "gemini", "perplexity"]
    }

    /// Conventional environment variable holding a provider's key
    pub fn key_env_var(provider: &str) -> Option<&'static str> {
        match provider {
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "groq" => Some("GROQ_API_KEY"),
            "gemini" => Some("GEMINI_API_KEY"),
            "perplexity" => Some("PERPLEXITY_API_KEY"),
            _ => None,
        }
    }
}

/// Retry and cooldown settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (ms)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Multiplier applied per retry
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Ceiling for a single delay, jitter included (ms)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay (ms)
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,

    /// Cooldown applied after a 429 without a retry hint (ms)
    #[serde(default = "default_cooldown")]
    pub default_cooldown_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    8_000
}
fn default_jitter() -> u64 {
    250
}
fn default_cooldown() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay(),
            jitter_ms: default_jitter(),
            default_cooldown_ms: default_cooldown(),
        }
    }
}
