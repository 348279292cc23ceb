//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use voice_turn_core::ConfigProvider;

use crate::turn::{MAX_SENTENCES, MIN_SENTENCES};
use crate::{ConfigError, ProvidersConfig, RetrySettings, SessionConfig, TurnConfig};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Turn generation
    #[serde(default)]
    pub turn: TurnConfig,

    /// Listening session and barge-in
    #[serde(default)]
    pub session: SessionConfig,

    /// Provider endpoints and credentials
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Retry and cooldown
    #[serde(default)]
    pub retry: RetrySettings,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_turn()?;
        self.validate_retry()?;
        Ok(())
    }

    fn validate_turn(&self) -> Result<(), ConfigError> {
        let turn = &self.turn;

        if !(MIN_SENTENCES..=MAX_SENTENCES).contains(&turn.max_sentences) {
            return Err(ConfigError::InvalidValue {
                field: "turn.max_sentences".to_string(),
                message: format!(
                    "Must be between {} and {}, got {}",
                    MIN_SENTENCES, MAX_SENTENCES, turn.max_sentences
                ),
            });
        }

        if turn.max_history_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "turn.max_history_turns".to_string(),
                message: "Must keep at least one turn".to_string(),
            });
        }

        if turn.default_model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "turn.default_model".to_string(),
                message: "Model id must not be empty".to_string(),
            });
        }

        for (field, value) in [
            ("turn.first_sentence_temperature", turn.first_sentence_temperature),
            ("turn.continuation_temperature", turn.continuation_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 2.0, got {}", value),
                });
            }
        }

        Ok(())
    }

    fn validate_retry(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;

        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "At least one attempt is required".to_string(),
            });
        }

        if retry.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_factor".to_string(),
                message: format!("Must be at least 1.0, got {}", retry.backoff_factor),
            });
        }

        if retry.max_delay_ms == 0 || retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_delay_ms".to_string(),
                message: format!(
                    "Must be positive and not below initial_delay_ms ({})",
                    retry.initial_delay_ms
                ),
            });
        }

        Ok(())
    }
}

impl ConfigProvider for Settings {
    fn api_key(&self, provider: &str) -> Option<String> {
        self.providers
            .entry(provider)
            .and_then(|entry| entry.api_key.clone())
            .or_else(|| {
                ProvidersConfig::key_env_var(provider).and_then(|var| std::env::var(var).ok())
            })
            .filter(|key| !key.trim().is_empty())
    }

    fn system_prompt(&self) -> String {
        self.turn.system_prompt.clone()
    }

    fn sentence_budget(&self) -> usize {
        TurnConfig::clamp_sentences(self.turn.max_sentences)
    }

    fn faster_first(&self) -> bool {
        self.turn.faster_first
    }
}

/// Load settings from `config/` and the environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from a config directory.
///
/// Priority: env vars > `{dir}/{env}` > `{dir}/default` > defaults
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = dir.join("default");
    builder = builder.add_source(File::with_name(&default_path.to_string_lossy()).required(false));

    if let Some(env_name) = env {
        let env_path = dir.join(env_name);
        builder = builder.add_source(File::with_name(&env_path.to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_TURN")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        dir = %dir.display(),
        env = env.unwrap_or("default"),
        "Settings loaded"
    );

    Ok(settings)
}
