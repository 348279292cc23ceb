//! Configuration management for the voice turn engine
//!
//! Supports loading configuration from:
//! - TOML/YAML/JSON files (`config/default`, `config/{env}`)
//! - Environment variables (VOICE_TURN_ prefix, `__` separator)
//!
//! `Settings` also implements the core `ConfigProvider` trait, so the
//! engine reads credentials and preferences through one boundary.

pub mod provider;
pub mod settings;
pub mod turn;

pub use provider::{ProviderEntry, ProvidersConfig, RetrySettings};
pub use settings::{load_settings, ObservabilityConfig, Settings};
pub use turn::{NoisePolicy, SessionConfig, TurnConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voice_turn_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_turn_core::Error::Config(err.to_string())
    }
}
