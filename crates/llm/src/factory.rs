//! Provider factory and registry
//!
//! Builds one client per configured provider and resolves a model id to
//! the client that serves it.
//!
//! ## Example
//! ```ignore
//! let registry = LlmFactory::registry_from_settings(&settings)?;
//! let (provider, route) = registry.resolve("claude-sonnet-4-20250514")?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use voice_turn_config::{ProviderEntry, ProvidersConfig, Settings};
use voice_turn_core::ConfigProvider;

use crate::backend::{ChatProvider, OpenAIBackend, OpenAIConfig};
use crate::claude::{ClaudeBackend, ClaudeConfig};
use crate::error::{ErrorKind, ProviderError};
use crate::models::{self, ModelRoute};

/// Wire dialect of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions
    OpenAICompatible,
}

impl LlmProvider {
    pub fn for_id(id: &str) -> Self {
        match id {
            "anthropic" => LlmProvider::Anthropic,
            _ => LlmProvider::OpenAICompatible,
        }
    }
}

/// Providers available to the engine, keyed by id
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    default_provider: String,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider under its own name
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(id).cloned()
    }

    /// Registered provider ids, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Provider id and bare model id for `model`
    pub fn route(&self, model: &str) -> ModelRoute {
        models::route(model, &self.default_provider)
    }

    /// Client serving `model`; a provider without credentials is an auth error
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn ChatProvider>, ModelRoute), ProviderError> {
        let route = self.route(model);
        match self.get(&route.provider) {
            Some(provider) => Ok((provider, route)),
            None => Err(ProviderError::new(
                &route.provider,
                &route.model,
                ErrorKind::Auth,
                format!("No API key configured for provider '{}'", route.provider),
            )),
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

/// Creates provider clients from settings
pub struct LlmFactory;

impl LlmFactory {
    /// Create the client for one provider
    pub fn create(
        id: &str,
        entry: &ProviderEntry,
        api_key: String,
        timeout: Duration,
    ) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        match LlmProvider::for_id(id) {
            LlmProvider::Anthropic => {
                let config = ClaudeConfig::new(api_key)
                    .with_endpoint(&entry.endpoint)
                    .with_timeout(timeout);
                Ok(Arc::new(ClaudeBackend::new(config)?))
            }
            LlmProvider::OpenAICompatible => {
                let config = OpenAIConfig::new(id, &entry.endpoint, api_key).with_timeout(timeout);
                Ok(Arc::new(OpenAIBackend::new(config)?))
            }
        }
    }

    /// Register every enabled provider that has credentials
    pub fn registry_from_settings(settings: &Settings) -> Result<ProviderRegistry, ProviderError> {
        let providers = &settings.providers;
        let timeout = Duration::from_millis(providers.request_timeout_ms);
        let mut registry = ProviderRegistry::new(&providers.default_provider);

        for id in ProvidersConfig::ids() {
            let Some(entry) = providers.entry(id) else { continue };
            if !entry.enabled {
                tracing::debug!(provider = id, "Provider disabled");
                continue;
            }
            let Some(api_key) = settings.api_key(id) else {
                tracing::debug!(provider = id, "No API key, provider not registered");
                continue;
            };
            registry.register(Self::create(id, entry, api_key, timeout)?);
        }

        tracing::info!(providers = ?registry.names(), default = %registry.default_provider(), "Provider registry ready");
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_keys() -> Settings {
        let mut settings = Settings::default();
        settings.providers.openai.api_key = Some("sk-test".to_string());
        settings.providers.anthropic.api_key = Some("ant-test".to_string());
        settings.providers.groq.enabled = false;
        settings
    }

    #[test]
    fn test_registry_from_settings() {
        let registry = LlmFactory::registry_from_settings(&settings_with_keys()).unwrap();
        let names = registry.names();
        assert!(names.contains(&"openai".to_string()));
        assert!(names.contains(&"anthropic".to_string()));
        assert!(!names.contains(&"groq".to_string()));
    }

    #[test]
    fn test_resolve() {
        let registry = LlmFactory::registry_from_settings(&settings_with_keys()).unwrap();

        let (provider, route) = registry.resolve("sonnet").unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(route.model, "claude-sonnet-4-20250514");

        let err = registry.resolve("groq/llama-3.1-8b-instant").err().unwrap();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(err.provider, "groq");
    }

    #[test]
    fn test_dialect_by_id() {
        assert_eq!(LlmProvider::for_id("anthropic"), LlmProvider::Anthropic);
        assert_eq!(LlmProvider::for_id("perplexity"), LlmProvider::OpenAICompatible);
    }
}
