//! Retry with backoff and per-provider rate-limit cooldowns

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;

use voice_turn_config::RetrySettings;

use crate::error::{ErrorKind, ProviderError};

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Ceiling for a single delay, jitter included
    pub max_delay: Duration,
    /// Upper bound of the random jitter added per delay
    pub jitter: Duration,
    /// Cooldown after a 429 without a retry hint
    pub default_cooldown: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            default_cooldown: Duration::from_millis(settings.default_cooldown_ms),
        }
    }
}

/// Providers that must not be called until a point in time
#[derive(Debug, Clone, Default)]
pub struct CooldownRegistry {
    until: Arc<DashMap<String, i64>>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `provider` for `duration` from now
    pub fn record(&self, provider: &str, duration: Duration) {
        let until = now_ms() + duration.as_millis() as i64;
        self.until
            .entry(provider.to_string())
            .and_modify(|t| *t = (*t).max(until))
            .or_insert(until);
        tracing::info!(provider, cooldown_ms = duration.as_millis() as u64, "Provider cooling down");
    }

    /// Time left before `provider` may be called again
    pub fn remaining(&self, provider: &str) -> Option<Duration> {
        self.remaining_at(provider, now_ms())
    }

    pub fn remaining_at(&self, provider: &str, now_ms: i64) -> Option<Duration> {
        let until = *self.until.get(provider)?;
        if until <= now_ms {
            self.until.remove_if(provider, |_, t| *t <= now_ms);
            return None;
        }
        Some(Duration::from_millis((until - now_ms) as u64))
    }

    pub fn clear(&self, provider: &str) {
        self.until.remove(provider);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Retries transient provider failures with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
    cooldowns: CooldownRegistry,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            cooldowns: CooldownRegistry::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    /// Run `action` until it succeeds, fails permanently or attempts run out.
    ///
    /// The action receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, action: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_if(action, |_| true).await
    }

    /// Like `execute`, but `may_retry` can veto a retry of a transient error
    pub async fn execute_if<T, F, Fut, P>(&self, mut action: F, mut may_retry: P) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
        P: FnMut(&ProviderError) -> bool,
    {
        let mut attempt = 1;
        loop {
            let err = match action(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = if err.kind.is_transient() && attempt < self.config.max_attempts {
                self.delay_for(attempt, &err)
            } else {
                None
            };
            let delay = delay.filter(|_| may_retry(&err));

            match delay {
                Some(delay) => {
                    tracing::warn!(
                        provider = %err.provider,
                        model = %err.model,
                        kind = %err.kind,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Provider request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    if err.kind == ErrorKind::RateLimited {
                        let cooldown = err.retry_after.unwrap_or(self.config.default_cooldown);
                        self.cooldowns.record(&err.provider, cooldown);
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Delay before retrying after `attempt` failed; `None` when the
    /// provider asked for a wait longer than the ceiling
    pub fn delay_for(&self, attempt: u32, err: &ProviderError) -> Option<Duration> {
        if let Some(hint) = err.retry_after {
            return (hint <= self.config.max_delay).then_some(hint);
        }
        Some(self.delay_for_attempt(attempt))
    }

    /// Exponential backoff with jitter, capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.config.initial_delay.as_millis() as f64 * self.config.backoff_factor.powi(exponent);

        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };

        let cap = self.config.max_delay.as_millis() as f64;
        Duration::from_millis((base.min(cap) as u64 + jitter).min(cap as u64))
    }
}
