//! Turn and listening-session configuration

use serde::{Deserialize, Serialize};

/// Smallest allowed sentence budget
pub const MIN_SENTENCES: usize = 1;
/// Largest allowed sentence budget
pub const MAX_SENTENCES: usize = 10;

/// Turn generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Model used when the caller does not pick one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// System prompt prepended to every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Sentence budget per turn (1..=10)
    #[serde(default = "default_max_sentences")]
    pub max_sentences: usize,

    /// Use the two-phase fast-first strategy
    #[serde(default)]
    pub faster_first: bool,

    /// Minimum gap between two provider requests (ms)
    #[serde(default = "default_min_request_interval")]
    pub min_request_interval_ms: u64,

    /// Complete turns kept in history
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Minimum characters before a sentence may be emitted
    #[serde(default = "default_min_sentence_chars")]
    pub min_sentence_chars: usize,

    /// Temperature of the fast first-sentence request
    #[serde(default = "default_first_temperature")]
    pub first_sentence_temperature: f32,

    /// Temperature of the continuation request
    #[serde(default = "default_continuation_temperature")]
    pub continuation_temperature: f32,

    /// Blank first-sentence responses tolerated before giving up on phase one
    #[serde(default = "default_first_sentence_attempts")]
    pub first_sentence_attempts: u32,

    /// Maximum tokens per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful voice assistant. Answer in plain spoken sentences without \
     markdown, lists or emoji."
        .to_string()
}
fn default_max_sentences() -> usize {
    5
}
fn default_min_request_interval() -> u64 {
    1200
}
fn default_max_history_turns() -> usize {
    10
}
fn default_min_sentence_chars() -> usize {
    20
}
fn default_first_temperature() -> f32 {
    0.2
}
fn default_continuation_temperature() -> f32 {
    0.7
}
fn default_first_sentence_attempts() -> u32 {
    2
}
fn default_max_tokens() -> usize {
    512
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            system_prompt: default_system_prompt(),
            max_sentences: default_max_sentences(),
            faster_first: false,
            min_request_interval_ms: default_min_request_interval(),
            max_history_turns: default_max_history_turns(),
            min_sentence_chars: default_min_sentence_chars(),
            first_sentence_temperature: default_first_temperature(),
            continuation_temperature: default_continuation_temperature(),
            first_sentence_attempts: default_first_sentence_attempts(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl TurnConfig {
    /// Clamp a requested sentence budget into the allowed range
    pub fn clamp_sentences(n: usize) -> usize {
        n.clamp(MIN_SENTENCES, MAX_SENTENCES)
    }
}

/// What to do with an empty transcript when no utterance is pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoisePolicy {
    /// Ignore the noise and keep the listening session alive
    #[default]
    ResumeListening,
    /// End the listening session and report that no speech was heard
    StopListening,
}

/// Listening-session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Handling of empty transcripts
    #[serde(default)]
    pub noise_policy: NoisePolicy,

    /// Stop speech and generation when the user talks over the assistant
    #[serde(default = "default_true")]
    pub barge_in_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            noise_policy: NoisePolicy::default(),
            barge_in_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_defaults() {
        let config = TurnConfig::default();
        assert_eq!(config.max_sentences, 5);
        assert!(!config.faster_first);
        assert_eq!(config.min_request_interval_ms, 1200);
        assert_eq!(config.first_sentence_temperature, 0.2);
    }

    #[test]
    fn test_clamp_sentences() {
        assert_eq!(TurnConfig::clamp_sentences(0), 1);
        assert_eq!(TurnConfig::clamp_sentences(4), 4);
        assert_eq!(TurnConfig::clamp_sentences(25), 10);
    }

    #[test]
    fn test_noise_policy_default() {
        assert_eq!(SessionConfig::default().noise_policy, NoisePolicy::ResumeListening);
    }
}
