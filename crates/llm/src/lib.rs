//! LLM provider clients and generation strategies
//!
//! Features:
//! - OpenAI-compatible and Anthropic clients behind one `ChatProvider` trait
//! - SSE stream decoding
//! - Retry with backoff and per-provider cooldowns
//! - Regular and fast-first generation strategies
//! - Model routing, downgrade tables and grounding merge

pub mod backend;
pub mod claude;
pub mod error;
pub mod factory;
pub mod grounding;
pub mod models;
pub mod prompt;
pub mod retry;
pub mod strategy;
pub mod streaming;

pub use backend::{ChatProvider, ChatRequest, ChatResponse, FinishReason, OpenAIBackend, OpenAIConfig};
pub use claude::{ClaudeBackend, ClaudeConfig};
pub use error::{ErrorKind, ProviderError};
pub use factory::{LlmFactory, LlmProvider, ProviderRegistry};
pub use grounding::{Citation, GroundingSet, MAX_SOURCES};
pub use models::{fast_variant, route, ModelRoute};
pub use prompt::{parse_first_sentence_reply, PromptBuilder};
pub use retry::{CooldownRegistry, RetryConfig, RetryPolicy};
pub use strategy::{
    Delivery, GenerationStrategy, NoticeKind, StrategyConfig, StrategyEvent, StrategyExecutor,
    StrategyOutcome, StrategyRequest, SystemNotice,
};
pub use streaming::{SseDecoder, SseEvent, SseReader};

impl From<ProviderError> for voice_turn_core::Error {
    fn from(err: ProviderError) -> Self {
        voice_turn_core::Error::Llm(err.to_string())
    }
}
