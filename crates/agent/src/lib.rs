//! Turn engine and voice session
//!
//! Features:
//! - One active turn per engine with synchronous abort
//! - Incremental sentence emission under a sentence budget
//! - Request throttling and cooldown pre-checks
//! - Barge-in and preemption wiring between speech capture, engine and TTS

pub mod turn_engine;
pub mod voice_session;

pub use turn_engine::{TurnEngine, TurnError, TurnEvent, TurnId, TurnOutcome, TurnState};
pub use voice_session::{SessionEnd, VoiceSession, VoiceSessionEvent, VoiceSessionState};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No pending user message to answer")]
    NoPendingUser,

    #[error("Turn error: {0}")]
    Turn(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Speech error: {0}")]
    Speech(String),
}

impl From<voice_turn_llm::ProviderError> for AgentError {
    fn from(err: voice_turn_llm::ProviderError) -> Self {
        AgentError::Llm(err.to_string())
    }
}

impl From<voice_turn_core::Error> for AgentError {
    fn from(err: voice_turn_core::Error) -> Self {
        match err {
            voice_turn_core::Error::Speech(msg) => AgentError::Speech(msg),
            voice_turn_core::Error::Llm(msg) => AgentError::Llm(msg),
            other => AgentError::Turn(other.to_string()),
        }
    }
}

impl From<AgentError> for voice_turn_core::Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Llm(msg) => voice_turn_core::Error::Llm(msg),
            AgentError::Speech(msg) => voice_turn_core::Error::Speech(msg),
            other => voice_turn_core::Error::Turn(other.to_string()),
        }
    }
}
