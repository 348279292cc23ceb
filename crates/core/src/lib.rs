//! Core traits and types for the voice turn engine
//!
//! This crate provides foundational types used across all other crates:
//! - Chat messages and the bounded conversation history
//! - Grounding sources attached to a response
//! - Collaborator traits (speech capture, speech sink, config provider)
//! - Error types

pub mod conversation;
pub mod error;
pub mod llm_types;
pub mod traits;

pub use conversation::History;
pub use error::{Error, Result};
pub use llm_types::{GroundingSource, Message, Role};

pub use traits::{
    // Speech
    SpeechCapture, SpeechSignal, SpeechSink, Transcript, TIMEOUT_SENTINEL,
    // Config
    ConfigProvider,
};
