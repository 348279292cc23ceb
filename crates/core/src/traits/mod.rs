//! Collaborator traits
//!
//! The turn engine depends on three external collaborators, each behind
//! a trait so the surrounding application (or a test) can plug in its own:
//!
//! ```text
//!   SpeechCapture: microphone + VAD + STT, delivers SpeechSignal values
//!   SpeechSink:    text-to-speech playback
//!   ConfigProvider: read-only credentials and preferences
//! ```

mod config;
mod speech;

pub use config::ConfigProvider;
pub use speech::{SpeechCapture, SpeechSignal, SpeechSink, Transcript, TIMEOUT_SENTINEL};
