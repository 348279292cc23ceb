//! Text pipeline for the voice turn engine
//!
//! This crate provides the pure processing stages between the model and
//! the speech sink:
//! - Sentence splitting for finished responses
//! - Incremental sentence detection for streamed responses
//! - Barge-in / preemption decision rules

pub mod processors;

pub use processors::{
    normalize, BargeInAction, InterruptHandler, SentenceDetector, SentenceSplitter,
    TranscriptAction, DEFAULT_MIN_SENTENCE_CHARS,
};
