//! Text and signal processors
//!
//! - SentenceSplitter: splits finished text into speakable sentences
//! - SentenceDetector: carves sentences from a growing stream
//! - InterruptHandler: barge-in and preemption decisions

mod interrupt_handler;
mod sentence_detector;
mod sentence_splitter;

pub use interrupt_handler::{BargeInAction, InterruptHandler, TranscriptAction};
pub use sentence_detector::SentenceDetector;
pub use sentence_splitter::{normalize, SentenceSplitter, DEFAULT_MIN_SENTENCE_CHARS};
