//! Sentence detector for streaming LLM output
//!
//! Buffers raw deltas and carves complete sentences as soon as their
//! boundary is certain. The cursor marks how much of the buffer has
//! already been reported; it only moves forward.

use super::sentence_splitter::{boundary_end, collect_trimmed, SentenceSplitter};

/// Incremental sentence detector over a growing response buffer
#[derive(Debug, Default)]
pub struct SentenceDetector {
    splitter: SentenceSplitter,
    /// Everything received so far
    buffer: Vec<char>,
    /// Start of the text not yet reported as a sentence
    cursor: usize,
    /// Sentences reported so far
    emitted: usize,
}

impl SentenceDetector {
    /// Create a detector using the splitter's boundary rules
    pub fn new(splitter: SentenceSplitter) -> Self {
        Self {
            splitter,
            buffer: Vec::new(),
            cursor: 0,
            emitted: 0,
        }
    }

    /// Append a delta and return the sentences it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.extend(delta.chars());

        let mut sentences = Vec::new();
        let mut i = self.cursor;
        while i < self.buffer.len() {
            match boundary_end(&self.buffer, i, false) {
                Some(end) => {
                    let span = collect_trimmed(&self.buffer[self.cursor..end]);
                    if self.splitter.long_enough(&span) {
                        sentences.push(span);
                        self.cursor = end;
                    }
                    i = end;
                }
                None => i += 1,
            }
        }

        self.emitted += sentences.len();
        sentences
    }

    /// Flush the unreported tail at end of stream.
    ///
    /// The tail is split on its own. Sentences reported by `push` are
    /// already out, so a tail shorter than the minimum cannot merge back
    /// onto them the way `SentenceSplitter::split` merges a short remainder;
    /// it comes out as a short final sentence instead.
    pub fn finish(&mut self) -> Vec<String> {
        let tail: String = self.buffer[self.cursor..].iter().collect();
        self.cursor = self.buffer.len();

        let sentences = self.splitter.split(&tail);
        self.emitted += sentences.len();
        sentences
    }

    /// Everything received so far
    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    /// Current cursor position in characters
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of sentences reported since the last reset
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Reset state for a new turn
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.emitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(detector: &mut SentenceDetector, deltas: &[&str]) -> Vec<String> {
        deltas.iter().flat_map(|d| detector.push(d)).collect()
    }

    #[test]
    fn test_sentence_emitted_once_next_word_arrives() {
        let mut detector = SentenceDetector::default();

        assert!(detector.push("The train leaves at nine").is_empty());
        assert!(detector.push(" o'clock sharp.").is_empty());

        let sentences = detector.push(" Please");
        assert_eq!(sentences, vec!["The train leaves at nine o'clock sharp."]);

        assert!(detector.push(" arrive early.").is_empty());
        assert_eq!(detector.finish(), vec!["Please arrive early."]);
        assert_eq!(detector.emitted(), 2);
    }

    #[test]
    fn test_decimal_split_across_deltas() {
        let mut detector = SentenceDetector::default();
        let sentences = push_all(&mut detector, &["Pi is roughly 3.", "14159 and it never ends", "."]);
        assert!(sentences.is_empty());
        assert_eq!(detector.finish(), vec!["Pi is roughly 3.14159 and it never ends."]);
    }

    #[test]
    fn test_cursor_is_monotonic() {
        let mut detector = SentenceDetector::default();
        let mut last = 0;
        for delta in ["First sentence is long enough. ", "Second one ", "is also long enough. ", "Done"] {
            detector.push(delta);
            assert!(detector.cursor() >= last);
            last = detector.cursor();
        }
        assert_eq!(detector.emitted(), 2);
    }

    #[test]
    fn test_initials_split_across_deltas() {
        let mut detector = SentenceDetector::default();
        let sentences = push_all(
            &mut detector,
            &["The books were written by J. K", ". Rowling over many years. ", "She"],
        );
        assert_eq!(sentences, vec!["The books were written by J. K. Rowling over many years."]);
    }

    #[test]
    fn test_short_spans_wait_for_minimum() {
        let mut detector = SentenceDetector::default();
        let sentences = push_all(&mut detector, &["Yes. ", "No. ", "That is what I think about it. ", "Ok"]);
        assert_eq!(sentences, vec!["Yes. No. That is what I think about it."]);
        assert_eq!(detector.finish(), vec!["Ok"]);
    }

    #[test]
    fn test_reset() {
        let mut detector = SentenceDetector::default();
        detector.push("Some partial text");
        detector.reset();
        assert!(detector.text().is_empty());
        assert_eq!(detector.cursor(), 0);
        assert!(detector.finish().is_empty());
    }
}
