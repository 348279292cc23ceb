//! Speech capture and playback boundaries

use async_trait::async_trait;

use crate::Result;

/// Raw transcript value that marks a listening-session timeout
pub const TIMEOUT_SENTINEL: &str = "<timeout>";

/// Final transcript delivered by speech capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    /// Recognized speech
    Text(String),
    /// Capture finished without recognizable speech
    Empty,
    /// The listening session timed out
    Timeout,
}

impl Transcript {
    /// Interpret a raw recognizer result
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == TIMEOUT_SENTINEL {
            Transcript::Timeout
        } else if trimmed.is_empty() {
            Transcript::Empty
        } else {
            Transcript::Text(trimmed.to_string())
        }
    }
}

/// Signals produced by speech capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechSignal {
    /// Voice activity began
    SpeechStarted,
    /// Recognition finished
    FinalTranscript(Transcript),
}

/// Speech capture controls
///
/// Signals themselves arrive over a channel; this trait only covers the
/// calls flowing back to the capture side.
pub trait SpeechCapture: Send + Sync {
    /// Re-arm listening after noise
    fn reset(&self);

    /// End the listening session
    fn stop(&self);
}

/// Text-to-speech sink
#[async_trait]
pub trait SpeechSink: Send + Sync {
    /// Speak `text`, resolving when playback completes
    async fn speak(&self, text: &str) -> Result<()>;

    /// Stop playback immediately
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_from_raw() {
        assert_eq!(Transcript::from_raw("  "), Transcript::Empty);
        assert_eq!(Transcript::from_raw(TIMEOUT_SENTINEL), Transcript::Timeout);
        assert_eq!(
            Transcript::from_raw(" hello there "),
            Transcript::Text("hello there".to_string())
        );
    }
}
