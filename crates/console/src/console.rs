//! Terminal stand-ins for speech capture and playback
//!
//! Each stdin line is one final transcript:
//! - an empty line is an empty transcript (noise, or replay of a preempted turn)
//! - `/barge` is speech starting
//! - `/quit` is a listening timeout

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voice_turn_core::{SpeechCapture, SpeechSignal, SpeechSink, Transcript};

/// Map one input line to a speech signal
pub fn parse_line(line: &str) -> SpeechSignal {
    match line.trim() {
        "/barge" => SpeechSignal::SpeechStarted,
        "/quit" => SpeechSignal::FinalTranscript(Transcript::Timeout),
        text => SpeechSignal::FinalTranscript(Transcript::from_raw(text)),
    }
}

/// Reads stdin on a plain thread and forwards signals
pub struct StdinCapture {
    stopped: Arc<AtomicBool>,
}

impl StdinCapture {
    /// Start reading stdin; signals arrive on the returned receiver
    pub fn spawn() -> (Self, mpsc::Receiver<SpeechSignal>) {
        let (tx, rx) = mpsc::channel(16);
        let stopped = Arc::new(AtomicBool::new(false));
        let reader_stopped = Arc::clone(&stopped);

        // A blocking stdin read must not hold up runtime shutdown
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if reader_stopped.load(Ordering::SeqCst) {
                    break;
                }
                if tx.blocking_send(parse_line(&line)).is_err() {
                    break;
                }
            }
            tracing::debug!("Stdin reader finished");
        });

        (Self { stopped }, rx)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl SpeechCapture for StdinCapture {
    fn reset(&self) {
        eprintln!("(nothing heard, still listening)");
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        tracing::debug!("Capture stopped");
    }
}

/// Prints sentences as they are "spoken"
pub struct PrintSink {
    /// Simulated speaking time per word
    pace: Duration,
}

impl PrintSink {
    pub fn new() -> Self {
        Self {
            pace: Duration::ZERO,
        }
    }

    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    pub fn speaking_time(&self, text: &str) -> Duration {
        self.pace * text.split_whitespace().count() as u32
    }
}

impl Default for PrintSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSink for PrintSink {
    async fn speak(&self, text: &str) -> voice_turn_core::Result<()> {
        println!("assistant: {}", text);
        let duration = self.speaking_time(text);
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }

    fn stop(&self) {
        println!("assistant: (stopped)");
    }
}
