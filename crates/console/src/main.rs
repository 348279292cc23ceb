//! Voice turn console
//!
//! Talks to the configured LLM providers from a terminal: typed lines stand
//! in for recognized speech, printed lines for speech playback.

mod console;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_turn_agent::{TurnEngine, TurnEvent, VoiceSession, VoiceSessionEvent};
use voice_turn_config::{load_settings, Settings};
use voice_turn_llm::{LlmFactory, RetryConfig, RetryPolicy, StrategyConfig, StrategyExecutor};
use voice_turn_pipeline::SentenceSplitter;

use crate::console::{PrintSink, StdinCapture};

/// Simulated speaking time per word
const SPEECH_PACE: Duration = Duration::from_millis(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("VOICE_TURN_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!("Starting voice-turn v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config_env = env.as_deref().unwrap_or("default"),
        model = %settings.turn.default_model,
        faster_first = settings.turn.faster_first,
        "Configuration loaded"
    );

    let registry = LlmFactory::registry_from_settings(&settings)?;
    if registry.names().is_empty() {
        tracing::warn!("No provider has an API key; every turn will fail with an auth error");
    }

    let executor = StrategyExecutor::new(
        Arc::new(registry),
        RetryPolicy::new(RetryConfig::from(&settings.retry)),
        SentenceSplitter::new(settings.turn.min_sentence_chars),
        StrategyConfig::from(&settings.turn),
    );
    let (engine, turn_events) = TurnEngine::new(executor, &settings.turn);
    let engine = Arc::new(engine.with_preferences(&settings));

    let (capture, signals) = StdinCapture::spawn();
    let sink = PrintSink::new().with_pace(SPEECH_PACE);
    let session = VoiceSession::new(
        engine,
        settings.session.clone(),
        Arc::new(sink),
        Arc::new(capture),
    )
    .with_model(settings.turn.default_model.clone());

    let printer = tokio::spawn(print_events(session.subscribe()));

    eprintln!("Type a question and press enter. /barge interrupts, /quit ends the session.");
    let reason = session.run(signals, turn_events).await?;
    tracing::info!(reason = ?reason, "Session ended");

    drop(session);
    let _ = printer.await;
    Ok(())
}

/// Show notices, errors and sources next to the spoken text
async fn print_events(mut events: broadcast::Receiver<VoiceSessionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Console fell behind session events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            VoiceSessionEvent::Turn(TurnEvent::System { notice, .. }) => {
                eprintln!("[{:?}] {}", notice.kind, notice);
            }
            VoiceSessionEvent::Turn(TurnEvent::FinalResponse { grounding, .. })
                if !grounding.is_empty() =>
            {
                let sources: Vec<String> = grounding
                    .iter()
                    .map(|c| format!("{} ({})", c.label, c.url))
                    .collect();
                eprintln!("Sources: {}", sources.join(", "));
            }
            VoiceSessionEvent::Error(message) => eprintln!("[error] {}", message),
            VoiceSessionEvent::Preempted { text } => {
                eprintln!("(holding \"{}\" until you finish)", text);
            }
            VoiceSessionEvent::BargedIn => eprintln!("(interrupted)"),
            VoiceSessionEvent::Ended { reason } => {
                eprintln!("Session ended: {:?}", reason);
                break;
            }
            _ => {}
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("voice_turn={}", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}
