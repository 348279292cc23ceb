//! Voice session coordination: preemption, barge-in, noise and timeout

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use voice_turn_agent::{
    AgentError, SessionEnd, TurnEvent, TurnOutcome, TurnState, VoiceSession, VoiceSessionEvent,
};
use voice_turn_config::{NoisePolicy, SessionConfig};
use voice_turn_core::{Role, SpeechSignal, Transcript};

use common::{build_engine, turn_config, wait_entered, CountingCapture, RecordingSink, Reply, ScriptedProvider};

struct Harness {
    session: Arc<VoiceSession>,
    signals: mpsc::Sender<SpeechSignal>,
    events: broadcast::Receiver<VoiceSessionEvent>,
    sink: Arc<RecordingSink>,
    capture: Arc<CountingCapture>,
    run: JoinHandle<Result<SessionEnd, AgentError>>,
}

fn start(provider: &Arc<ScriptedProvider>, config: SessionConfig) -> Harness {
    let (engine, turn_events, _) = build_engine(provider, &turn_config());
    let sink = Arc::new(RecordingSink::default());
    let capture = Arc::new(CountingCapture::default());
    let session = Arc::new(
        VoiceSession::new(Arc::new(engine), config, sink.clone(), capture.clone())
            .with_model("gpt-4o"),
    );
    let events = session.subscribe();

    let (signals, signal_rx) = mpsc::channel(16);
    let runner = Arc::clone(&session);
    let run = tokio::spawn(async move { runner.run(signal_rx, turn_events).await });

    Harness {
        session,
        signals,
        events,
        sink,
        capture,
        run,
    }
}

async fn say(harness: &Harness, raw: &str) {
    harness
        .signals
        .send(SpeechSignal::FinalTranscript(Transcript::from_raw(raw)))
        .await
        .unwrap();
}

async fn speech_started(harness: &Harness) {
    harness.signals.send(SpeechSignal::SpeechStarted).await.unwrap();
}

/// Wait for the first session event matching `pred`
async fn wait_for<F>(events: &mut broadcast::Receiver<VoiceSessionEvent>, pred: F) -> VoiceSessionEvent
where
    F: Fn(&VoiceSessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(err) => panic!("session events closed: {}", err),
            }
        }
    })
    .await
    .expect("timed out waiting for a session event")
}

fn finished(turn: u64, expected: TurnOutcome) -> impl Fn(&VoiceSessionEvent) -> bool {
    move |event| {
        matches!(event, VoiceSessionEvent::Turn(TurnEvent::Finished { turn_id, outcome })
            if *turn_id == turn && *outcome == expected)
    }
}

/// Send the timeout sentinel and wait for the session to return
async fn end(harness: &mut Harness) -> SessionEnd {
    say(harness, voice_turn_core::TIMEOUT_SENTINEL).await;
    finish(harness).await
}

async fn finish(harness: &mut Harness) -> SessionEnd {
    tokio::time::timeout(Duration::from_secs(5), &mut harness.run)
        .await
        .expect("session did not end")
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_preempted_turn_replays_on_empty_transcript() {
    let provider = ScriptedProvider::new(
        false,
        vec![
            Reply::Hold("Unused answer text here."),
            Reply::Text("Mount Everest is the tallest mountain on Earth."),
        ],
    );
    let mut harness = start(&provider, SessionConfig::default());

    say(&harness, "what is the tallest mountain").await;
    wait_entered(&provider).await;

    speech_started(&harness).await;
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, VoiceSessionEvent::Preempted { .. })
    })
    .await;
    match event {
        VoiceSessionEvent::Preempted { text } => assert_eq!(text, "what is the tallest mountain"),
        other => panic!("unexpected event {:?}", other),
    }

    say(&harness, "").await;
    wait_for(&mut harness.events, finished(2, TurnOutcome::Completed)).await;

    let reason = end(&mut harness).await;
    assert_eq!(reason, SessionEnd::Timeout);

    assert_eq!(provider.calls(), 2);
    assert_eq!(provider.last_message(1), "what is the tallest mountain");

    let history = harness.session.engine().history();
    let users: Vec<_> = history.iter().filter(|m| m.role == Role::User).collect();
    assert_eq!(users.len(), 1);
    assert_eq!(
        *harness.sink.spoken.lock(),
        vec!["Mount Everest is the tallest mountain on Earth.".to_string()]
    );
    assert!(harness.session.handler().candidate().is_none());
}

#[tokio::test]
async fn test_preempted_turn_merges_with_new_speech() {
    let provider = ScriptedProvider::new(
        false,
        vec![
            Reply::Hold("Unused answer text here."),
            Reply::Text("Your table for two at seven is booked."),
        ],
    );
    let mut harness = start(&provider, SessionConfig::default());

    say(&harness, "book a table").await;
    wait_entered(&provider).await;
    speech_started(&harness).await;
    wait_for(&mut harness.events, |e| {
        matches!(e, VoiceSessionEvent::Preempted { .. })
    })
    .await;

    say(&harness, "for two at seven").await;
    wait_for(&mut harness.events, finished(2, TurnOutcome::Completed)).await;

    end(&mut harness).await;
    assert_eq!(provider.last_message(1), "book a table for two at seven");
    let history = harness.session.engine().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "book a table for two at seven");
}

#[tokio::test]
async fn test_barge_in_after_sentence_arms_no_candidate() {
    let provider = ScriptedProvider::new(
        true,
        vec![Reply::StreamThenHold(vec![
            "Mount Everest is the tallest mountain on Earth. ",
            "It is",
        ])],
    );
    let mut harness = start(&provider, SessionConfig::default());

    say(&harness, "what is the tallest mountain").await;
    wait_for(&mut harness.events, |e| {
        matches!(e, VoiceSessionEvent::Speaking { .. })
    })
    .await;

    speech_started(&harness).await;
    wait_for(&mut harness.events, |e| matches!(e, VoiceSessionEvent::BargedIn)).await;

    assert!(harness.session.handler().candidate().is_none());
    assert_eq!(harness.session.engine().state(), TurnState::Aborted);
    assert!(harness.sink.stops.load(Ordering::SeqCst) >= 1);

    end(&mut harness).await;
    let history = harness.session.engine().history();
    assert_eq!(history.last().map(|m| m.role), Some(Role::Assistant));
}

#[tokio::test]
async fn test_noise_resumes_listening() {
    let provider = ScriptedProvider::new(false, vec![]);
    let mut harness = start(&provider, SessionConfig::default());

    say(&harness, "   ").await;
    wait_for(&mut harness.events, |e| matches!(e, VoiceSessionEvent::Noise)).await;
    assert_eq!(harness.capture.resets.load(Ordering::SeqCst), 1);

    let reason = end(&mut harness).await;
    assert_eq!(reason, SessionEnd::Timeout);
    assert_eq!(harness.capture.stops.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_noise_can_stop_listening() {
    let provider = ScriptedProvider::new(false, vec![]);
    let mut harness = start(
        &provider,
        SessionConfig {
            noise_policy: NoisePolicy::StopListening,
            ..Default::default()
        },
    );

    say(&harness, "").await;
    let reason = finish(&mut harness).await;

    assert_eq!(reason, SessionEnd::NoSpeech);
    assert_eq!(harness.capture.stops.load(Ordering::SeqCst), 1);
    assert_eq!(harness.capture.resets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timeout_lets_generation_finish() {
    let provider = ScriptedProvider::new(
        false,
        vec![Reply::Hold("The answer arrives after listening has ended.")],
    );
    let mut harness = start(&provider, SessionConfig::default());

    say(&harness, "tell me something").await;
    wait_entered(&provider).await;
    say(&harness, voice_turn_core::TIMEOUT_SENTINEL).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.session.engine().is_active());
    provider.release.notify_one();

    let reason = finish(&mut harness).await;

    assert_eq!(reason, SessionEnd::Timeout);
    assert_eq!(harness.session.engine().state(), TurnState::Finished);
    assert_eq!(
        *harness.sink.spoken.lock(),
        vec!["The answer arrives after listening has ended.".to_string()]
    );
}
