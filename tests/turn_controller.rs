//! End-to-end turns through `TurnController` with mock devices.
//!
//! Every test runs on paused tokio time, so the silence delay, chunk delays,
//! playback durations and settle timer all elapse instantly and in order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use voxturn::audio::capture::CaptureProbe;
use voxturn::turn::report::CollectingReporter;
use voxturn::{
    CaptureFailure, MockCaptureProvider, MockExchangeClient, MockSynthesizer, StatusSnapshot,
    TurnConfig, TurnController, TurnHandle, TurnId, TurnStatus, VoicePreference,
};

const LOUD: u8 = 120;

struct Harness {
    handle: TurnHandle,
    status: watch::Receiver<StatusSnapshot>,
    prefs: watch::Sender<VoicePreference>,
    capture: CaptureProbe,
    exchange: MockExchangeClient,
    synth: MockSynthesizer,
    reporter: CollectingReporter,
    seen: Vec<TurnStatus>,
    _task: JoinHandle<()>,
}

fn harness(
    config: TurnConfig,
    capture: MockCaptureProvider,
    exchange: MockExchangeClient,
    synth: MockSynthesizer,
) -> Harness {
    let (prefs, prefs_rx) = watch::channel(VoicePreference::default());
    let reporter = CollectingReporter::new();
    let probe = capture.probe();

    let (controller, handle) = TurnController::new(
        config,
        Box::new(capture),
        Arc::new(exchange.clone()),
        Arc::new(synth.clone()),
        prefs_rx,
    );
    let controller = controller.with_error_reporter(Arc::new(reporter.clone()));
    let task = controller.spawn();
    let status = handle.subscribe();

    Harness {
        handle,
        status,
        prefs,
        capture: probe,
        exchange,
        synth,
        reporter,
        seen: Vec::new(),
        _task: task,
    }
}

fn default_harness(
    capture: MockCaptureProvider,
    exchange: MockExchangeClient,
    synth: MockSynthesizer,
) -> Harness {
    harness(TurnConfig::default(), capture, exchange, synth)
}

fn idle(turn: u64) -> impl Fn(&StatusSnapshot) -> bool {
    move |s| s.turn == TurnId(turn) && s.status == TurnStatus::Idle
}

fn status_of(turn: u64, status: TurnStatus) -> impl Fn(&StatusSnapshot) -> bool {
    move |s| s.turn == TurnId(turn) && s.status == status
}

impl Harness {
    /// Waits (in virtual time) for a snapshot matching `predicate`.
    async fn wait_for(
        &mut self,
        what: &str,
        predicate: impl Fn(&StatusSnapshot) -> bool,
    ) -> StatusSnapshot {
        let status = &mut self.status;
        let seen = &mut self.seen;
        let result = tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                {
                    let current = status.borrow_and_update();
                    if seen.last() != Some(&current.status) {
                        seen.push(current.status);
                    }
                    if predicate(&current) {
                        return current.clone();
                    }
                }
                if status.changed().await.is_err() {
                    panic!("controller stopped while waiting for {}", what);
                }
            }
        })
        .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(_) => panic!(
                "timed out waiting for {}; last status {:?}",
                what,
                *self.status.borrow()
            ),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn empty_capture_returns_to_idle_without_exchange() {
    let mut h = default_harness(
        MockCaptureProvider::new().without_audio(),
        MockExchangeClient::new(&["never"]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let done = h.wait_for("idle after empty capture", idle(1)).await;

    assert!(!done.message.is_error());
    assert_eq!(done.message.text(), "Ready");
    assert_eq!(h.exchange.request_count(), 0);
    assert_eq!(h.capture.opened(), 1);
    assert_eq!(h.capture.open_now(), 0);
    assert!(!h.seen.contains(&TurnStatus::Exchanging));
    assert!(h.synth.started().is_empty());
    assert!(h.reporter.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_turn_speaks_each_sentence_in_order() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(1000), LOUD),
        MockExchangeClient::new(&["Hello. How ", "are you? I'm fine."]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let done = h.wait_for("turn 1 idle", idle(1)).await;

    assert_eq!(
        h.seen,
        vec![
            TurnStatus::Idle,
            TurnStatus::Capturing,
            TurnStatus::Exchanging,
            TurnStatus::Speaking,
            TurnStatus::Idle,
        ]
    );
    assert!(!done.message.is_error());
    assert!(!done.recording);
    assert_eq!(h.synth.finished(), vec!["Hello.", "How are you?", "I'm fine."]);
    assert_eq!(h.synth.max_concurrent(), 1);
    assert_eq!(h.synth.cancels(), 0);

    let requests = h.exchange.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].language_hint, "en-US");
    assert!(!requests[0].audio.is_empty());
    assert!(!requests[0].current_datetime.is_empty());

    assert_eq!(h.capture.max_concurrent(), 1);
    assert_eq!(h.capture.open_now(), 0);
}

#[tokio::test(start_paused = true)]
async fn end_of_utterance_waits_for_the_full_silence_delay() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(2000), LOUD),
        MockExchangeClient::new(&["Ok."]),
        MockSynthesizer::new(),
    );

    let started = tokio::time::Instant::now();
    h.handle.start().unwrap();
    h.wait_for("capture to end", status_of(1, TurnStatus::Exchanging))
        .await;
    let elapsed = started.elapsed();

    // Loud until 2000 ms, then 1500 ms of silence, sampled every 16 ms.
    assert!(
        elapsed >= Duration::from_millis(3450) && elapsed <= Duration::from_millis(3550),
        "end of utterance after {:?}",
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn user_stop_ends_capture_early() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_secs(30), LOUD),
        MockExchangeClient::new(&["Got it."]),
        MockSynthesizer::new(),
    );

    let started = tokio::time::Instant::now();
    h.handle.start().unwrap();
    h.wait_for("recording", |s| s.turn == TurnId(1) && s.recording)
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    h.handle.stop().unwrap();

    h.wait_for("turn 1 idle", idle(1)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.exchange.request_count(), 1);
    assert_eq!(h.synth.finished(), vec!["Got it."]);
}

#[tokio::test(start_paused = true)]
async fn stop_while_idle_is_ignored() {
    let mut h = default_harness(
        MockCaptureProvider::new(),
        MockExchangeClient::new(&[]),
        MockSynthesizer::new(),
    );

    h.handle.stop().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.handle.status(), StatusSnapshot::default());
    assert_eq!(h.capture.opened(), 0);
    h.wait_for("still idle", idle(0)).await;
}

#[tokio::test(start_paused = true)]
async fn restart_during_capture_releases_the_microphone_first() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_secs(30), LOUD),
        MockExchangeClient::new(&[]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 recording", |s| s.turn == TurnId(1) && s.recording)
        .await;
    h.handle.start().unwrap();
    h.wait_for("turn 2 recording", |s| s.turn == TurnId(2) && s.recording)
        .await;

    assert_eq!(h.capture.opened(), 2);
    assert_eq!(h.capture.released(), 1);
    assert_eq!(h.capture.open_now(), 1);
    assert_eq!(h.capture.max_concurrent(), 1);
    assert_eq!(h.exchange.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn new_turn_during_playback_cancels_the_old_reply() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["One. Two. ", "Three. "]),
        MockSynthesizer::new().with_duration(Duration::from_millis(500)),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 speaking", status_of(1, TurnStatus::Speaking))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    h.handle.start().unwrap();
    let restarted = h
        .wait_for("turn 2 capturing", status_of(2, TurnStatus::Capturing))
        .await;
    assert!(!restarted.message.is_error());
    assert_eq!(h.synth.cancels(), 1);
    assert_eq!(h.synth.playing_now(), 0);
    assert!(h.synth.finished().is_empty());

    h.wait_for("turn 2 idle", idle(2)).await;

    // Only the second turn's reply was heard, one sentence at a time.
    assert_eq!(h.synth.finished(), vec!["One.", "Two.", "Three."]);
    assert_eq!(h.synth.max_concurrent(), 1);
    assert_eq!(h.exchange.request_count(), 2);
    assert_eq!(h.capture.max_concurrent(), 1);
    assert_eq!(h.capture.open_now(), 0);
}

#[tokio::test(start_paused = true)]
async fn preference_change_while_speaking_cancels_playback() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["One. Two. Three."]),
        MockSynthesizer::new().with_duration(Duration::from_millis(500)),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 speaking", status_of(1, TurnStatus::Speaking))
        .await;
    h.prefs.send_modify(|pref| pref.rate = 1.5);

    let done = h.wait_for("turn 1 idle", idle(1)).await;
    assert!(!done.message.is_error());
    assert_eq!(h.synth.cancels(), 1);
    assert!(h.synth.finished().is_empty());
    assert!(h.reporter.reports().is_empty());

    // The next turn speaks with the new settings.
    h.handle.start().unwrap();
    h.wait_for("turn 2 idle", idle(2)).await;
    let started = h.synth.started();
    assert_eq!(started[0].rate, 1.0);
    assert!(started[1..].iter().all(|u| u.rate == 1.5));
    assert_eq!(h.synth.finished(), vec!["One.", "Two.", "Three."]);
}

#[tokio::test(start_paused = true)]
async fn preference_change_outside_playback_keeps_the_turn() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["Fine."]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 recording", |s| s.turn == TurnId(1) && s.recording)
        .await;
    h.prefs.send_modify(|pref| pref.language_code = "en-GB".to_string());

    h.wait_for("turn 1 idle", idle(1)).await;
    assert_eq!(h.synth.finished(), vec!["Fine."]);
    assert_eq!(h.synth.started()[0].language_code, "en-GB");
    assert_eq!(h.exchange.requests()[0].language_hint, "en-GB");
}

#[tokio::test(start_paused = true)]
async fn exchange_failure_mid_reply_shows_error_then_idles() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["One. ", "Two. "]).with_failure_after(1),
        MockSynthesizer::new().with_duration(Duration::from_millis(500)),
    );

    h.handle.start().unwrap();
    let failed = h
        .wait_for("turn 1 idle with error", |s| {
            s.turn == TurnId(1) && s.status == TurnStatus::Idle && s.message.is_error()
        })
        .await;

    assert_eq!(failed.message.text(), "Exchange failed: mock stream interrupted");
    assert!(h.synth.finished().is_empty());
    assert_eq!(h.synth.playing_now(), 0);
    assert_eq!(
        h.reporter.reports(),
        vec![(
            "exchange".to_string(),
            "Exchange failed: mock stream interrupted".to_string()
        )]
    );

    // Starting over replaces the error with a neutral message.
    h.handle.start().unwrap();
    let next = h
        .wait_for("turn 2 capturing", status_of(2, TurnStatus::Capturing))
        .await;
    assert!(!next.message.is_error());
    assert_eq!(next.message.text(), "Listening...");
}

#[tokio::test(start_paused = true)]
async fn exchange_refusal_shows_error() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["unused"]).with_send_failure(),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let failed = h.wait_for("turn 1 idle", idle(1)).await;

    assert!(failed.message.is_error());
    assert!(failed.message.text().contains("refused"));
    assert!(h.synth.started().is_empty());
    assert_eq!(h.capture.open_now(), 0);
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_drops_the_rest_of_the_reply() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["One. Two. Three."]),
        MockSynthesizer::new().with_failure_on("Two."),
    );

    h.handle.start().unwrap();
    let failed = h.wait_for("turn 1 idle", idle(1)).await;

    assert!(failed.message.is_error());
    assert!(failed.message.text().starts_with("Speech synthesis failed"));
    assert_eq!(h.synth.finished(), vec!["One."]);
    assert_eq!(h.synth.started_texts(), vec!["One.", "Two."]);
    let reports = h.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "speech");
}

#[tokio::test(start_paused = true)]
async fn capture_failure_shows_error_and_skips_exchange() {
    let mut h = default_harness(
        MockCaptureProvider::new()
            .with_open_failure(CaptureFailure::PermissionDenied)
            .with_error_message("microphone access was denied"),
        MockExchangeClient::new(&["unused"]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let failed = h.wait_for("turn 1 idle", idle(1)).await;

    assert!(failed.message.is_error());
    assert_eq!(
        failed.message.text(),
        "Microphone unavailable (permission denied): microphone access was denied"
    );
    assert!(!failed.recording);
    assert_eq!(h.capture.opened(), 0);
    assert_eq!(h.exchange.request_count(), 0);
    assert_eq!(h.reporter.reports()[0].0, "capture");
}

#[tokio::test(start_paused = true)]
async fn exchange_timeout_bounds_the_wait_for_the_first_chunk() {
    let config = TurnConfig {
        exchange_timeout: Some(Duration::from_secs(2)),
        ..TurnConfig::default()
    };
    let mut h = harness(
        config,
        MockCaptureProvider::new(),
        MockExchangeClient::new(&["never"]).stalled(),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 exchanging", status_of(1, TurnStatus::Exchanging))
        .await;
    let waiting_since = tokio::time::Instant::now();
    let failed = h.wait_for("turn 1 idle", idle(1)).await;

    assert_eq!(
        failed.message.text(),
        "Exchange timed out after 2000 ms without a reply"
    );
    let waited = waiting_since.elapsed();
    assert!(waited >= Duration::from_millis(1990) && waited <= Duration::from_millis(2010));
    assert_eq!(h.reporter.reports()[0].0, "exchange");
}

#[tokio::test(start_paused = true)]
async fn exchange_timeout_does_not_cut_a_slow_reply() {
    let config = TurnConfig {
        exchange_timeout: Some(Duration::from_secs(2)),
        ..TurnConfig::default()
    };
    let mut h = harness(
        config,
        MockCaptureProvider::new().with_level(Duration::from_millis(500), LOUD),
        MockExchangeClient::new(&["One. ", "Two. ", "Three."])
            .with_chunk_delay(Duration::from_secs(1)),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let done = h.wait_for("turn 1 idle", idle(1)).await;

    assert!(!done.message.is_error());
    assert_eq!(h.synth.finished(), vec!["One.", "Two.", "Three."]);
}

#[tokio::test(start_paused = true)]
async fn without_timeout_a_stalled_exchange_keeps_waiting() {
    let mut h = default_harness(
        MockCaptureProvider::new(),
        MockExchangeClient::new(&["never"]).stalled(),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 exchanging", status_of(1, TurnStatus::Exchanging))
        .await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    let status = h.handle.status();
    assert_eq!(status.status, TurnStatus::Exchanging);
    assert_eq!(status.message.text(), "Thinking...");

    // The user can still abandon the turn.
    h.handle.start().unwrap();
    h.wait_for("turn 2 capturing", status_of(2, TurnStatus::Capturing))
        .await;
}

#[tokio::test(start_paused = true)]
async fn exchange_timeout_covers_a_send_that_never_returns() {
    let config = TurnConfig {
        exchange_timeout: Some(Duration::from_secs(2)),
        ..TurnConfig::default()
    };
    let mut h = harness(
        config,
        MockCaptureProvider::new(),
        MockExchangeClient::new(&["never"]).with_send_delay(Duration::from_secs(3600)),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 exchanging", status_of(1, TurnStatus::Exchanging))
        .await;
    let waiting_since = tokio::time::Instant::now();
    let failed = h.wait_for("turn 1 idle", idle(1)).await;

    assert!(waiting_since.elapsed() <= Duration::from_millis(2010));
    assert_eq!(
        failed.message.text(),
        "Exchange timed out after 2000 ms without a reply"
    );
    assert_eq!(h.exchange.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_turn_is_not_held_up_by_a_pending_send() {
    let mut h = default_harness(
        MockCaptureProvider::new(),
        MockExchangeClient::new(&["never"]).with_send_delay(Duration::from_secs(3600)),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 exchanging", status_of(1, TurnStatus::Exchanging))
        .await;

    let asked_at = tokio::time::Instant::now();
    h.handle.start().unwrap();
    let capturing = h
        .wait_for("turn 2 capturing", status_of(2, TurnStatus::Capturing))
        .await;

    assert!(asked_at.elapsed() < Duration::from_secs(1));
    assert!(!capturing.message.is_error());
    assert!(h.reporter.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn blank_keep_alive_chunk_does_not_disarm_the_timeout() {
    let config = TurnConfig {
        exchange_timeout: Some(Duration::from_secs(2)),
        ..TurnConfig::default()
    };
    let mut h = harness(
        config,
        MockCaptureProvider::new(),
        MockExchangeClient::new(&["", "Too late."]).with_chunk_delay(Duration::from_millis(1500)),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let failed = h.wait_for("turn 1 idle", idle(1)).await;

    assert_eq!(
        failed.message.text(),
        "Exchange timed out after 2000 ms without a reply"
    );
    assert!(h.synth.started().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_during_a_slow_capture_open_abandons_it() {
    let mut h = default_harness(
        MockCaptureProvider::new().with_open_delay(Duration::from_secs(30)),
        MockExchangeClient::new(&["unused"]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    let waiting = h
        .wait_for("turn 1 capturing", status_of(1, TurnStatus::Capturing))
        .await;
    assert!(!waiting.recording);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let asked_at = tokio::time::Instant::now();
    h.handle.stop().unwrap();
    let done = h.wait_for("turn 1 idle", idle(1)).await;

    assert!(asked_at.elapsed() < Duration::from_secs(1));
    assert!(!done.message.is_error());
    assert_eq!(h.exchange.request_count(), 0);

    // The abandoned request never comes back to claim the device.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.capture.opened(), 0);
    assert_eq!(h.capture.open_now(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_during_a_slow_capture_open_opens_once() {
    let mut h = default_harness(
        MockCaptureProvider::new()
            .with_open_delay(Duration::from_secs(5))
            .with_level(Duration::from_secs(30), LOUD),
        MockExchangeClient::new(&["unused"]),
        MockSynthesizer::new(),
    );

    h.handle.start().unwrap();
    h.wait_for("turn 1 capturing", status_of(1, TurnStatus::Capturing))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.handle.start().unwrap();
    h.wait_for("turn 2 capturing", status_of(2, TurnStatus::Capturing))
        .await;
    let recording = h
        .wait_for("turn 2 recording", |s| s.turn == TurnId(2) && s.recording)
        .await;

    assert_eq!(recording.status, TurnStatus::Capturing);
    assert_eq!(h.capture.opened(), 1);
    assert_eq!(h.capture.max_concurrent(), 1);
}
