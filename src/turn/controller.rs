//! Async shell around `TurnMachine`.
//!
//! One task owns every device and timer. It waits on user actions, voice
//! preference changes, the silence tick, pending capture and exchange
//! requests, the reply stream, the speech queue and the two deadlines. Each
//! wake-up becomes a `TurnInput`, and the commands the machine answers with
//! are executed without awaiting, so a slow collaborator never holds up the
//! next user action.

use crate::audio::capture::{AudioPayload, CaptureProvider, CaptureSession};
use crate::audio::clock::{Clock, TokioClock};
use crate::audio::silence::{DetectorConfig, SilenceDecision, SilenceDetector};
use crate::defaults;
use crate::error::{Result, VoxturnError};
use crate::exchange::{ExchangeClient, ExchangeRequest, ReplyStream};
use crate::speech::queue::{SpeechEvent, SpeechQueue};
use crate::speech::segmenter::SegmenterConfig;
use crate::speech::synth::{SpeechSynthesizer, VoicePreference};
use crate::turn::report::{ErrorReporter, LogReporter};
use crate::turn::state::{Command, TurnInput, TurnMachine};
use crate::turn::status::{StatusSnapshot, TurnId};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Configuration for the turn controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnConfig {
    pub detector: DetectorConfig,
    pub segmenter: SegmenterConfig,
    /// Quiet period after the last sentence before returning to idle.
    pub settle_delay: Duration,
    /// Longest wait for the first reply chunk. `None` waits indefinitely.
    pub exchange_timeout: Option<Duration>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            segmenter: SegmenterConfig::default(),
            settle_delay: Duration::from_millis(defaults::SETTLE_DELAY_MS),
            exchange_timeout: None,
        }
    }
}

/// User requests accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAction {
    Start,
    Stop,
}

/// Handle to a running controller.
///
/// Dropping every handle shuts the controller down.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    actions: mpsc::UnboundedSender<TurnAction>,
    status: watch::Receiver<StatusSnapshot>,
}

impl TurnHandle {
    /// Begin a new turn, cancelling the current one.
    pub fn start(&self) -> Result<()> {
        self.send(TurnAction::Start)
    }

    /// Finish capturing now instead of waiting for silence.
    pub fn stop(&self) -> Result<()> {
        self.send(TurnAction::Stop)
    }

    /// Latest published status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    fn send(&self, action: TurnAction) -> Result<()> {
        self.actions
            .send(action)
            .map_err(|_| VoxturnError::Other("turn controller is not running".to_string()))
    }
}

/// A scheduled wake-up for one turn.
type Deadline = Option<(TurnId, Instant)>;

/// An in-flight collaborator call for one turn. Dropping it abandons the call.
type Pending<T> = Option<(TurnId, BoxFuture<'static, Result<T>>)>;

/// Drives turns: capture, exchange and playback.
pub struct TurnController {
    config: TurnConfig,
    machine: TurnMachine,
    capture: Arc<dyn CaptureProvider>,
    opening: Pending<CaptureSession>,
    session: Option<CaptureSession>,
    payload: Option<AudioPayload>,
    detector: SilenceDetector<Arc<dyn Clock>>,
    /// Bumped every time monitoring starts, so the tick interval restarts.
    monitor_epoch: u64,
    exchange: Arc<dyn ExchangeClient>,
    sending: Pending<ReplyStream>,
    reply: Option<(TurnId, ReplyStream)>,
    exchange_deadline: Deadline,
    settle: Deadline,
    speech: SpeechQueue,
    speech_turn: TurnId,
    preferences: watch::Receiver<VoicePreference>,
    actions: mpsc::UnboundedReceiver<TurnAction>,
    status: watch::Sender<StatusSnapshot>,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl TurnController {
    /// Creates a controller and the handle used to drive it.
    ///
    /// Nothing runs until `run` (or `spawn`) is called.
    pub fn new(
        config: TurnConfig,
        capture: Box<dyn CaptureProvider>,
        exchange: Arc<dyn ExchangeClient>,
        synth: Arc<dyn SpeechSynthesizer>,
        preferences: watch::Receiver<VoicePreference>,
    ) -> (Self, TurnHandle) {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);

        let controller = Self {
            machine: TurnMachine::new(config.segmenter),
            detector: SilenceDetector::with_clock(config.detector, clock),
            config,
            capture: Arc::from(capture),
            opening: None,
            session: None,
            payload: None,
            monitor_epoch: 0,
            exchange,
            sending: None,
            reply: None,
            exchange_deadline: None,
            settle: None,
            speech: SpeechQueue::new(synth, preferences.clone()),
            speech_turn: TurnId::default(),
            preferences,
            actions: action_rx,
            status: status_tx,
            error_reporter: Arc::new(LogReporter),
        };
        let handle = TurnHandle {
            actions: action_tx,
            status: status_rx,
        };
        (controller, handle)
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Sets a custom clock for the silence detector.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.detector = SilenceDetector::with_clock(self.config.detector, clock);
        self
    }

    /// Runs the controller on a new tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every `TurnHandle` is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.detector.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut preferences_open = true;
        info!(client = self.exchange.name(), "turn controller started");

        loop {
            let monitoring = self.detector.is_active() && self.session.is_some();
            let epoch = self.monitor_epoch;

            let input = tokio::select! {
                action = self.actions.recv() => match action {
                    Some(TurnAction::Start) => TurnInput::Start,
                    Some(TurnAction::Stop) => TurnInput::Stop,
                    None => break,
                },
                changed = self.preferences.changed(), if preferences_open => match changed {
                    Ok(()) => TurnInput::PreferenceChanged,
                    Err(_) => {
                        debug!("voice preference sender dropped");
                        preferences_open = false;
                        continue;
                    }
                },
                _ = ticker.tick(), if monitoring => match self.poll_detector() {
                    Some(input) => input,
                    None => continue,
                },
                (turn, result) = resolve(&mut self.opening) => {
                    self.opening = None;
                    self.capture_input(turn, result)
                },
                (turn, result) = resolve(&mut self.sending) => {
                    self.sending = None;
                    match self.exchange_input(turn, result) {
                        Some(input) => input,
                        None => continue,
                    }
                },
                (turn, item) = next_reply(&mut self.reply) => self.reply_input(turn, item),
                event = self.speech.next_event() => match self.speech_input(event) {
                    Some(input) => input,
                    None => continue,
                },
                turn = wait_until(self.settle) => {
                    self.settle = None;
                    TurnInput::SettleElapsed { turn }
                },
                turn = wait_until(self.exchange_deadline) => {
                    self.exchange_deadline = None;
                    let after_ms = self
                        .config
                        .exchange_timeout
                        .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
                        .unwrap_or_default();
                    TurnInput::ExchangeFailed {
                        turn,
                        error: VoxturnError::ExchangeTimeout { after_ms },
                    }
                },
            };

            self.dispatch(input);
            if self.monitor_epoch != epoch {
                ticker.reset();
            }
        }

        self.shutdown();
    }

    /// Feeds one input through the machine, executing commands until no
    /// follow-up inputs remain.
    fn dispatch(&mut self, input: TurnInput) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            trace!(?input, "turn input");
            let commands = self.machine.handle(input);
            self.publish();
            for command in commands {
                if let Some(follow_up) = self.execute(command) {
                    inputs.push_back(follow_up);
                }
            }
        }
    }

    fn execute(&mut self, command: Command) -> Option<TurnInput> {
        trace!(command = command.name(), "executing");
        match command {
            Command::ReleaseCapture => {
                self.abandon_open();
                self.session = None;
                self.payload = None;
                None
            }
            Command::OpenCapture { turn } => {
                // A new device is only requested once the old one is gone.
                self.abandon_open();
                self.session = None;
                let provider = Arc::clone(&self.capture);
                debug!(%turn, "requesting capture");
                self.opening = Some((
                    turn,
                    Box::pin(async move { CaptureSession::start(provider.as_ref()).await }),
                ));
                None
            }
            Command::StartMonitoring => {
                self.detector.start();
                self.monitor_epoch += 1;
                None
            }
            Command::StopMonitoring => {
                self.detector.stop();
                None
            }
            Command::FinalizeCapture { turn } => {
                self.abandon_open();
                let payload = self
                    .session
                    .take()
                    .map(CaptureSession::stop)
                    .unwrap_or(AudioPayload::Empty);
                let empty = payload.is_empty();
                debug!(%turn, bytes = payload.data().len(), "capture finalized");
                self.payload = Some(payload);
                Some(TurnInput::PayloadFinalized { turn, empty })
            }
            Command::SendExchange { turn } => {
                self.send_exchange(turn);
                None
            }
            Command::CancelExchange => {
                if let Some((turn, _)) = self.sending.take() {
                    info!(%turn, "exchange request abandoned");
                }
                if let Some((turn, _)) = self.reply.take() {
                    info!(%turn, "exchange cancelled");
                }
                self.exchange_deadline = None;
                None
            }
            Command::Enqueue(sentence) => {
                self.speech_turn = self.machine.turn();
                self.speech.enqueue(sentence);
                None
            }
            Command::CancelSpeech => {
                self.speech.cancel_all();
                None
            }
            Command::ScheduleSettle { turn } => {
                self.settle = Some((turn, Instant::now() + self.config.settle_delay));
                None
            }
            Command::CancelSettle => {
                self.settle = None;
                None
            }
            Command::Report(error) => {
                self.error_reporter.report(error.stage(), &error);
                None
            }
            Command::Recover { turn } => Some(TurnInput::Recover { turn }),
        }
    }

    fn abandon_open(&mut self) {
        if let Some((turn, _)) = self.opening.take() {
            debug!(%turn, "capture request abandoned");
        }
    }

    /// Starts the request; the deadline runs from here, not from when
    /// `send` returns.
    fn send_exchange(&mut self, turn: TurnId) {
        let audio = match self.payload.take() {
            Some(AudioPayload::Recorded { data, .. }) => data,
            _ => Vec::new(),
        };
        let language = self.preferences.borrow().language_code.clone();
        info!(
            %turn,
            bytes = audio.len(),
            %language,
            client = self.exchange.name(),
            "sending exchange"
        );

        let request = ExchangeRequest::new(audio, &language);
        let exchange = Arc::clone(&self.exchange);
        self.sending = Some((turn, Box::pin(async move { exchange.send(request).await })));
        self.exchange_deadline = self
            .config
            .exchange_timeout
            .map(|timeout| (turn, Instant::now() + timeout));
    }

    fn capture_input(&mut self, turn: TurnId, result: Result<CaptureSession>) -> TurnInput {
        match result {
            Ok(session) => {
                if turn == self.machine.turn() {
                    info!(%turn, "capture opened");
                    self.session = Some(session);
                } else {
                    debug!(%turn, "releasing capture opened for a superseded turn");
                }
                TurnInput::CaptureOpened { turn }
            }
            Err(error) => TurnInput::CaptureFailed { turn, error },
        }
    }

    fn exchange_input(&mut self, turn: TurnId, result: Result<ReplyStream>) -> Option<TurnInput> {
        match result {
            Ok(stream) => {
                if turn == self.machine.turn() {
                    debug!(%turn, "reply stream open");
                    self.reply = Some((turn, stream));
                }
                None
            }
            Err(error) => {
                self.exchange_deadline = None;
                Some(TurnInput::ExchangeFailed { turn, error })
            }
        }
    }

    fn poll_detector(&mut self) -> Option<TurnInput> {
        let session = self.session.as_mut()?;
        session.collect();
        let sample = session.sample();
        match self.detector.tick(&sample) {
            SilenceDecision::EndOfUtterance => {
                info!(turn = %self.machine.turn(), "end of utterance");
                Some(TurnInput::EndOfUtterance {
                    turn: self.machine.turn(),
                })
            }
            SilenceDecision::Listening | SilenceDecision::Inactive => None,
        }
    }

    fn reply_input(&mut self, turn: TurnId, item: Option<Result<String>>) -> TurnInput {
        match item {
            Some(Ok(text)) => {
                // Blank keep-alive chunks do not count as the first reply.
                if !text.trim().is_empty() {
                    self.exchange_deadline = None;
                }
                trace!(%turn, chunk = %text, "reply chunk");
                TurnInput::ReplyChunk { turn, text }
            }
            Some(Err(error)) => {
                self.reply = None;
                self.exchange_deadline = None;
                TurnInput::ExchangeFailed { turn, error }
            }
            None => {
                self.reply = None;
                self.exchange_deadline = None;
                debug!(%turn, "reply complete");
                TurnInput::ReplyComplete { turn }
            }
        }
    }

    fn speech_input(&mut self, event: SpeechEvent) -> Option<TurnInput> {
        let turn = self.speech_turn;
        match event {
            SpeechEvent::Finished { text } => {
                debug!(%turn, %text, "sentence spoken");
                None
            }
            SpeechEvent::Drained { text } => {
                debug!(%turn, %text, "last queued sentence spoken");
                Some(TurnInput::SpeechDrained { turn })
            }
            SpeechEvent::Failed { error, .. } => Some(TurnInput::SynthesisFailed { turn, error }),
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.status.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            debug!(status = %snapshot.status, message = snapshot.message.text(), "status changed");
            *current = snapshot;
            true
        });
    }

    fn shutdown(&mut self) {
        self.detector.stop();
        self.speech.cancel_all();
        self.sending = None;
        self.reply = None;
        self.opening = None;
        self.session = None;
        info!("turn controller stopped");
    }
}

/// Result of the in-flight call; pending when there is none.
///
/// The call stays in `pending` until it resolves, so dropping this future
/// inside `select!` loses nothing.
async fn resolve<T>(pending: &mut Pending<T>) -> (TurnId, Result<T>) {
    match pending {
        Some((turn, call)) => (*turn, call.await),
        None => std::future::pending().await,
    }
}

/// Next item of the open reply stream; pending when there is none.
async fn next_reply(
    reply: &mut Option<(TurnId, ReplyStream)>,
) -> (TurnId, Option<Result<String>>) {
    match reply {
        Some((turn, stream)) => (*turn, stream.next().await),
        None => std::future::pending().await,
    }
}

/// Sleeps until the deadline; pending when none is set.
async fn wait_until(deadline: Deadline) -> TurnId {
    match deadline {
        Some((turn, at)) => {
            tokio::time::sleep_until(at).await;
            turn
        }
        None => std::future::pending().await,
    }
}
