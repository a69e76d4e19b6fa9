//! Pure decision logic for a voice turn.
//!
//! `TurnMachine::handle` takes one input and returns the commands the shell
//! must execute. It performs no I/O and never awaits, so every transition can
//! be tested without devices or timers.

use crate::error::VoxturnError;
use crate::speech::segmenter::{SegmenterConfig, SentenceSegmenter};
use crate::turn::status::{StatusLine, StatusSnapshot, TurnId, TurnStatus};
use tracing::{debug, info};

/// Something that happened, fed to the machine by the shell.
///
/// Inputs carrying asynchronous results name the turn they belong to; the
/// machine ignores inputs for any turn other than the current one.
#[derive(Debug)]
pub enum TurnInput {
    /// User asked to begin a new turn (also cancels whatever is running).
    Start,
    /// User asked to finish capturing now.
    Stop,
    /// The listener changed voice, rate, pitch or language.
    PreferenceChanged,
    CaptureOpened { turn: TurnId },
    CaptureFailed { turn: TurnId, error: VoxturnError },
    /// The silence detector decided the user has finished speaking.
    EndOfUtterance { turn: TurnId },
    PayloadFinalized { turn: TurnId, empty: bool },
    ReplyChunk { turn: TurnId, text: String },
    ReplyComplete { turn: TurnId },
    ExchangeFailed { turn: TurnId, error: VoxturnError },
    /// The speech queue played its last entry and is idle.
    SpeechDrained { turn: TurnId },
    SynthesisFailed { turn: TurnId, error: VoxturnError },
    SettleElapsed { turn: TurnId },
    Recover { turn: TurnId },
}

impl TurnInput {
    /// Turn an asynchronous input belongs to; `None` for user inputs.
    pub fn turn(&self) -> Option<TurnId> {
        match self {
            TurnInput::Start | TurnInput::Stop | TurnInput::PreferenceChanged => None,
            TurnInput::CaptureOpened { turn }
            | TurnInput::CaptureFailed { turn, .. }
            | TurnInput::EndOfUtterance { turn }
            | TurnInput::PayloadFinalized { turn, .. }
            | TurnInput::ReplyChunk { turn, .. }
            | TurnInput::ReplyComplete { turn }
            | TurnInput::ExchangeFailed { turn, .. }
            | TurnInput::SpeechDrained { turn }
            | TurnInput::SynthesisFailed { turn, .. }
            | TurnInput::SettleElapsed { turn }
            | TurnInput::Recover { turn } => Some(*turn),
        }
    }
}

/// Work the shell performs on behalf of the machine.
#[derive(Debug)]
pub enum Command {
    /// Drop the capture session without producing a payload.
    ReleaseCapture,
    OpenCapture { turn: TurnId },
    StartMonitoring,
    StopMonitoring,
    /// Stop the capture session and answer with `PayloadFinalized`.
    FinalizeCapture { turn: TurnId },
    /// Send the finalized payload to the exchange client.
    SendExchange { turn: TurnId },
    /// Drop the reply stream (and its deadline) if one is open.
    CancelExchange,
    Enqueue(String),
    CancelSpeech,
    ScheduleSettle { turn: TurnId },
    CancelSettle,
    Report(VoxturnError),
    /// Answer with `TurnInput::Recover` for this turn.
    Recover { turn: TurnId },
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ReleaseCapture => "release_capture",
            Command::OpenCapture { .. } => "open_capture",
            Command::StartMonitoring => "start_monitoring",
            Command::StopMonitoring => "stop_monitoring",
            Command::FinalizeCapture { .. } => "finalize_capture",
            Command::SendExchange { .. } => "send_exchange",
            Command::CancelExchange => "cancel_exchange",
            Command::Enqueue(_) => "enqueue",
            Command::CancelSpeech => "cancel_speech",
            Command::ScheduleSettle { .. } => "schedule_settle",
            Command::CancelSettle => "cancel_settle",
            Command::Report(_) => "report",
            Command::Recover { .. } => "recover",
        }
    }
}

/// The turn state machine.
pub struct TurnMachine {
    turn: TurnId,
    status: TurnStatus,
    message: StatusLine,
    segmenter: SentenceSegmenter,
    recording: bool,
    /// Capture was asked to finalize; waiting for the payload.
    finalizing: bool,
    /// Reply text received so far for the current turn.
    reply: String,
    /// Segments enqueued for the current turn.
    enqueued: usize,
    /// True once the speech queue reported it is idle (or nothing was queued).
    speech_idle: bool,
    reply_complete: bool,
    settle_pending: bool,
}

impl TurnMachine {
    pub fn new(segmenter: SegmenterConfig) -> Self {
        Self {
            turn: TurnId::default(),
            status: TurnStatus::Idle,
            message: StatusLine::Neutral(TurnStatus::Idle.neutral_message().to_string()),
            segmenter: SentenceSegmenter::with_config(segmenter),
            recording: false,
            finalizing: false,
            reply: String::new(),
            enqueued: 0,
            speech_idle: true,
            reply_complete: false,
            settle_pending: false,
        }
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub fn message(&self) -> &StatusLine {
        &self.message
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Reply text accumulated for the current turn, including text not yet
    /// spoken.
    pub fn reply_text(&self) -> &str {
        &self.reply
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            turn: self.turn,
            status: self.status,
            message: self.message.clone(),
            recording: self.recording,
        }
    }

    /// Applies one input and returns the commands to execute, in order.
    pub fn handle(&mut self, input: TurnInput) -> Vec<Command> {
        if let Some(turn) = input.turn()
            && turn != self.turn
        {
            debug!(input_turn = %turn, current = %self.turn, "ignoring input for superseded turn");
            return Vec::new();
        }

        let mut commands = Vec::new();
        match input {
            TurnInput::Start => self.start(&mut commands),
            TurnInput::Stop => {
                if self.capturing() {
                    self.finish_capture(&mut commands);
                } else {
                    debug!(status = %self.status, "stop ignored outside capture");
                }
            }
            TurnInput::PreferenceChanged => {
                if self.status == TurnStatus::Speaking {
                    info!(turn = %self.turn, "voice preference changed, cancelling playback");
                    self.cancel_reply(&mut commands);
                    self.enter(TurnStatus::Idle);
                }
            }
            TurnInput::CaptureOpened { .. } => {
                if self.capturing() {
                    self.recording = true;
                    commands.push(Command::StartMonitoring);
                }
            }
            TurnInput::CaptureFailed { error, .. } => {
                if self.capturing() {
                    self.recording = false;
                    self.fail(error, &mut commands);
                }
            }
            TurnInput::EndOfUtterance { .. } => {
                if self.capturing() {
                    self.finish_capture(&mut commands);
                }
            }
            TurnInput::PayloadFinalized { empty, .. } => {
                if self.status == TurnStatus::Capturing && self.finalizing {
                    self.finalizing = false;
                    if empty {
                        info!(turn = %self.turn, "nothing was recorded, skipping exchange");
                        self.enter(TurnStatus::Idle);
                    } else {
                        self.enter(TurnStatus::Exchanging);
                        commands.push(Command::SendExchange { turn: self.turn });
                    }
                }
            }
            TurnInput::ReplyChunk { text, .. } => {
                if self.in_reply() {
                    self.reply.push_str(&text);
                    let segments = self.segmenter.feed(&text);
                    self.enqueue_all(segments, &mut commands);
                }
            }
            TurnInput::ReplyComplete { .. } => {
                if self.in_reply() {
                    self.reply_complete = true;
                    if let Some(rest) = self.segmenter.flush() {
                        self.enqueue_all(vec![rest], &mut commands);
                    }
                    if self.enqueued == 0 {
                        info!(turn = %self.turn, "reply had nothing to speak");
                        self.enter(TurnStatus::Idle);
                    } else if self.speech_idle {
                        self.schedule_settle(&mut commands);
                    }
                }
            }
            TurnInput::ExchangeFailed { error, .. } => {
                if self.in_reply() {
                    self.cancel_reply(&mut commands);
                    self.fail(error, &mut commands);
                }
            }
            TurnInput::SpeechDrained { .. } => {
                if self.status == TurnStatus::Speaking {
                    self.speech_idle = true;
                    if self.reply_complete {
                        self.schedule_settle(&mut commands);
                    }
                }
            }
            TurnInput::SynthesisFailed { error, .. } => {
                if self.status == TurnStatus::Speaking {
                    self.speech_idle = true;
                    commands.push(Command::CancelExchange);
                    self.clear_settle(&mut commands);
                    self.segmenter.reset();
                    self.fail(error, &mut commands);
                }
            }
            TurnInput::SettleElapsed { .. } => {
                if self.status == TurnStatus::Speaking && self.settle_pending {
                    self.settle_pending = false;
                    self.enter(TurnStatus::Idle);
                }
            }
            TurnInput::Recover { .. } => {
                if self.status == TurnStatus::Error {
                    // The error message stays on screen until the next turn.
                    self.status = TurnStatus::Idle;
                    debug!(turn = %self.turn, "recovered from error");
                }
            }
        }
        commands
    }

    fn start(&mut self, commands: &mut Vec<Command>) {
        if self.status != TurnStatus::Idle {
            info!(turn = %self.turn, status = %self.status, "new turn supersedes the current one");
        }
        if self.status == TurnStatus::Capturing {
            commands.push(Command::StopMonitoring);
            commands.push(Command::ReleaseCapture);
        }
        if self.status != TurnStatus::Idle {
            self.cancel_reply(commands);
        }

        self.turn = self.turn.next();
        self.recording = false;
        self.finalizing = false;
        self.reply.clear();
        self.enqueued = 0;
        self.speech_idle = true;
        self.reply_complete = false;
        self.settle_pending = false;
        self.enter(TurnStatus::Capturing);
        commands.push(Command::OpenCapture { turn: self.turn });
    }

    fn finish_capture(&mut self, commands: &mut Vec<Command>) {
        commands.push(Command::StopMonitoring);
        commands.push(Command::FinalizeCapture { turn: self.turn });
        self.recording = false;
        self.finalizing = true;
    }

    /// Drops everything belonging to the reply: playback, stream, settle
    /// timer and partial sentence.
    fn cancel_reply(&mut self, commands: &mut Vec<Command>) {
        commands.push(Command::CancelSpeech);
        commands.push(Command::CancelExchange);
        self.clear_settle(commands);
        self.segmenter.reset();
        self.speech_idle = true;
    }

    fn enqueue_all(&mut self, segments: Vec<String>, commands: &mut Vec<Command>) {
        for segment in segments {
            self.clear_settle(commands);
            self.enqueued += 1;
            self.speech_idle = false;
            commands.push(Command::Enqueue(segment));
            if self.status == TurnStatus::Exchanging {
                self.enter(TurnStatus::Speaking);
            }
        }
    }

    fn schedule_settle(&mut self, commands: &mut Vec<Command>) {
        if !self.settle_pending {
            self.settle_pending = true;
            commands.push(Command::ScheduleSettle { turn: self.turn });
        }
    }

    fn clear_settle(&mut self, commands: &mut Vec<Command>) {
        if self.settle_pending {
            self.settle_pending = false;
            commands.push(Command::CancelSettle);
        }
    }

    fn fail(&mut self, error: VoxturnError, commands: &mut Vec<Command>) {
        self.status = TurnStatus::Error;
        self.message = StatusLine::Error(error.to_string());
        info!(turn = %self.turn, stage = error.stage(), "turn failed");
        commands.push(Command::Report(error));
        commands.push(Command::Recover { turn: self.turn });
    }

    /// Capturing and not yet asked to finalize.
    fn capturing(&self) -> bool {
        self.status == TurnStatus::Capturing && !self.finalizing
    }

    fn in_reply(&self) -> bool {
        matches!(self.status, TurnStatus::Exchanging | TurnStatus::Speaking)
    }

    fn enter(&mut self, status: TurnStatus) {
        if self.status != status {
            debug!(turn = %self.turn, from = %self.status, to = %status, "turn transition");
        }
        self.status = status;
        self.message = StatusLine::Neutral(status.neutral_message().to_string());
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}
