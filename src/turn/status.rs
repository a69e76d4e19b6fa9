//! Observable status for the UI layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing turn identifier. `TurnId(0)` means "no turn yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TurnId(pub u64);

impl TurnId {
    pub fn next(self) -> Self {
        TurnId(self.0 + 1)
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Idle,
    Capturing,
    /// Waiting on the remote model ("thinking").
    Exchanging,
    Speaking,
    Error,
}

impl TurnStatus {
    /// Neutral status text shown while in this state.
    pub fn neutral_message(self) -> &'static str {
        match self {
            TurnStatus::Idle => "Ready",
            TurnStatus::Capturing => "Listening...",
            TurnStatus::Exchanging => "Thinking...",
            TurnStatus::Speaking => "Speaking...",
            TurnStatus::Error => "Something went wrong",
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnStatus::Idle => "idle",
            TurnStatus::Capturing => "capturing",
            TurnStatus::Exchanging => "exchanging",
            TurnStatus::Speaking => "speaking",
            TurnStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// The single message shown to the user. Setting one kind replaces the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum StatusLine {
    Neutral(String),
    Error(String),
}

impl StatusLine {
    pub fn text(&self) -> &str {
        match self {
            StatusLine::Neutral(text) | StatusLine::Error(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StatusLine::Error(_))
    }
}

/// Everything a UI needs to render the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub turn: TurnId,
    pub status: TurnStatus,
    pub message: StatusLine,
    /// True while the microphone is held open.
    pub recording: bool,
}

impl StatusSnapshot {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            turn: TurnId::default(),
            status: TurnStatus::Idle,
            message: StatusLine::Neutral(TurnStatus::Idle.neutral_message().to_string()),
            recording: false,
        }
    }
}
